//! The `Output` type and its derivation combinators.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use gantry_core::ResourceKey;

use crate::error::OutputError;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, OutputError>>>;

/// Construction-time facts about an output, inherited through derivation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Meta {
    pub(crate) secret: bool,
    pub(crate) origins: Vec<ResourceKey>,
}

impl Meta {
    pub(crate) fn merged(&self, other: &Self) -> Self {
        let mut origins = self.origins.clone();
        for origin in &other.origins {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        Self {
            secret: self.secret || other.secret,
            origins,
        }
    }
}

/// A single-assignment asynchronous value.
///
/// Cloning an `Output` is cheap and shares the underlying computation: the
/// producing future runs exactly once, its `Result` is memoised, and every
/// awaiter receives a copy. Failure is a first-class resolution: awaiting a
/// failed output yields an [`OutputError`] rather than hanging.
pub struct Output<T> {
    shared: SharedResult<T>,
    meta: Arc<Meta>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            meta: Arc::clone(&self.meta),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.peek() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Output")
            .field("state", &state)
            .field("secret", &self.meta.secret)
            .field("origins", &self.meta.origins)
            .finish()
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_future(meta: Meta, fut: BoxFuture<'static, Result<T, OutputError>>) -> Self {
        Self {
            shared: fut.shared(),
            meta: Arc::new(meta),
        }
    }

    /// An output that is already satisfied.
    pub fn resolved(value: T) -> Self {
        Self::from_future(Meta::default(), futures::future::ready(Ok(value)).boxed())
    }

    /// An already-satisfied output marked sensitive.
    ///
    /// Everything derived from it is sensitive too; reports and logs render
    /// such values redacted.
    pub fn secret(value: T) -> Self {
        Self::from_future(
            Meta {
                secret: true,
                origins: Vec::new(),
            },
            futures::future::ready(Ok(value)).boxed(),
        )
    }

    /// Suspends until the value is available.
    ///
    /// This is the scheduler-facing await: node tasks call it for each input
    /// and thereby block on exactly their own dependencies. Multiple
    /// concurrent callers share one evaluation.
    pub async fn get(&self) -> Result<T, OutputError> {
        self.shared.clone().await
    }

    /// Non-blocking inspection of the current state, for diagnostics.
    #[must_use]
    pub fn peek(&self) -> Option<&Result<T, OutputError>> {
        self.shared.peek()
    }

    /// `true` if this value descends from a secret.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.meta.secret
    }

    /// The resource keys this value is derived from, in first-seen order.
    #[must_use]
    pub fn origins(&self) -> &[ResourceKey] {
        &self.meta.origins
    }

    /// Derives a new output by applying `f` once the value resolves.
    ///
    /// The transform is deferred until first awaited and runs exactly once.
    /// A panic inside `f` resolves the derived output as
    /// [`OutputError::Transform`] instead of unwinding into the scheduler.
    pub fn map<U, F>(self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let meta = (*self.meta).clone();
        let fut = async move {
            let value = self.get().await?;
            match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                Ok(mapped) => Ok(mapped),
                Err(payload) => Err(OutputError::transform(panic_text(payload.as_ref()))),
            }
        }
        .boxed();
        Output::from_future(meta, fut)
    }

    /// Like [`Output::map`] for fallible transforms; an `Err` becomes
    /// [`OutputError::Transform`].
    pub fn try_map<U, E, F>(self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let meta = (*self.meta).clone();
        let fut = async move {
            let value = self.get().await?;
            match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                Ok(Ok(mapped)) => Ok(mapped),
                Ok(Err(err)) => Err(OutputError::transform(err.to_string())),
                Err(payload) => Err(OutputError::transform(panic_text(payload.as_ref()))),
            }
        }
        .boxed();
        Output::from_future(meta, fut)
    }

    /// Combines two outputs into one resolving when both have resolved.
    ///
    /// If either input fails, the pair fails with that error and no
    /// downstream transform runs. Errors surface in argument order.
    pub fn zip<U>(self, other: Output<U>) -> Output<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let meta = self.meta.merged(&other.meta);
        let fut = async move {
            let a = self.get().await?;
            let b = other.get().await?;
            Ok((a, b))
        }
        .boxed();
        Output::from_future(meta, fut)
    }

    /// Combines three outputs; see [`Output::zip`].
    pub fn zip3<U, V>(self, second: Output<U>, third: Output<V>) -> Output<(T, U, V)>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let meta = self.meta.merged(&second.meta).merged(&third.meta);
        let fut = async move {
            let a = self.get().await?;
            let b = second.get().await?;
            let c = third.get().await?;
            Ok((a, b, c))
        }
        .boxed();
        Output::from_future(meta, fut)
    }

    /// Combines a homogeneous collection of outputs, preserving order.
    ///
    /// An empty vector resolves immediately to an empty vector.
    pub fn all(outputs: Vec<Output<T>>) -> Output<Vec<T>> {
        let meta = outputs
            .iter()
            .fold(Meta::default(), |meta, output| meta.merged(&output.meta));
        let fut = async move {
            let mut values = Vec::with_capacity(outputs.len());
            for output in outputs {
                values.push(output.get().await?);
            }
            Ok(values)
        }
        .boxed();
        Output::from_future(meta, fut)
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "transform panicked".to_owned()
    }
}
