//! Deferred outputs and their single-use resolvers.

use futures::FutureExt;
use gantry_core::ResourceKey;
use tokio::sync::oneshot;

use crate::error::OutputError;
use crate::output::{Meta, Output};

/// The write half of a deferred output.
///
/// Exactly one of [`resolve`](OutputResolver::resolve) or
/// [`fail`](OutputResolver::fail) may be called; both consume the resolver.
/// Dropping it unresolved fails the output with [`OutputError::Dropped`] so
/// awaiters never hang on a lost port.
#[derive(Debug)]
pub struct OutputResolver<T> {
    tx: oneshot::Sender<Result<T, OutputError>>,
}

impl<T> OutputResolver<T> {
    /// Satisfies the output with a value, waking every awaiter.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Fails the output, waking every awaiter with the error.
    pub fn fail(self, error: OutputError) {
        let _ = self.tx.send(Err(error));
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an unresolved output port owned by `origin`.
    ///
    /// The returned output lists `origin` among its origins, which is how the
    /// graph layer infers a dependency edge from every spec that embeds it.
    pub fn deferred(origin: ResourceKey) -> (OutputResolver<T>, Self) {
        Self::deferred_with(origin, false)
    }

    /// Like [`Output::deferred`] but marked sensitive from the start.
    pub fn deferred_secret(origin: ResourceKey) -> (OutputResolver<T>, Self) {
        Self::deferred_with(origin, true)
    }

    fn deferred_with(origin: ResourceKey, secret: bool) -> (OutputResolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let dropped_origin = origin.clone();
        let fut = async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(OutputError::Dropped {
                    resource: dropped_origin,
                }),
            }
        }
        .boxed();
        let output = Self::from_future(
            Meta {
                secret,
                origins: vec![origin],
            },
            fut,
        );
        (OutputResolver { tx }, output)
    }
}
