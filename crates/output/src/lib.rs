#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Output
//!
//! The single-assignment asynchronous value that provisioning wires together.
//!
//! An [`Output<T>`] is either already resolved or pending on upstream work.
//! Once resolved it never changes, and every derivation runs exactly once:
//!
//! - [`Output::resolved`] / [`Output::secret`]: immediate values
//! - [`Output::deferred`]: a port resolved later through an [`OutputResolver`]
//! - [`Output::map`] / [`Output::try_map`]: derive a new value (panics in the
//!   transform are captured as [`OutputError::Transform`])
//! - [`Output::zip`] / [`Output::zip3`] / [`Output::all`]: combine several
//!   outputs, failing fast without invoking the downstream transform
//! - [`Output::get`]: scheduler-facing await
//!
//! Secrecy is sticky: any value derived from a secret output is itself
//! secret. Origins (the resource keys a value descends from) accumulate the
//! same way and drive dependency-edge inference in the graph layer.

pub mod error;
pub mod output;
pub mod resolver;

pub use error::OutputError;
pub use output::Output;
pub use resolver::OutputResolver;
