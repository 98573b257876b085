#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Core
//!
//! Identity types shared by every Gantry crate.
//!
//! Resources are addressed by a [`ResourceKey`], a namespaced [`ResourceType`]
//! plus a [`ResourceName`]. Keys are deterministic: building the same
//! deployment twice yields the same keys, which is what makes re-runs
//! idempotent at the identity level. A [`RunId`] identifies one execution of
//! the engine and is freshly generated per run.

pub mod key;
pub mod run;

pub use key::{IdentityError, ResourceKey, ResourceName, ResourceType};
pub use run::RunId;
