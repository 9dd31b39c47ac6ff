//! Shared error and result types for the hydra database broker.
//!
//! Every hydra crate converges on [`BrokerError`] so that tool-level callers
//! see one error vocabulary regardless of which backend produced the failure.

pub mod error;

pub use error::{BrokerError, Result};
