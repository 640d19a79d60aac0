//! CLI command implementations.

pub(crate) mod hub;
pub(crate) mod monitor;
pub(crate) mod run;
pub(crate) mod validate;
