//! Common test utilities for cdsapi integration tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod fixtures;

pub use config::*;
#[allow(unused_imports)]
pub use fixtures::*;
