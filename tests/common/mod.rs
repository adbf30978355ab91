//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Scripted connection handle recording lifecycle calls
//! - Scripted per-node probe source
//! - Fleet fixtures and event helpers

pub mod fixtures;
pub mod mock_handle;
pub mod mock_probe;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use mock_handle::*;
#[allow(unused_imports)]
pub use mock_probe::*;
