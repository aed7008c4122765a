//! Test utilities for `usut`
//!
//! Provides a scripted in-memory USB host for exercising discovery and the
//! transfer engine without physical test hardware.

pub mod mock_host;

pub use mock_host::*;
