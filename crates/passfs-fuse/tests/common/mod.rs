//! Shared helpers for mounted FUSE tests.

#![allow(dead_code)]

pub mod assertions;
pub mod harness;

pub use assertions::*;
pub use harness::*;
