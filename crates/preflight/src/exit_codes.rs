//! Exit codes for the CLI

#![allow(dead_code)]

/// Success
pub const SUCCESS: i32 = 0;

/// One or more checks failed
pub const CHECKS_FAILED: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// User cancelled
pub const CANCELLED: i32 = 130;
