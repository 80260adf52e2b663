//! Utility functions shared by the file-backed stores.

pub mod fs;

pub use fs::write_atomic;
