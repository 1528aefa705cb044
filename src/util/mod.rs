//! Utility functions
//!
//! Helpers shared by the value model and the native library.

pub mod dtoa;

pub use dtoa::number_to_string;
