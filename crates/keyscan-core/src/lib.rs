//! keyscan core - UI-independent pipeline logic
//!
//! Fetches an image, runs one or more OCR engines over it, validates the
//! recognized text against a key format and emits the activation command.
//! The `keyscan` binary is a thin frontend over this crate.

pub mod config;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod ocr;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod redact;
pub mod review;

pub use error::{KeyscanError, Result};
pub use postprocess::extract_key;
