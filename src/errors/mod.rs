//! Error sanitizing and classification
//!
//! - **sanitize**: scrubs hex / base58 / byte-array / mnemonic payloads from text
//! - **classify**: maps raw chain failures onto the closed [`ErrorKind`] taxonomy

pub mod classify;
pub mod sanitize;

pub use classify::{classify, ChainError, ClassifiedError, ErrorKind, ErrorReason};
pub use sanitize::sanitize;
