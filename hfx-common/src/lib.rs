//! # HFX Common Library
//!
//! Shared code for the HFX import services and their API consumers:
//! - Error types
//! - Import progress events and job snapshot types
//! - Configuration loading (TOML + platform defaults)
//! - SSE encoding helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
