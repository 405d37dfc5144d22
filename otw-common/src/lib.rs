//! # OTW Common Library
//!
//! Shared code for the OTW traffic services including:
//! - Canonical incident models and notification types
//! - Error types
//! - Configuration loading
//! - Text sanitization and timestamp helpers

pub mod config;
pub mod error;
pub mod models;
pub mod sanitize;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    CanonicalEvent, ChangeNotification, EventStatus, GeoPoint, PushFrame, StoredEventRecord,
    StoredStatus,
};
