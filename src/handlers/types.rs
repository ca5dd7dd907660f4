//! # Common API Types
//!
//! Response wrapper shared by every pipeline endpoint. Failures use the same
//! shape through [`crate::error::ApiError`].

use serde::{Deserialize, Serialize};

/// `{success, data}` response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wrap a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
