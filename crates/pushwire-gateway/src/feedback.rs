//! Feedback channel.
//!
//! The gateway reports tokens that are no longer valid on a separate
//! feedback service. This client does not poll it; the interface exists so
//! callers can detect that and fall back to another source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FeedbackError;

/// A token the feedback service reported as unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// When the gateway determined the app was gone (Unix seconds).
    pub timestamp: u32,
    /// Hex device token.
    pub token: String,
}

/// Source of invalid-token reports.
#[async_trait]
pub trait FeedbackService: Send + Sync {
    /// Fetch reports accumulated since the previous call.
    async fn fetch(&self) -> Result<Vec<FeedbackEntry>, FeedbackError>;
}

/// Feedback service that always reports [`FeedbackError::NotSupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedFeedback;

#[async_trait]
impl FeedbackService for UnsupportedFeedback {
    async fn fetch(&self) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        Err(FeedbackError::NotSupported)
    }
}
