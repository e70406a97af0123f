//! Collaborator seams for the ingestion core
//!
//! The core never decides delivery: parsed records go to a `Stasher`,
//! bound endpoints are announced through a `Reporter`. Both are narrow
//! async traits so the gateway binary (or tests) can supply anything from
//! an in-memory channel to a remote bus client.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{FullMessage, ListenerInfo};

/// Stash failure, split by blast radius
///
/// A `NonFatal` error condemns the one message it was returned for; the
/// source NACKs it and keeps going. A `Fatal` error means the stash can no
/// longer accept anything and the whole service must stop and wait.
#[derive(Debug, Error)]
pub enum StashError {
    /// The stash is broken; stop the service
    #[error("fatal stash failure: {0}")]
    Fatal(String),

    /// This message was rejected; others may still succeed
    #[error("message rejected by stash: {0}")]
    NonFatal(String),
}

impl StashError {
    /// Whether this failure must take the service down
    pub fn is_fatal(&self) -> bool {
        matches!(self, StashError::Fatal(_))
    }
}

/// Failure to announce bound endpoints
#[derive(Debug, Error)]
#[error("failed to report listeners: {0}")]
pub struct ReportError(pub String);

/// Accepts parsed records for durable buffering and eventual delivery
#[async_trait]
pub trait Stasher: Send + Sync {
    /// Hand a record to the stash
    ///
    /// Returns `Ok(())` once the stash has accepted responsibility for the
    /// record; the caller may then acknowledge the client.
    async fn stash(&self, msg: FullMessage) -> Result<(), StashError>;
}

/// A `Stasher` that also announces bound endpoints for service discovery
#[async_trait]
pub trait Reporter: Stasher {
    /// Announce the currently bound endpoints (empty slice on shutdown)
    async fn report(&self, infos: &[ListenerInfo]) -> Result<(), ReportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(StashError::Fatal("disk gone".into()).is_fatal());
        assert!(!StashError::NonFatal("too big".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = StashError::NonFatal("queue full".into());
        assert!(err.to_string().contains("queue full"));
        let err = ReportError("consul down".into());
        assert!(err.to_string().contains("consul down"));
    }
}
