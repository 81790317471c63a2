//! Message handler trait
//!
//! Components implement [`MessageHandler`] for their subscription; the
//! [`ConsumerPool`](crate::ConsumerPool) calls it once per delivery.

use async_trait::async_trait;
use std::fmt;

use crate::broker::Delivery;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery. Returning an error hands the delivery to the
    /// pool's retry and dead-letter policy; returning `Ok` acknowledges it.
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Handler error that records whether a retry could succeed.
///
/// Errors not wrapped in this type are treated as recoverable.
#[derive(Debug)]
pub struct HandlerError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl HandlerError {
    /// Retrying cannot help (e.g. a payload that fails to decode).
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Whether the pool may retry after `err`.
pub(crate) fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HandlerError>()
        .map(HandlerError::is_recoverable)
        .unwrap_or(true)
}
