use futures::future::BoxFuture;
use thiserror::Error;

use crate::quadtree::QuadPath;

/// Transport-level fetch failures.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The transport cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Any other network or transport failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Asynchronous byte transport for stored terrain payloads.
///
/// URL construction, authentication, and retry policy all live behind this
/// seam. Returning `None` means the transport is throttled and no request
/// was created; the caller surfaces that as a retry-later condition without
/// registering anything.
pub trait TileFetcher: Send + Sync {
    fn fetch(
        &self,
        node: &QuadPath,
        version: i32,
    ) -> Option<BoxFuture<'static, Result<Vec<u8>, FetchError>>>;
}
