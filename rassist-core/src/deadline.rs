//! Optional deadlines around socket operations.

use std::future::Future;
use std::time::Duration;

use crate::error::RassistError;

/// Await `fut`, failing with [`RassistError::Timeout`] once `limit` passes.
///
/// `None` disables the deadline.
pub(crate) async fn within<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, RassistError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RassistError::Timeout(limit)),
        None => Ok(fut.await),
    }
}
