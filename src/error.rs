//! Typed failures returned by every external call site (feeds, tagging,
//! captioning, delivery).
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("telegram error: {0}")]
    Telegram(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        CollaboratorError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Parse(err.to_string())
    }
}

impl From<teloxide::RequestError> for CollaboratorError {
    fn from(err: teloxide::RequestError) -> Self {
        CollaboratorError::Telegram(err.to_string())
    }
}

/// Bound a collaborator call; an elapsed deadline becomes that call's failure.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> CollabResult<T>
where
    F: Future<Output = CollabResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(CollaboratorError::Timeout(limit)),
    }
}

/// Turn a non-2xx response into `CollaboratorError::Api`, keeping the body.
pub(crate) async fn ensure_success(
    res: reqwest::Response,
) -> CollabResult<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let message = res.text().await.unwrap_or_default();
    Err(CollaboratorError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_maps_elapsed_deadline() {
        let res: CollabResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(CollaboratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn with_timeout_passes_inner_result_through() {
        let res = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);

        let res: CollabResult<()> = with_timeout(Duration::from_secs(1), async {
            Err(CollaboratorError::Parse("bad".into()))
        })
        .await;
        assert!(matches!(res, Err(CollaboratorError::Parse(_))));
    }
}
