//! The error taxonomy used across the subscription watcher.
//!
//! Every domain error that should be distinguishable by a caller (rather than
//! just logged and swallowed) is an [`ErrorCode`] variant wrapped in
//! [`WatcherError`]. Code that doesn't care about the specific kind keeps
//! propagating plain `anyhow::Error` via `?`; code that needs to branch on
//! the kind downcasts with [`WatcherError::code`] or the `is_*` helpers.

use std::borrow::Cow;

use thiserror::Error;

/// Tag attached to an `anyhow::Error` chain identifying which of the
/// boundary-facing error kinds produced it. Attach via `.context(..)` the
/// same way the rest of the chain is built; recover it with
/// [`WatcherError::code`].
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct WatcherError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A query string failed to parse.
    InvalidQuery,
    /// Attempted to add a subscription or blocklist entry that already exists.
    Duplicate,
    /// Attempted to remove or pause something that isn't present.
    NotFound,
    /// Attempted to pause something already paused.
    AlreadyPaused,
    /// Attempted to resume something already running.
    AlreadyRunning,
    /// A submission id has been refreshed more times than `fetch_refresh_limit`.
    TooManyRefresh,
    /// The Sender was handed a `CheckState` with neither uploaded media nor a
    /// cache entry.
    MediaMissing,
    /// The watcher is shutting down and the in-flight item was abandoned.
    Shutdown,
}

impl WatcherError {
    pub fn invalid_query(cause: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidQuery, format!("invalid query: {cause}"))
    }

    pub fn duplicate(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::Duplicate, format!("already exists: {what}"))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("not found: {what}"))
    }

    pub fn already_paused(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::AlreadyPaused, format!("already paused: {what}"))
    }

    pub fn already_running(what: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::AlreadyRunning,
            format!("already running: {what}"),
        )
    }

    pub fn too_many_refresh(sub_id: impl std::fmt::Display, limit: u32) -> Self {
        Self::new(
            ErrorCode::TooManyRefresh,
            format!("submission {sub_id} exceeded refresh limit of {limit}"),
        )
    }

    pub fn media_missing(sub_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::MediaMissing,
            format!("submission {sub_id} has no uploaded media or cache entry"),
        )
    }

    pub fn shutdown() -> Self {
        Self::new(ErrorCode::Shutdown, "shutting down")
    }

    fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Extension trait for pulling an [`ErrorCode`] back out of an `anyhow` chain,
/// mirroring how the rest of the pipeline tags errors with `.context(..)`.
pub trait WatcherErrorAnyhowExt {
    fn watcher_error_code(&self) -> Option<ErrorCode>;
    fn is_code(&self, code: ErrorCode) -> bool {
        self.watcher_error_code() == Some(code)
    }
}

impl WatcherErrorAnyhowExt for anyhow::Error {
    fn watcher_error_code(&self) -> Option<ErrorCode> {
        self.chain()
            .find_map(|cause| cause.downcast_ref::<WatcherError>())
            .map(|e| e.code)
    }
}

/// Log an error via `tracing` and yield once, so a reporting call inside a
/// worker's failure path doesn't starve shutdown. Mirrors the "report, then
/// yield" pattern every stage worker uses around its retry loop.
pub async fn report_error(context: &str, err: &anyhow::Error) {
    tracing::error!(error = %err, "{context}");
    tokio::task::yield_now().await;
}

/// HTML-escape untrusted text before interpolating it into a user-visible
/// message (e.g. a subscription management reply). Kept next to the error
/// taxonomy since every "invalid input" message this crate's errors format
/// is ultimately shown to a chat user.
pub fn escape_user_text(input: &str) -> String {
    html_escape::encode_text(input).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_anyhow_context() {
        let err = anyhow::anyhow!("boom").context(WatcherError::duplicate("cat and dog"));
        assert!(err.is_code(ErrorCode::Duplicate));
        assert!(!err.is_code(ErrorCode::NotFound));
    }

    #[test]
    fn plain_anyhow_has_no_code() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(err.watcher_error_code(), None);
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_user_text("<b>cat</b> & \"dog\""), "&lt;b&gt;cat&lt;/b&gt; &amp; &quot;dog&quot;");
    }
}
