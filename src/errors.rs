use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for tool operations.
///
/// Each variant is a distinct, user-reportable failure kind so the manager
/// can decide retry-vs-abort per kind instead of pattern-matching strings.
#[derive(Debug, Error)]
pub enum GhrmError {
    #[error("no release found for {repo}{}", .tag.as_deref().map(|t| format!(" at tag '{t}'")).unwrap_or_default())]
    NotFound { repo: String, tag: Option<String> },

    #[error("GitHub API rate limit exhausted while querying {repo}; retry later")]
    RateLimited { repo: String },

    #[error("release {tag} of {repo} has no asset for this platform (searched tokens: {searched})")]
    NoMatchingAsset {
        repo: String,
        tag: String,
        searched: String,
    },

    #[error("download failed for {repo}: {detail}")]
    DownloadFailed { repo: String, detail: String },

    #[error("extraction failed for {repo}: {detail}")]
    ExtractFailed { repo: String, detail: String },

    #[error("activation failed for {repo}: {detail}")]
    ActivationFailed { repo: String, detail: String },

    #[error("insufficient privileges to write {}; re-run with elevated access", .path.display())]
    PermissionDenied { repo: String, path: PathBuf },

    #[error("no previous version of {repo} to roll back to")]
    NoPreviousVersion { repo: String },

    #[error("invalid configuration: {detail}")]
    InvalidConfiguration { detail: String },
}

impl GhrmError {
    /// Whether re-running the same operation can plausibly succeed.
    ///
    /// `RateLimited` wants backoff first; the local operation failures are
    /// retryable as-is. `NotFound`/`NoMatchingAsset`/`PermissionDenied`/
    /// `NoPreviousVersion`/`InvalidConfiguration` will fail identically on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GhrmError::RateLimited { .. }
                | GhrmError::DownloadFailed { .. }
                | GhrmError::ExtractFailed { .. }
                | GhrmError::ActivationFailed { .. }
        )
    }
}
