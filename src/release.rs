use crate::cache::CacheStore;
use crate::errors::GhrmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pinned tags are immutable upstream, so their cache entries live long.
/// Bounded so a bad cached payload ages out without a manual `cache clear`.
pub const PINNED_TTL_SECS: u64 = 30 * 24 * 3600;

/// A release as resolved from the GitHub API (or its cached payload).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseInfo {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Requested version for a tool: an explicit tag, or whatever is latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Latest,
    Tag(String),
}

impl VersionConstraint {
    pub fn from_spec(version: Option<&str>) -> Self {
        match version {
            None | Some("latest") => VersionConstraint::Latest,
            Some(tag) => VersionConstraint::Tag(normalize_tag(tag)),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            VersionConstraint::Latest => None,
            VersionConstraint::Tag(tag) => Some(tag),
        }
    }
}

/// Add a 'v' prefix to purely numeric tags without slashes; leave existing
/// prefixes, non-numeric tags ("master", "tip") and slash-qualified tags
/// ("cli/v0.41.90") untouched.
pub fn normalize_tag(tag: &str) -> String {
    if tag.starts_with('v')
        || tag.contains('/')
        || !tag.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        tag.to_string()
    } else {
        format!("v{}", tag)
    }
}

pub fn release_url(repo: &str, constraint: &VersionConstraint) -> String {
    match constraint {
        VersionConstraint::Latest => {
            format!("https://api.github.com/repos/{}/releases/latest", repo)
        }
        VersionConstraint::Tag(tag) => {
            format!("https://api.github.com/repos/{}/releases/tags/{}", repo, tag)
        }
    }
}

pub fn cache_key(repo: &str, constraint: &VersionConstraint) -> String {
    match constraint {
        VersionConstraint::Latest => format!("release:{}:latest", repo),
        VersionConstraint::Tag(tag) => format!("release:{}:{}", repo, tag),
    }
}

/// Map an API failure status onto the error taxonomy. Rate-limit exhaustion
/// must stay distinct from a hard 404 so callers can back off instead of
/// aborting; a plain 403 maps to NotFound since retrying cannot help.
fn classify_api_failure(
    repo: &str,
    constraint: &VersionConstraint,
    status: u16,
    ratelimit_remaining: Option<&str>,
) -> GhrmError {
    match status {
        404 => GhrmError::NotFound {
            repo: repo.to_string(),
            tag: constraint.tag().map(str::to_string),
        },
        429 => GhrmError::RateLimited {
            repo: repo.to_string(),
        },
        403 if ratelimit_remaining == Some("0") => GhrmError::RateLimited {
            repo: repo.to_string(),
        },
        403 => GhrmError::NotFound {
            repo: repo.to_string(),
            tag: constraint.tag().map(str::to_string),
        },
        other => GhrmError::DownloadFailed {
            repo: repo.to_string(),
            detail: format!("GitHub API returned status {}", other),
        },
    }
}

/// Resolves a repository + version constraint to a `ReleaseInfo`, reading
/// and writing release payloads through the cache store.
pub struct ReleaseResolver<'a> {
    client: &'a reqwest::Client,
    cache: &'a CacheStore,
    latest_ttl_secs: u64,
}

impl<'a> ReleaseResolver<'a> {
    pub fn new(client: &'a reqwest::Client, cache: &'a CacheStore, latest_ttl_secs: u64) -> Self {
        Self {
            client,
            cache,
            latest_ttl_secs,
        }
    }

    pub async fn resolve(
        &self,
        repo: &str,
        constraint: &VersionConstraint,
    ) -> Result<ReleaseInfo, GhrmError> {
        let key = cache_key(repo, constraint);

        if let Some(bytes) = self.cache.get(&key) {
            match serde_json::from_slice::<ReleaseInfo>(&bytes) {
                Ok(release) => {
                    tracing::debug!("Using cached release payload for {}", repo);
                    return Ok(release);
                }
                Err(err) => {
                    tracing::warn!("Discarding unreadable cached release for {}: {}", repo, err);
                    self.cache.invalidate(&key);
                }
            }
        }

        let payload = self.fetch(repo, constraint).await?;
        let release: ReleaseInfo =
            serde_json::from_slice(&payload).map_err(|err| GhrmError::DownloadFailed {
                repo: repo.to_string(),
                detail: format!("unexpected release payload: {}", err),
            })?;

        let ttl = match constraint {
            VersionConstraint::Latest => self.latest_ttl_secs,
            VersionConstraint::Tag(_) => PINNED_TTL_SECS,
        };
        self.cache.put(&key, &payload, ttl);

        Ok(release)
    }

    async fn fetch(
        &self,
        repo: &str,
        constraint: &VersionConstraint,
    ) -> Result<Vec<u8>, GhrmError> {
        let url = release_url(repo, constraint);
        tracing::debug!("Fetching release info from {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", concat!("ghrm/", env!("CARGO_PKG_VERSION")));

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            request = request.header("Authorization", format!("token {}", token));
            tracing::debug!("Using GITHUB_TOKEN");
        }

        let response = request
            .send()
            .await
            .map_err(|err| GhrmError::DownloadFailed {
                repo: repo.to_string(),
                detail: format!("release metadata request failed: {}", err),
            })?;

        let status = response.status();
        if !status.is_success() {
            let remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(classify_api_failure(
                repo,
                constraint,
                status.as_u16(),
                remaining.as_deref(),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| GhrmError::DownloadFailed {
                repo: repo.to_string(),
                detail: format!("reading release payload: {}", err),
            })?;
        Ok(bytes.to_vec())
    }
}
