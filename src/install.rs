use crate::cache::CacheStore;
use crate::download::{extract_archive, fetch_asset, find_executable_in, make_executable};
use crate::errors::GhrmError;
use crate::platform;
use crate::release::{AssetDescriptor, ReleaseInfo};
use crate::system;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the activation link inside each tool's install root.
pub const CURRENT_LINK: &str = "current";

const VERSION_MARKER: &str = ".ghrm-version.json";

/// One installed version of a tool, discovered from its install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub repo: String,
    pub version: String,
    pub install_dir: PathBuf,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionMarker {
    repo: String,
    version: String,
    installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub version: String,
    pub install_dir: PathBuf,
    /// Version that was active before this install, if any.
    pub previous: Option<String>,
    /// False when the version directory already existed and was reused.
    pub fresh_install: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub from_version: String,
    pub to_version: String,
}

/// Tags may contain '/' (e.g. "cli/v0.41.90"); flatten for directory names.
pub fn sanitize_version(tag: &str) -> String {
    tag.replace('/', "__")
}

/// Versions present under an install root. The `current` link, hidden
/// entries (including in-flight staging directories) and plain files are
/// not versions. `installed_at` comes from the marker written at finalize
/// time, falling back to directory mtime for directories we didn't create.
pub fn list_installed(repo: &str, install_root: &Path) -> Vec<InstalledVersion> {
    let entries = match fs::read_dir(install_root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut versions = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == CURRENT_LINK || name.starts_with('.') {
            continue;
        }
        if path.is_symlink() || !path.is_dir() {
            continue;
        }

        let marker: Option<VersionMarker> = fs::read_to_string(path.join(VERSION_MARKER))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        let installed_at = marker
            .map(|m| m.installed_at)
            .or_else(|| {
                fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from)
            })
            .unwrap_or_else(Utc::now);

        versions.push(InstalledVersion {
            repo: repo.to_string(),
            version: name,
            install_dir: path,
            installed_at,
        });
    }
    versions
}

/// The version the activation link points at, if the link exists.
pub fn active_version(install_root: &Path) -> Option<String> {
    let target = fs::read_link(install_root.join(CURRENT_LINK)).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Point the activation link at `version`. The new link is created under a
/// temporary name and renamed over the old one, so the link never dangles
/// and readers never observe a missing `current`. Fails without touching
/// the existing link when the target directory is absent.
pub fn activate(repo: &str, install_root: &Path, version: &str) -> Result<(), GhrmError> {
    let activation_failed = |detail: String| GhrmError::ActivationFailed {
        repo: repo.to_string(),
        detail,
    };

    let target = install_root.join(version);
    if !target.is_dir() {
        return Err(activation_failed(format!(
            "version directory {} does not exist",
            target.display()
        )));
    }

    let link = install_root.join(CURRENT_LINK);
    let tmp_link = install_root.join(format!(".{}.tmp.{}", CURRENT_LINK, std::process::id()));
    let _ = fs::remove_file(&tmp_link);

    make_link(Path::new(version), &tmp_link)
        .map_err(|err| activation_failed(format!("creating link: {}", err)))?;

    #[cfg(windows)]
    {
        // Windows cannot rename over an existing link; the switch is
        // remove-then-rename there, a platform limitation.
        if link.exists() {
            let _ = fs::remove_file(&link);
        }
    }

    if let Err(err) = fs::rename(&tmp_link, &link) {
        let _ = fs::remove_file(&tmp_link);
        return Err(activation_failed(format!("switching link: {}", err)));
    }

    tracing::info!(
        "Activated {} -> {}",
        link.display(),
        version
    );
    Ok(())
}

/// Install a resolved release: download (through the asset cache), extract
/// into a staging directory beside the final location, rename into place,
/// then atomically switch the activation link.
///
/// An existing directory for the same version is reused without touching
/// the network. When activation fails after a successful extraction the new
/// version directory stays on disk and the previous activation is untouched.
pub async fn install(
    client: &reqwest::Client,
    cache: &CacheStore,
    repo: &str,
    tool_name: &str,
    install_root: &Path,
    release: &ReleaseInfo,
    asset: &AssetDescriptor,
) -> Result<InstallOutcome, GhrmError> {
    let version = sanitize_version(&release.tag);
    let version_dir = install_root.join(&version);
    let previous = active_version(install_root);

    system::ensure_writable_root(install_root).map_err(|err| {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            GhrmError::PermissionDenied {
                repo: repo.to_string(),
                path: install_root.to_path_buf(),
            }
        } else {
            GhrmError::ExtractFailed {
                repo: repo.to_string(),
                detail: format!("preparing install root: {}", err),
            }
        }
    })?;

    let fresh_install = !version_dir.is_dir();
    if fresh_install {
        stage_and_finalize(client, cache, repo, tool_name, install_root, &version_dir, release, asset).await?;
    } else {
        tracing::info!("{} {} is already installed; reusing it", repo, release.tag);
    }

    activate(repo, install_root, &version)?;

    Ok(InstallOutcome {
        version,
        install_dir: version_dir,
        previous,
        fresh_install,
    })
}

#[allow(clippy::too_many_arguments)]
async fn stage_and_finalize(
    client: &reqwest::Client,
    cache: &CacheStore,
    repo: &str,
    tool_name: &str,
    install_root: &Path,
    version_dir: &Path,
    release: &ReleaseInfo,
    asset: &AssetDescriptor,
) -> Result<(), GhrmError> {
    let extract_failed = |detail: String| GhrmError::ExtractFailed {
        repo: repo.to_string(),
        detail,
    };

    // Staging lives beside the final directory so the finishing rename stays
    // on one filesystem. TempDir removes it on any early return.
    let staging = TempDir::new_in(install_root)
        .map_err(|err| extract_failed(format!("creating staging directory: {}", err)))?;
    let download_dir = TempDir::new()
        .map_err(|err| extract_failed(format!("creating download directory: {}", err)))?;

    let asset_path = fetch_asset(client, cache, repo, asset, download_dir.path()).await?;

    if platform::is_archive(&asset.name) {
        extract_archive(&asset_path, staging.path())
            .map_err(|err| extract_failed(err.to_string()))?;
        if let Some(exe) = find_executable_in(staging.path(), tool_name) {
            make_executable(&exe)
                .map_err(|err| extract_failed(format!("setting permissions: {}", err)))?;
        }
    } else {
        // Not an archive: install the raw asset as the tool's executable.
        let binary_name = format!("{}{}", tool_name, std::env::consts::EXE_SUFFIX);
        let target = staging.path().join(binary_name);
        fs::copy(&asset_path, &target)
            .map_err(|err| extract_failed(format!("placing binary: {}", err)))?;
        make_executable(&target)
            .map_err(|err| extract_failed(format!("setting permissions: {}", err)))?;
    }

    let marker = VersionMarker {
        repo: repo.to_string(),
        version: sanitize_version(&release.tag),
        installed_at: Utc::now(),
    };
    let marker_json = serde_json::to_vec_pretty(&marker)
        .map_err(|err| extract_failed(format!("writing version marker: {}", err)))?;
    fs::write(staging.path().join(VERSION_MARKER), marker_json)
        .map_err(|err| extract_failed(format!("writing version marker: {}", err)))?;

    // Keep the staging directory; it becomes the version directory.
    let staged = staging.into_path();
    if let Err(err) = fs::rename(&staged, version_dir) {
        let lost_race = version_dir.is_dir();
        let _ = fs::remove_dir_all(&staged);
        if lost_race {
            // A concurrent invocation finalized the same version first.
            tracing::debug!("{} appeared concurrently; using it", version_dir.display());
            return Ok(());
        }
        return Err(extract_failed(format!("finalizing version directory: {}", err)));
    }
    Ok(())
}

/// Re-activate the version installed most recently before the active one.
/// Ordering is install recency, not version-number order: rolling back from
/// the newest install lands on the previously installed version even when
/// its tag is numerically higher than older ones.
pub fn rollback(repo: &str, install_root: &Path) -> Result<RollbackOutcome, GhrmError> {
    let no_previous = || GhrmError::NoPreviousVersion {
        repo: repo.to_string(),
    };

    let versions = list_installed(repo, install_root);
    if versions.len() < 2 {
        return Err(no_previous());
    }

    let active_name = active_version(install_root).ok_or_else(no_previous)?;
    let active = versions
        .iter()
        .find(|v| v.version == active_name)
        .ok_or_else(no_previous)?;

    let target = versions
        .iter()
        .filter(|v| v.installed_at < active.installed_at)
        .max_by_key(|v| v.installed_at)
        .ok_or_else(no_previous)?;

    activate(repo, install_root, &target.version)?;

    Ok(RollbackOutcome {
        from_version: active_name,
        to_version: target.version.clone(),
    })
}

/// Delete versions beyond the retention count. The active version always
/// survives and counts toward `keep_versions`; remaining slots go to the
/// most recently installed candidates. Removal is best-effort: one failed
/// deletion is logged and does not stop the others.
pub fn clean(
    repo: &str,
    install_root: &Path,
    keep_versions: u32,
) -> Result<Vec<String>, GhrmError> {
    if keep_versions < 1 {
        return Err(GhrmError::InvalidConfiguration {
            detail: "keep_versions must be at least 1".to_string(),
        });
    }

    let active = active_version(install_root);
    let mut candidates: Vec<InstalledVersion> = list_installed(repo, install_root)
        .into_iter()
        .filter(|v| Some(&v.version) != active.as_ref())
        .collect();
    candidates.sort_by(|a, b| b.installed_at.cmp(&a.installed_at));

    let keep_slots = if active.is_some() {
        keep_versions as usize - 1
    } else {
        keep_versions as usize
    };

    let mut removed = Vec::new();
    for candidate in candidates.iter().skip(keep_slots) {
        tracing::info!("Removing old version: {}", candidate.install_dir.display());
        match fs::remove_dir_all(&candidate.install_dir) {
            Ok(()) => removed.push(candidate.version.clone()),
            Err(err) => {
                tracing::warn!(
                    "Failed to remove {}: {}",
                    candidate.install_dir.display(),
                    err
                );
            }
        }
    }
    Ok(removed)
}

/// Remove every installed version and the activation link for a tool.
pub fn remove_all(install_root: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(install_root) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Order version names for display, newest first: semver where it parses,
/// natural ordering (digit runs compare numerically) otherwise.
pub fn sort_versions_for_display(versions: &mut [String]) {
    let chunker = regex::Regex::new(r"\d+|\D+").expect("static pattern");
    versions.sort_by(|a, b| {
        let a_clean = a.trim_start_matches('v');
        let b_clean = b.trim_start_matches('v');
        match (
            semver::Version::parse(a_clean),
            semver::Version::parse(b_clean),
        ) {
            (Ok(a_semver), Ok(b_semver)) => b_semver.cmp(&a_semver),
            _ => natural_key(&chunker, b_clean).cmp(&natural_key(&chunker, a_clean)),
        }
    });
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum NaturalPart {
    Num(u64),
    Text(String),
}

fn natural_key(chunker: &regex::Regex, s: &str) -> Vec<NaturalPart> {
    chunker
        .find_iter(s)
        .map(|m| match m.as_str().parse::<u64>() {
            Ok(n) => NaturalPart::Num(n),
            Err(_) => NaturalPart::Text(m.as_str().to_lowercase()),
        })
        .collect()
}
