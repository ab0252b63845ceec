use crate::cache::CacheStore;
use crate::errors::GhrmError;
use crate::release::AssetDescriptor;
use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::Archive;
use walkdir::WalkDir;

/// Downloaded assets are immutable for a given URL; the TTL only bounds how
/// long a stale or corrupted entry can linger.
pub const ASSET_TTL_SECS: u64 = 30 * 24 * 3600;

pub fn asset_cache_key(url: &str) -> String {
    format!("asset:{}", hex::encode(Sha256::digest(url.as_bytes())))
}

/// A cached download is only trusted when non-empty and, when the release
/// metadata declares a size, exactly that size.
fn cached_size_ok(path: &Path, expected: Option<u64>) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => expected.map_or(true, |e| e == meta.len()),
        _ => false,
    }
}

/// Materialize the asset into `dest_dir`, from the asset cache when possible.
/// A truncated cache entry is invalidated and re-downloaded; a fresh download
/// is verified against the declared size before being cached.
pub async fn fetch_asset(
    client: &reqwest::Client,
    cache: &CacheStore,
    repo: &str,
    asset: &AssetDescriptor,
    dest_dir: &Path,
) -> Result<PathBuf, GhrmError> {
    let key = asset_cache_key(&asset.download_url);
    let dest = dest_dir.join(&asset.name);

    if let Some(cached) = cache.get_file(&key) {
        if cached_size_ok(&cached, asset.size) {
            tracing::info!("Using cached download for {}", asset.name);
            fs::copy(&cached, &dest).map_err(|err| GhrmError::DownloadFailed {
                repo: repo.to_string(),
                detail: format!("copying cached asset: {}", err),
            })?;
            return Ok(dest);
        }
        tracing::warn!(
            "Cached download for {} is empty or truncated; fetching again",
            asset.name
        );
        cache.invalidate(&key);
    }

    download_file(client, &asset.download_url, &dest)
        .await
        .map_err(|err| GhrmError::DownloadFailed {
            repo: repo.to_string(),
            detail: err.to_string(),
        })?;

    if let Some(expected) = asset.size {
        let actual = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        if actual != expected {
            return Err(GhrmError::DownloadFailed {
                repo: repo.to_string(),
                detail: format!(
                    "downloaded {} bytes for {}, release metadata says {}",
                    actual, asset.name, expected
                ),
            });
        }
    }

    cache.put_file(&key, &dest, ASSET_TTL_SECS);
    Ok(dest)
}

async fn download_file(client: &reqwest::Client, url: &str, local_path: &Path) -> Result<()> {
    let filename = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    tracing::info!("Downloading {}...", filename);

    let response = client.get(url).send().await?.error_for_status()?;
    let total_size = response.content_length().unwrap_or(0);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-")
    );
    pb.set_message(format!("Downloading {}", filename));

    let mut file = fs::File::create(local_path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    pb.finish_with_message("Download complete");
    Ok(())
}

/// Extract a recognized archive into `extract_dir`. Unrecognized formats are
/// an error; the installer falls back to treating the asset as a raw binary.
pub fn extract_archive(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    tracing::info!("Extracting {}...", name);

    if name.ends_with(".zip") {
        extract_zip(archive_path, extract_dir)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, extract_dir)
    } else if name.ends_with(".tar.xz") {
        extract_tar_xz(archive_path, extract_dir)
    } else {
        Err(anyhow!("Unsupported archive format: {}", name))
    }
}

fn extract_zip(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let outpath = extract_dir.join(file.name());

        // Path traversal guard
        if !outpath.starts_with(extract_dir) {
            tracing::warn!("Skipping malicious path in zip: {}", file.name());
            continue;
        }

        if file.name().ends_with('/') {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = fs::File::create(&outpath)?;
            io::copy(&mut file, &mut outfile)?;
        }
    }

    Ok(())
}

fn extract_tar_gz(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);
    archive.unpack(extract_dir)?;
    Ok(())
}

fn extract_tar_xz(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let decoder = xz2::read::XzDecoder::new(file);
    let mut archive = Archive::new(decoder);
    archive.unpack(extract_dir)?;
    Ok(())
}

/// Locate the tool's executable inside an extracted tree: exact name match
/// beats a fuzzy one, `bin/` placement earns a bonus, deep nesting is
/// penalized.
pub fn find_executable_in(extract_dir: &Path, tool_name: &str) -> Option<PathBuf> {
    let tool_name_lower = tool_name.to_lowercase();
    let mut candidates = Vec::new();

    for entry in WalkDir::new(extract_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || is_library(path) {
            continue;
        }
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        let file_stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut score = 10i32;
        if path.components().any(|c| c.as_os_str() == "bin") {
            score += 20;
        }
        if file_name == tool_name_lower || file_stem == tool_name_lower {
            score += 100;
        } else if file_name.contains(&tool_name_lower) {
            score += 30;
        }
        let depth = path
            .strip_prefix(extract_dir)
            .ok()
            .map_or(0, |p| p.components().count());
        score -= (depth as i32) * 5;

        candidates.push((score, path.to_path_buf()));
    }

    candidates.sort_by_key(|(score, _)| -(*score));

    if let Some((score, path)) = candidates.first() {
        tracing::debug!(
            "Executable candidate: {} (score {})",
            path.display(),
            score
        );
    }

    candidates.into_iter().map(|(_, path)| path).next()
}

fn is_library(filepath: &Path) -> bool {
    let ext = filepath
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(ext.as_str(), "dll" | "so" | "dylib" | "a" | "lib")
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
