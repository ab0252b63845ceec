use crate::release::AssetDescriptor;

/// Normalized host platform, used to score release asset names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

impl PlatformInfo {
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            os: std::env::consts::OS.to_string(),
            arch: arch.to_string(),
        }
    }
}

// Alias sets are interchangeable within a set: an asset naming any alias of
// the host OS/arch counts as naming the host OS/arch. Aliases are stored in
// normalized form (lowercase, separators collapsed to '-').
const OS_ALIAS_SETS: &[(&str, &[&str])] = &[
    (
        "linux",
        &["linux", "unknown-linux", "unknown-linux-gnu", "unknown-linux-musl"],
    ),
    ("macos", &["darwin", "apple-darwin", "macos", "osx"]),
    (
        "windows",
        &["windows", "pc-windows", "pc-windows-msvc", "win", "win64", "win32", "cygwin"],
    ),
];

const ARCH_ALIAS_SETS: &[(&str, &[&str])] = &[
    ("amd64", &["amd64", "x86-64", "x64"]),
    ("arm64", &["arm64", "aarch64"]),
    ("arm", &["arm", "armv7", "armv6"]),
];

const ARCHIVE_EXTS: &[&str] = &[".tar.gz", ".tgz", ".tar.xz", ".zip"];

// Checksum/signature/metadata sidecars that ride along with release binaries.
const SIDECAR_EXTS: &[&str] = &[
    ".sha256", ".sha512", ".sha1", ".asc", ".sig", ".pem", ".pub", ".sbom", ".zsync", ".md",
    ".txt", ".json", ".yaml", ".yml", ".xml", ".pom", ".whl",
];

pub fn is_archive(name: &str) -> bool {
    let lower = name.to_lowercase();
    ARCHIVE_EXTS.iter().any(|ext| lower.ends_with(ext))
}

fn is_sidecar(name: &str) -> bool {
    let lower = name.to_lowercase();
    SIDECAR_EXTS.iter().any(|ext| lower.ends_with(ext)) || lower.starts_with("checksums")
}

fn normalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Substring match with token boundaries, so "win" does not match inside
/// "darwin" and "arm" does not match inside "arm64".
fn has_token(haystack: &str, alias: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(alias) {
        let begin = start + pos;
        let end = begin + alias.len();
        let left_ok = begin == 0 || bytes[begin - 1] == b'-';
        let right_ok = end == haystack.len() || bytes[end] == b'-';
        if left_ok && right_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

fn set_matches(name: &str, set_key: &str, sets: &[(&str, &[&str])]) -> bool {
    sets.iter()
        .find(|(key, _)| *key == set_key)
        .map(|(_, aliases)| aliases.iter().any(|alias| has_token(name, alias)))
        .unwrap_or_else(|| has_token(name, &normalize(set_key)))
}

fn any_set_matches(name: &str, sets: &[(&str, &[&str])]) -> bool {
    sets.iter()
        .any(|(_, aliases)| aliases.iter().any(|alias| has_token(name, alias)))
}

/// Pick the release asset for this platform.
///
/// An asset is a candidate when its name carries a host-OS token and either a
/// host-arch token or no arch token at all; assets naming a different arch
/// are out. Among candidates, archives beat raw binaries, then the most
/// matched token sets win (OS + arch beats OS alone), then release asset
/// order breaks ties. Returns `None` when nothing fits — the caller turns
/// that into a `NoMatchingAsset` failure.
pub fn select_asset<'a>(
    assets: &'a [AssetDescriptor],
    platform: &PlatformInfo,
) -> Option<&'a AssetDescriptor> {
    let mut best: Option<(&AssetDescriptor, bool, u32)> = None;

    for asset in assets {
        if is_sidecar(&asset.name) {
            continue;
        }
        let name = normalize(&asset.name);

        if !set_matches(&name, &platform.os, OS_ALIAS_SETS) {
            continue;
        }
        // A concrete foreign arch in the name disqualifies; an arch-less
        // name stays in as a less specific match.
        let arch_hit = set_matches(&name, &platform.arch, ARCH_ALIAS_SETS);
        if !arch_hit && any_set_matches(&name, ARCH_ALIAS_SETS) {
            continue;
        }

        let archive = is_archive(&asset.name);
        let score = 1 + u32::from(arch_hit);

        let better = match best {
            None => true,
            Some((_, best_archive, best_score)) => {
                (archive, score) > (best_archive, best_score)
            }
        };
        if better {
            best = Some((asset, archive, score));
        }
    }

    best.map(|(asset, _, _)| asset)
}

/// The alias tokens `select_asset` searched for, for error reporting.
pub fn searched_tokens(platform: &PlatformInfo) -> String {
    let os_aliases = OS_ALIAS_SETS
        .iter()
        .find(|(key, _)| *key == platform.os)
        .map(|(_, aliases)| aliases.join("/"))
        .unwrap_or_else(|| platform.os.clone());
    let arch_aliases = ARCH_ALIAS_SETS
        .iter()
        .find(|(key, _)| *key == platform.arch)
        .map(|(_, aliases)| aliases.join("/"))
        .unwrap_or_else(|| platform.arch.clone());
    format!("os [{}], arch [{}]", os_aliases, arch_aliases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> AssetDescriptor {
        AssetDescriptor {
            name: name.to_string(),
            download_url: format!("https://example.invalid/{name}"),
            size: Some(1024),
        }
    }

    fn linux_amd64() -> PlatformInfo {
        PlatformInfo {
            os: "linux".into(),
            arch: "amd64".into(),
        }
    }

    #[test]
    fn test_picks_matching_os_and_arch() {
        let assets = vec![
            asset("tool_2.1.0_windows_amd64.zip"),
            asset("tool_2.1.0_darwin_arm64.tar.gz"),
            asset("tool_2.1.0_linux_amd64.tar.gz"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool_2.1.0_linux_amd64.tar.gz");
    }

    #[test]
    fn test_no_match_when_only_foreign_platforms() {
        let assets = vec![
            asset("tool-windows-amd64.zip"),
            asset("tool-darwin-arm64.tar.gz"),
        ];
        assert!(select_asset(&assets, &linux_amd64()).is_none());
    }

    #[test]
    fn test_alias_sets_are_interchangeable() {
        let assets = vec![asset("tool-x86_64-unknown-linux-gnu.tar.gz")];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-x86_64-unknown-linux-gnu.tar.gz");
    }

    #[test]
    fn test_archive_beats_raw_binary() {
        let assets = vec![
            asset("tool-linux-amd64"),
            asset("tool-linux.tar.gz"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-linux.tar.gz");
    }

    #[test]
    fn test_more_matched_tokens_wins_among_archives() {
        let assets = vec![
            asset("tool-linux.tar.gz"),
            asset("tool-linux-amd64.tar.gz"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-linux-amd64.tar.gz");
    }

    #[test]
    fn test_tie_broken_by_asset_order() {
        let assets = vec![
            asset("tool-linux-amd64.tar.gz"),
            asset("tool-linux-x86_64.tar.gz"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-linux-amd64.tar.gz");
    }

    #[test]
    fn test_sidecars_excluded() {
        let assets = vec![
            asset("tool-linux-amd64.tar.gz.sha256"),
            asset("checksums.txt"),
            asset("tool-linux-amd64.tar.gz"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-linux-amd64.tar.gz");
    }

    #[test]
    fn test_darwin_does_not_match_windows_via_win_substring() {
        let windows = PlatformInfo {
            os: "windows".into(),
            arch: "amd64".into(),
        };
        let assets = vec![asset("tool-darwin-amd64.tar.gz")];
        assert!(select_asset(&assets, &windows).is_none());
    }

    #[test]
    fn test_foreign_arch_disqualifies() {
        let assets = vec![asset("tool-linux-arm64.tar.gz")];
        assert!(select_asset(&assets, &linux_amd64()).is_none());
    }

    #[test]
    fn test_arm_does_not_match_inside_arm64() {
        let arm = PlatformInfo {
            os: "linux".into(),
            arch: "arm".into(),
        };
        let assets = vec![asset("tool-linux-arm64.tar.gz")];
        assert!(select_asset(&assets, &arm).is_none());
    }

    #[test]
    fn test_raw_binary_accepted_when_no_archive_fits() {
        let assets = vec![
            asset("tool-windows-amd64.zip"),
            asset("tool-linux-amd64"),
        ];
        let picked = select_asset(&assets, &linux_amd64()).unwrap();
        assert_eq!(picked.name, "tool-linux-amd64");
    }

    #[test]
    fn test_host_platform_is_populated() {
        let info = PlatformInfo::host();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
    }
}
