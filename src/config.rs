use crate::errors::GhrmError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "ghrm";
pub const CONFIG_FILE_NAME: &str = "toolset.yaml";
pub const HISTORY_FILE_NAME: &str = "history.jsonl";

pub const DEFAULT_KEEP_VERSIONS: u32 = 2;
pub const DEFAULT_CACHE_EXPIRY_SECS: u64 = 3600;

/// Desired state for one managed tool, as configured in `toolset.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    /// Repository in `owner/name` form; unique within the toolset.
    pub repo: String,
    /// Explicit tag to pin, or absent for "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Overrides the default per-tool install root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
}

impl ToolSpec {
    /// The short tool name (repository name without the owner).
    pub fn tool_name(&self) -> &str {
        self.repo.rsplit('/').next().unwrap_or(&self.repo)
    }

    /// Where this tool's versioned directories and `current` link live.
    pub fn install_root(&self) -> Result<PathBuf> {
        match &self.install_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_tools_dir()?.join(self.tool_name())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GlobalOptions {
    #[serde(default = "default_keep_versions")]
    pub keep_versions: u32,
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// TTL for "latest" release lookups, in seconds.
    #[serde(default = "default_cache_expiry")]
    pub cache_expiry: u64,
}

fn default_keep_versions() -> u32 {
    DEFAULT_KEEP_VERSIONS
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_expiry() -> u64 {
    DEFAULT_CACHE_EXPIRY_SECS
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            keep_versions: default_keep_versions(),
            auto_cleanup: false,
            cache_enabled: default_cache_enabled(),
            cache_expiry: default_cache_expiry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct Toolset {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub options: GlobalOptions,
}

impl Toolset {
    pub fn find_tool(&self, repo: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.repo == repo)
    }
}

pub fn get_user_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GHRM_CONFIG_DIR") {
        let path = PathBuf::from(dir);
        fs::create_dir_all(&path)?;
        return Ok(path);
    }
    let path = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join(APP_NAME);
    fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn get_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GHRM_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    Ok(dirs::cache_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
        .join(APP_NAME))
}

pub fn get_tools_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GHRM_DATA_DIR") {
        return Ok(PathBuf::from(dir).join("tools"));
    }
    Ok(dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
        .join(APP_NAME)
        .join("tools"))
}

pub fn get_history_file_path() -> Result<PathBuf> {
    Ok(get_user_config_dir()?.join(HISTORY_FILE_NAME))
}

/// Locate the toolset file: explicit path, then CWD, then the user config
/// directory, then the system-wide location. Returns the first that exists,
/// falling back to the explicit/user path so the caller reports a sensible
/// missing-file error.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var("GHRM_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    let cwd_config = std::env::current_dir()?.join(CONFIG_FILE_NAME);
    if cwd_config.is_file() {
        return Ok(cwd_config);
    }

    let user_config = get_user_config_dir()?.join(CONFIG_FILE_NAME);
    if user_config.is_file() {
        return Ok(user_config);
    }

    let system_config = PathBuf::from("/etc").join(APP_NAME).join(CONFIG_FILE_NAME);
    if system_config.is_file() {
        return Ok(system_config);
    }

    Ok(user_config)
}

pub fn load_toolset(config_path: &Path) -> Result<Toolset> {
    let content = fs::read_to_string(config_path).with_context(|| {
        format!(
            "Could not read config file at {} (run 'ghrm init' to create one)",
            config_path.display()
        )
    })?;

    let toolset: Toolset = serde_yaml::from_str(&content)
        .with_context(|| format!("Could not parse {} as YAML", config_path.display()))?;

    validate_toolset(&toolset)?;
    Ok(toolset)
}

pub fn save_toolset(toolset: &Toolset, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_yaml::to_string(toolset)?;
    fs::write(config_path, content)?;
    Ok(())
}

/// Write a default `toolset.yaml`, refusing to clobber an existing one.
pub fn create_default_config(config_path: &Path) -> Result<()> {
    if config_path.is_file() {
        anyhow::bail!("Config file already exists at {}", config_path.display());
    }
    save_toolset(&Toolset::default(), config_path)
}

/// Reject configurations the rest of the system must never see: a zero
/// retention count, malformed repository identifiers, or duplicate entries.
pub fn validate_toolset(toolset: &Toolset) -> Result<(), GhrmError> {
    if toolset.options.keep_versions < 1 {
        return Err(GhrmError::InvalidConfiguration {
            detail: "keep_versions must be at least 1".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for tool in &toolset.tools {
        let parts: Vec<&str> = tool.repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(GhrmError::InvalidConfiguration {
                detail: format!("invalid repository '{}': expected owner/name", tool.repo),
            });
        }
        if !seen.insert(tool.repo.as_str()) {
            return Err(GhrmError::InvalidConfiguration {
                detail: format!("repository '{}' is listed more than once", tool.repo),
            });
        }
        if let Some(version) = &tool.version {
            if version.is_empty() {
                return Err(GhrmError::InvalidConfiguration {
                    detail: format!("empty version for '{}'; omit the field for latest", tool.repo),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(repo: &str) -> ToolSpec {
        ToolSpec {
            repo: repo.to_string(),
            version: None,
            install_path: None,
        }
    }

    #[test]
    fn test_defaults() {
        let toolset: Toolset = serde_yaml::from_str("tools: []").unwrap();
        assert_eq!(toolset.options.keep_versions, 2);
        assert!(!toolset.options.auto_cleanup);
        assert!(toolset.options.cache_enabled);
        assert_eq!(toolset.options.cache_expiry, 3600);
    }

    #[test]
    fn test_keep_versions_zero_rejected() {
        let toolset: Toolset =
            serde_yaml::from_str("tools: []\noptions:\n  keep_versions: 0\n").unwrap();
        let err = validate_toolset(&toolset).unwrap_err();
        assert!(matches!(err, GhrmError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_unknown_fields_rejected_at_parse() {
        let result: Result<Toolset, _> =
            serde_yaml::from_str("tools: []\noptions:\n  keep_forever: true\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_repo_rejected() {
        let toolset = Toolset {
            tools: vec![spec("owner/tool"), spec("owner/tool")],
            options: GlobalOptions::default(),
        };
        assert!(validate_toolset(&toolset).is_err());
    }

    #[test]
    fn test_malformed_repo_rejected() {
        for bad in ["tool", "owner/", "/tool", "a/b/c"] {
            let toolset = Toolset {
                tools: vec![spec(bad)],
                options: GlobalOptions::default(),
            };
            assert!(validate_toolset(&toolset).is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_tool_name_strips_owner() {
        assert_eq!(spec("derailed/k9s").tool_name(), "k9s");
    }

    #[test]
    fn test_roundtrip_preserves_pinned_version() {
        let toolset = Toolset {
            tools: vec![ToolSpec {
                repo: "owner/tool".into(),
                version: Some("v1.2.3".into()),
                install_path: Some(PathBuf::from("/opt/tool")),
            }],
            options: GlobalOptions::default(),
        };
        let yaml = serde_yaml::to_string(&toolset).unwrap();
        let parsed: Toolset = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, toolset);
    }
}
