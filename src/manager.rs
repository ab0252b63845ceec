use crate::cache::CacheStore;
use crate::config::{self, ToolSpec, Toolset};
use crate::errors::GhrmError;
use crate::history::{HistoryLedger, HistoryRecord, Operation, Outcome};
use crate::install;
use crate::platform::{self, PlatformInfo};
use crate::release::{ReleaseResolver, VersionConstraint};
use anyhow::Result;
use console::style;
use futures_util::{stream, StreamExt};
use std::path::PathBuf;
use std::time::Duration;

/// Bounded fan-out for multi-tool installs. Each worker touches its own
/// cache keys and install root; the cache store and ledger handle the
/// cross-worker sharing.
const INSTALL_WORKERS: usize = 4;

const HTTP_TIMEOUT_SECS: u64 = 300;

/// Per-repository result of one operation. One failing repository never
/// aborts the others; the CLI turns any failure into a non-zero exit.
#[derive(Debug)]
pub struct OperationReport {
    pub repo: String,
    pub result: Result<String, GhrmError>,
}

impl OperationReport {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

/// Composes resolver, installer, retention and ledger for the configured
/// toolset. The cache store and history ledger are passed in at
/// construction so tests can point them at scratch directories.
pub struct ToolManager {
    toolset: Toolset,
    config_path: PathBuf,
    cache: CacheStore,
    ledger: HistoryLedger,
    client: reqwest::Client,
    platform: PlatformInfo,
}

impl ToolManager {
    pub fn new(
        toolset: Toolset,
        config_path: PathBuf,
        cache: CacheStore,
        ledger: HistoryLedger,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            toolset,
            config_path,
            cache,
            ledger,
            client,
            platform: PlatformInfo::host(),
        })
    }

    #[cfg(test)]
    pub fn toolset(&self) -> &Toolset {
        &self.toolset
    }

    /// Install every configured tool, or just `filter` when given. Tools are
    /// processed with a small bounded fan-out; each result is collected and
    /// reported independently.
    pub async fn install(&self, filter: Option<&str>) -> Vec<OperationReport> {
        let specs: Vec<&ToolSpec> = match filter {
            Some(repo) => match self.toolset.find_tool(repo) {
                Some(spec) => vec![spec],
                None => {
                    return vec![OperationReport {
                        repo: repo.to_string(),
                        result: Err(GhrmError::InvalidConfiguration {
                            detail: format!("repository '{}' is not in the toolset", repo),
                        }),
                    }]
                }
            },
            None => self.toolset.tools.iter().collect(),
        };

        stream::iter(specs)
            .map(|spec| self.install_tool(spec))
            .buffer_unordered(INSTALL_WORKERS)
            .collect()
            .await
    }

    /// Resolve, download, extract, activate and (optionally) clean one tool,
    /// appending exactly one install/update history record for the attempt.
    async fn install_tool(&self, spec: &ToolSpec) -> OperationReport {
        let repo = spec.repo.clone();
        let constraint = VersionConstraint::from_spec(spec.version.as_deref());

        let result = self.try_install(spec, &constraint).await;

        let report = match result {
            Ok(outcome) => {
                let operation = match &outcome.previous {
                    Some(prev) if *prev != outcome.version => Operation::Update,
                    _ => Operation::Install,
                };
                let message = match (&outcome.previous, outcome.fresh_install) {
                    (Some(prev), _) if *prev != outcome.version => {
                        format!("updated {} -> {}", prev, outcome.version)
                    }
                    (Some(_), false) => format!("already up to date ({})", outcome.version),
                    _ => format!("installed {}", outcome.version),
                };
                self.ledger.append(
                    &HistoryRecord::new(&repo, operation, Outcome::Success, message.as_str())
                        .with_versions(outcome.previous.clone(), Some(outcome.version.clone())),
                );

                if self.toolset.options.auto_cleanup {
                    self.auto_clean(spec);
                }

                OperationReport {
                    repo,
                    result: Ok(message),
                }
            }
            Err(err) => {
                self.ledger.append(&HistoryRecord::new(
                    &repo,
                    Operation::Install,
                    Outcome::Failure,
                    err.to_string(),
                ));
                OperationReport {
                    repo,
                    result: Err(err),
                }
            }
        };
        report
    }

    async fn try_install(
        &self,
        spec: &ToolSpec,
        constraint: &VersionConstraint,
    ) -> Result<install::InstallOutcome, GhrmError> {
        let resolver = ReleaseResolver::new(
            &self.client,
            &self.cache,
            self.toolset.options.cache_expiry,
        );
        let release = resolver.resolve(&spec.repo, constraint).await?;

        let asset = platform::select_asset(&release.assets, &self.platform).ok_or_else(|| {
            GhrmError::NoMatchingAsset {
                repo: spec.repo.clone(),
                tag: release.tag.clone(),
                searched: platform::searched_tokens(&self.platform),
            }
        })?;

        let install_root = spec
            .install_root()
            .map_err(|err| GhrmError::InvalidConfiguration {
                detail: format!("install root for '{}': {}", spec.repo, err),
            })?;

        install::install(
            &self.client,
            &self.cache,
            &spec.repo,
            spec.tool_name(),
            &install_root,
            &release,
            asset,
        )
        .await
    }

    /// Retention pass after a successful install. Recorded in history only
    /// when it actually removed something.
    fn auto_clean(&self, spec: &ToolSpec) {
        let Ok(install_root) = spec.install_root() else {
            return;
        };
        match install::clean(&spec.repo, &install_root, self.toolset.options.keep_versions) {
            Ok(removed) if !removed.is_empty() => {
                self.ledger.append(&HistoryRecord::new(
                    &spec.repo,
                    Operation::Clean,
                    Outcome::Success,
                    format!("auto-cleanup removed {}", removed.join(", ")),
                ));
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("Auto-cleanup for {} failed: {}", spec.repo, err),
        }
    }

    /// Roll back one tool to the version installed before the active one.
    pub fn rollback(&self, repo: &str) -> OperationReport {
        let result = (|| {
            let spec = self
                .toolset
                .find_tool(repo)
                .ok_or_else(|| GhrmError::InvalidConfiguration {
                    detail: format!("repository '{}' is not in the toolset", repo),
                })?;
            let install_root =
                spec.install_root()
                    .map_err(|err| GhrmError::InvalidConfiguration {
                        detail: format!("install root for '{}': {}", repo, err),
                    })?;
            install::rollback(repo, &install_root)
        })();

        match result {
            Ok(outcome) => {
                let message = format!(
                    "rolled back {} -> {}",
                    outcome.from_version, outcome.to_version
                );
                self.ledger.append(
                    &HistoryRecord::new(repo, Operation::Rollback, Outcome::Success, message.as_str())
                        .with_versions(
                            Some(outcome.from_version.clone()),
                            Some(outcome.to_version.clone()),
                        ),
                );
                OperationReport {
                    repo: repo.to_string(),
                    result: Ok(message),
                }
            }
            Err(err) => {
                self.ledger.append(&HistoryRecord::new(
                    repo,
                    Operation::Rollback,
                    Outcome::Failure,
                    err.to_string(),
                ));
                OperationReport {
                    repo: repo.to_string(),
                    result: Err(err),
                }
            }
        }
    }

    /// Apply the keep-N retention policy to every configured tool.
    pub fn clean(&self) -> Vec<OperationReport> {
        let keep = self.toolset.options.keep_versions;
        self.toolset
            .tools
            .iter()
            .map(|spec| {
                let repo = spec.repo.clone();
                let result = spec
                    .install_root()
                    .map_err(|err| GhrmError::InvalidConfiguration {
                        detail: format!("install root for '{}': {}", repo, err),
                    })
                    .and_then(|root| install::clean(&repo, &root, keep));
                match result {
                    Ok(removed) => {
                        let message = if removed.is_empty() {
                            "nothing to remove".to_string()
                        } else {
                            format!("removed {}", removed.join(", "))
                        };
                        self.ledger.append(&HistoryRecord::new(
                            &repo,
                            Operation::Clean,
                            Outcome::Success,
                            message.as_str(),
                        ));
                        OperationReport {
                            repo,
                            result: Ok(message),
                        }
                    }
                    Err(err) => {
                        self.ledger.append(&HistoryRecord::new(
                            &repo,
                            Operation::Clean,
                            Outcome::Failure,
                            err.to_string(),
                        ));
                        OperationReport {
                            repo,
                            result: Err(err),
                        }
                    }
                }
            })
            .collect()
    }

    /// Print every configured tool with its installed/active versions and,
    /// best-effort, the latest upstream release.
    pub async fn list_tools(&self) {
        println!(
            "\n{}\n",
            style(format!("Tools in {}:", self.config_path.display())).cyan().bold()
        );

        if self.toolset.tools.is_empty() {
            println!("{}", style("No tools configured.").yellow());
            return;
        }

        let resolver = ReleaseResolver::new(
            &self.client,
            &self.cache,
            self.toolset.options.cache_expiry,
        );

        for spec in &self.toolset.tools {
            let install_root = match spec.install_root() {
                Ok(root) => root,
                Err(err) => {
                    println!(
                        "{} {}",
                        style(&spec.repo).bold(),
                        style(format!("[invalid install root: {}]", err)).red()
                    );
                    continue;
                }
            };

            let installed = install::list_installed(&spec.repo, &install_root);
            let active = install::active_version(&install_root);

            let status = if active.is_some() {
                style("[INSTALLED]").green()
            } else {
                style("[NOT INSTALLED]").yellow()
            };
            println!("{} {}", style(&spec.repo).bold(), status);
            println!(
                "  Constraint:     {}",
                spec.version.as_deref().unwrap_or("latest")
            );
            println!("  Install root:   {}", install_root.display());
            if let Some(active) = &active {
                println!("  Active version: {}", active);
            }
            if !installed.is_empty() {
                let mut names: Vec<String> =
                    installed.iter().map(|v| v.version.clone()).collect();
                install::sort_versions_for_display(&mut names);
                println!("  On disk:        {}", names.join(", "));
            }

            // Latest lookup is informational; failures do not disturb the
            // listing.
            let constraint = VersionConstraint::Latest;
            match resolver.resolve(&spec.repo, &constraint).await {
                Ok(release) => {
                    let latest = install::sanitize_version(&release.tag);
                    if active.as_deref() == Some(latest.as_str()) {
                        println!(
                            "  Latest release: {} {}",
                            latest,
                            style("(up to date)").green()
                        );
                    } else {
                        println!(
                            "  Latest release: {} {}",
                            latest,
                            style("(update available)").yellow()
                        );
                    }
                }
                Err(err) => {
                    tracing::debug!("Could not fetch latest for {}: {}", spec.repo, err);
                }
            }
            println!();
        }
    }

    /// Add a repository to the toolset, verifying upstream that it has at
    /// least one release, and optionally install it right away.
    pub async fn add_tool(
        &mut self,
        repo: &str,
        install_path: Option<PathBuf>,
        install_after: bool,
    ) -> Vec<OperationReport> {
        if self.toolset.find_tool(repo).is_some() {
            return vec![OperationReport {
                repo: repo.to_string(),
                result: Err(GhrmError::InvalidConfiguration {
                    detail: format!("repository '{}' is already in the toolset", repo),
                }),
            }];
        }

        let spec = ToolSpec {
            repo: repo.to_string(),
            version: None,
            install_path,
        };
        let mut candidate = self.toolset.clone();
        candidate.tools.push(spec);
        if let Err(err) = config::validate_toolset(&candidate) {
            return vec![OperationReport {
                repo: repo.to_string(),
                result: Err(err),
            }];
        }

        let resolver = ReleaseResolver::new(
            &self.client,
            &self.cache,
            self.toolset.options.cache_expiry,
        );
        let verified = resolver.resolve(repo, &VersionConstraint::Latest).await;
        let report = match verified {
            Ok(release) => {
                self.toolset = candidate;
                if let Err(err) = config::save_toolset(&self.toolset, &self.config_path) {
                    OperationReport {
                        repo: repo.to_string(),
                        result: Err(GhrmError::InvalidConfiguration {
                            detail: format!("saving toolset: {}", err),
                        }),
                    }
                } else {
                    let message = format!("added (latest release: {})", release.tag);
                    self.ledger.append(&HistoryRecord::new(
                        repo,
                        Operation::Add,
                        Outcome::Success,
                        message.as_str(),
                    ));
                    OperationReport {
                        repo: repo.to_string(),
                        result: Ok(message),
                    }
                }
            }
            Err(err) => {
                self.ledger.append(&HistoryRecord::new(
                    repo,
                    Operation::Add,
                    Outcome::Failure,
                    err.to_string(),
                ));
                OperationReport {
                    repo: repo.to_string(),
                    result: Err(err),
                }
            }
        };

        if report.failed() || !install_after {
            return vec![report];
        }

        let mut reports = vec![report];
        reports.extend(self.install(Some(repo)).await);
        reports
    }

    /// Remove a repository from the toolset. Installed files are kept unless
    /// `purge` is set.
    pub fn remove_tool(&mut self, repo: &str, purge: bool) -> OperationReport {
        let Some(index) = self.toolset.tools.iter().position(|t| t.repo == repo) else {
            return OperationReport {
                repo: repo.to_string(),
                result: Err(GhrmError::InvalidConfiguration {
                    detail: format!("repository '{}' is not in the toolset", repo),
                }),
            };
        };

        let spec = self.toolset.tools.remove(index);
        if let Err(err) = config::save_toolset(&self.toolset, &self.config_path) {
            // Keep the in-memory state consistent with the file we failed to
            // write.
            self.toolset.tools.insert(index, spec);
            let err = GhrmError::InvalidConfiguration {
                detail: format!("saving toolset: {}", err),
            };
            self.ledger.append(&HistoryRecord::new(
                repo,
                Operation::Remove,
                Outcome::Failure,
                err.to_string(),
            ));
            return OperationReport {
                repo: repo.to_string(),
                result: Err(err),
            };
        }

        let mut message = "removed from toolset (installed files kept)".to_string();
        if purge {
            match spec.install_root().map(|root| install::remove_all(&root)) {
                Ok(Ok(())) => message = "removed from toolset and disk".to_string(),
                Ok(Err(err)) => {
                    tracing::warn!("Failed to purge install root for {}: {}", repo, err)
                }
                Err(err) => tracing::warn!("No install root for {}: {}", repo, err),
            }
        }

        self.ledger.append(&HistoryRecord::new(
            repo,
            Operation::Remove,
            Outcome::Success,
            message.as_str(),
        ));
        OperationReport {
            repo: repo.to_string(),
            result: Ok(message),
        }
    }

    #[cfg(test)]
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryRecord> {
        self.ledger.list(None, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMode;
    use crate::config::GlobalOptions;
    use tempfile::TempDir;

    fn manager_with(tools: Vec<ToolSpec>, dir: &TempDir) -> ToolManager {
        let toolset = Toolset {
            tools,
            options: GlobalOptions::default(),
        };
        ToolManager::new(
            toolset,
            dir.path().join("toolset.yaml"),
            CacheStore::new(dir.path().join("cache"), CacheMode::Enabled),
            HistoryLedger::new(dir.path().join("history.jsonl")),
        )
        .unwrap()
    }

    fn tool_with_root(repo: &str, root: &std::path::Path) -> ToolSpec {
        ToolSpec {
            repo: repo.to_string(),
            version: None,
            install_path: Some(root.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn test_install_unknown_repo_is_config_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(vec![], &dir);
        let reports = manager.install(Some("owner/ghost")).await;
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].result,
            Err(GhrmError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_rollback_records_history_on_failure() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tool");
        let manager = manager_with(vec![tool_with_root("owner/tool", &root)], &dir);

        let report = manager.rollback("owner/tool");
        assert!(matches!(
            report.result,
            Err(GhrmError::NoPreviousVersion { .. })
        ));

        let records = manager.history(None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Rollback);
        assert_eq!(records[0].outcome, Outcome::Failure);
    }

    #[test]
    fn test_clean_reports_per_tool_and_logs_history() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tool");
        std::fs::create_dir_all(&root).unwrap();
        let manager = manager_with(vec![tool_with_root("owner/tool", &root)], &dir);

        let reports = manager.clean();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].failed());

        let records = manager.history(None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Clean);
    }

    #[test]
    fn test_remove_tool_updates_toolset() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tool");
        let mut manager = manager_with(vec![tool_with_root("owner/tool", &root)], &dir);

        let report = manager.remove_tool("owner/tool", false);
        assert!(!report.failed());
        assert!(manager.toolset().tools.is_empty());

        // Removing again reports a config error.
        let report = manager.remove_tool("owner/tool", false);
        assert!(report.failed());
    }
}
