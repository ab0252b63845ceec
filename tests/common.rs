use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

// Test helper types shared by the integration and e2e suites. Some methods
// are only exercised with the "e2e" feature enabled; the warnings are
// suppressed to keep CI clean while keeping the API available.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_path: PathBuf,
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        let config_path = config_dir.join("toolset.yaml");
        let cache_dir = temp_dir.path().join("cache");
        let data_dir = temp_dir.path().join("data");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_ghrm"));

        Self {
            _temp_dir: temp_dir,
            config_path,
            config_dir,
            cache_dir,
            data_dir,
            bin_path,
        }
    }

    /// A command with its config, cache, data and history roots isolated to
    /// this context's temp directory.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("GHRM_CONFIG", &self.config_path);
        cmd.env("GHRM_CONFIG_DIR", &self.config_dir);
        cmd.env("GHRM_CACHE_DIR", &self.cache_dir);
        cmd.env("GHRM_DATA_DIR", &self.data_dir);
        cmd.env("HOME", self._temp_dir.path());
        cmd
    }

    pub fn write_toolset(&self, yaml: &str) {
        fs::write(&self.config_path, yaml).expect("Failed to write toolset");
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        if self.status.success() {
            panic!(
                "Command unexpectedly succeeded\nstdout: {}\nstderr: {}",
                self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
