use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

/// Create the install root if needed and prove it is writable by creating
/// and removing a probe file. Surfaces `PermissionDenied` I/O errors so the
/// installer can report a privilege shortfall before any download happens.
pub fn ensure_writable_root(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root)?;
    let probe = root.join(format!(".ghrm-write-probe.{}", std::process::id()));
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// Whether passwordless sudo is available right now. `-n` never prompts, so
/// this returns quickly either way. Used only to improve the guidance in
/// permission errors; elevation itself is out of scope.
pub fn sudo_available() -> bool {
    Command::new("sudo")
        .arg("-n")
        .arg("true")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writable_root_accepts_tempdir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tools").join("k9s");
        ensure_writable_root(&root).unwrap();
        assert!(root.is_dir());
        // The probe file does not linger.
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_root_is_reported() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = ensure_writable_root(&locked.join("tool"));
        // Restore permissions so TempDir cleanup succeeds.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root bypasses mode bits; only assert the failure for
        // unprivileged users.
        if !is_effectively_root() {
            assert!(result.is_err());
        }
    }

    #[cfg(unix)]
    fn is_effectively_root() -> bool {
        Command::new("id")
            .arg("-u")
            .output()
            .ok()
            .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "0")
            .unwrap_or(false)
    }
}
