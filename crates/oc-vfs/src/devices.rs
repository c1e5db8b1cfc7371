//! Device root resolution and the default directory scaffold
//!
//! Handles /dev_hdd0 (internal HDD), /dev_hdd1 (cache HDD), /dev_flash and
//! /dev_usb000 as configured in `[vfs]`.

use crate::mount::substitute_emulator_dir;
use oc_core::config::VfsConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Default user profile created on first run
pub const DEFAULT_USER_ID: &str = "00000001";

/// Name written to a freshly created profile
pub const DEFAULT_USER_NAME: &str = "User";

/// Emulator root: the configured directory, or `config_dir` when empty
///
/// Always ends with a separator so `$(EmulatorDir)dev_hdd0/` concatenates.
pub fn emulator_dir(vfs: &VfsConfig, config_dir: &Path) -> String {
    let dir = if vfs.emulator_dir.is_empty() {
        config_dir.to_string_lossy().into_owned()
    } else {
        vfs.emulator_dir.clone()
    };

    if dir.ends_with('/') || dir.ends_with('\\') {
        dir
    } else {
        format!("{dir}/")
    }
}

/// Host roots of the fixed writable devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRoots {
    pub dev_hdd0: String,
    pub dev_hdd1: String,
    pub dev_flash: String,
    pub dev_usb000: String,
}

impl DeviceRoots {
    /// Resolve every device path against the emulator root
    pub fn resolve(vfs: &VfsConfig, config_dir: &Path) -> Self {
        let root = emulator_dir(vfs, config_dir);
        Self {
            dev_hdd0: substitute_emulator_dir(&vfs.dev_hdd0, &root),
            dev_hdd1: substitute_emulator_dir(&vfs.dev_hdd1, &root),
            dev_flash: substitute_emulator_dir(&vfs.dev_flash, &root),
            dev_usb000: substitute_emulator_dir(&vfs.dev_usb000, &root),
        }
    }

    /// Installed game directory on the internal HDD
    pub fn game_dir(&self) -> String {
        format!("{}game/", self.dev_hdd0)
    }

    /// External firmware library directory
    pub fn lib_dir(&self) -> String {
        format!("{}sys/external/", self.dev_flash)
    }

    /// Create the default directory layout; existing entries are kept
    pub fn create_scaffold(&self) -> std::io::Result<()> {
        let hdd0 = Path::new(&self.dev_hdd0);
        let home = hdd0.join("home").join(DEFAULT_USER_ID);

        let dirs = [
            hdd0.join("game/TEST12345/USRDIR"),
            home.join("exdata"),
            home.join("savedata"),
            home.join("trophy"),
            Path::new(&self.dev_hdd1).join("cache"),
            Path::new(&self.dev_hdd1).join("game"),
            Path::new(&self.dev_usb000).to_path_buf(),
        ];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::debug!("Created directory: {:?}", dir);
            }
        }

        // Only written when missing so a renamed profile survives
        let username = home.join("localusername");
        match OpenOptions::new().write(true).create_new(true).open(&username) {
            Ok(mut file) => file.write_all(DEFAULT_USER_NAME.as_bytes())?,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulator_dir_fallback() {
        let vfs = VfsConfig::default();
        assert_eq!(emulator_dir(&vfs, Path::new("/home/u/.config/oc")), "/home/u/.config/oc/");

        let vfs = VfsConfig {
            emulator_dir: "/data/".to_string(),
            ..VfsConfig::default()
        };
        assert_eq!(emulator_dir(&vfs, Path::new("/ignored")), "/data/");
    }

    #[test]
    fn test_resolve_roots() {
        let vfs = VfsConfig {
            emulator_dir: "/data/".to_string(),
            dev_flash: "/firmware/flash/".to_string(),
            ..VfsConfig::default()
        };
        let roots = DeviceRoots::resolve(&vfs, Path::new("/cfg"));

        assert_eq!(roots.dev_hdd0, "/data/dev_hdd0/");
        assert_eq!(roots.dev_flash, "/firmware/flash/");
        assert_eq!(roots.game_dir(), "/data/dev_hdd0/game/");
        assert_eq!(roots.lib_dir(), "/firmware/flash/sys/external/");
    }

    #[test]
    fn test_scaffold() {
        let temp = tempfile::tempdir().unwrap();
        let roots = DeviceRoots::resolve(&VfsConfig::default(), temp.path());
        roots.create_scaffold().unwrap();

        let hdd0 = temp.path().join("dev_hdd0");
        assert!(hdd0.join("game/TEST12345/USRDIR").is_dir());
        assert!(hdd0.join("home/00000001/savedata").is_dir());
        assert!(hdd0.join("home/00000001/trophy").is_dir());
        assert!(hdd0.join("home/00000001/exdata").is_dir());
        assert!(temp.path().join("dev_hdd1/cache").is_dir());
        assert!(temp.path().join("dev_usb000").is_dir());

        let username = hdd0.join("home/00000001/localusername");
        assert_eq!(std::fs::read_to_string(&username).unwrap(), "User");

        std::fs::write(&username, "Renamed").unwrap();
        roots.create_scaffold().unwrap();
        assert_eq!(std::fs::read_to_string(&username).unwrap(), "Renamed");
    }
}
