//! VFS mount table
//!
//! Maps logical device names (`dev_hdd0`, `dev_bdvd`, ...) to host paths.
//! Boot overwrites entries in place; nothing is unmounted individually.

use crate::error::VfsError;
use oc_core::EMULATOR_DIR_TOKEN;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Well-known device names
pub mod devices {
    pub const DEV_HDD0: &str = "dev_hdd0";
    pub const DEV_HDD1: &str = "dev_hdd1";
    pub const DEV_FLASH: &str = "dev_flash";
    pub const DEV_USB: &str = "dev_usb";
    pub const DEV_USB000: &str = "dev_usb000";
    pub const DEV_BDVD: &str = "dev_bdvd";
    pub const APP_HOME: &str = "app_home";
    /// Backed by the native filesystem root
    pub const HOST_ROOT: &str = "host_root";
}

/// Replace every `$(EmulatorDir)` in `path` with `emulator_dir`
pub fn substitute_emulator_dir(path: &str, emulator_dir: &str) -> String {
    path.replace(EMULATOR_DIR_TOKEN, emulator_dir)
}

fn device_name(device: &str) -> &str {
    device.trim_matches('/')
}

/// Logical device to host path mapping
#[derive(Debug, Default)]
pub struct MountTable {
    mounts: RwLock<BTreeMap<String, String>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `device` at `host_path`, replacing any previous mapping
    ///
    /// An empty `host_path` maps the device onto the native root.
    pub fn mount(&self, device: &str, host_path: impl Into<String>) {
        let host_path = host_path.into();
        tracing::debug!("Mounted /{}/ -> '{}'", device_name(device), host_path);
        self.mounts
            .write()
            .insert(device_name(device).to_string(), host_path);
    }

    /// Host path backing `device` (`"dev_bdvd"` and `"/dev_bdvd/"` are equivalent)
    pub fn get(&self, device: &str) -> Result<String, VfsError> {
        let name = device_name(device);
        self.mounts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VfsError::NotMounted(name.to_string()))
    }

    pub fn is_mounted(&self, device: &str) -> bool {
        self.mounts.read().contains_key(device_name(device))
    }

    /// Translate a guest path into a host path
    ///
    /// Accepts `/device/rest` and `device:rest`.
    pub fn resolve(&self, guest_path: &str) -> Result<String, VfsError> {
        let (device, rest) = if let Some(stripped) = guest_path.strip_prefix('/') {
            stripped.split_once('/').unwrap_or((stripped, ""))
        } else if let Some(split) = guest_path.split_once(':') {
            split
        } else {
            return Err(VfsError::InvalidPath(guest_path.to_string()));
        };

        let base = self.get(device)?;
        let rest = rest.trim_start_matches('/');

        Ok(if base.is_empty() {
            format!("/{rest}")
        } else if base.ends_with('/') || base.ends_with('\\') {
            format!("{base}{rest}")
        } else {
            format!("{base}/{rest}")
        })
    }

    /// Snapshot of every mapping, sorted by device name
    pub fn entries(&self) -> Vec<(String, String)> {
        self.mounts
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove every mapping
    pub fn clear(&self) {
        self.mounts.write().clear();
    }
}
