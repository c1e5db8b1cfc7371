//! Boot pipeline
//!
//! Path → metadata → configuration layers → device mounts → SELF unwrap →
//! classification → architecture loader. Every step returns a
//! [`BootError`]; [`Session::load`] is the only place that handles one.

use crate::services::MachineKind;
use crate::session::Session;
use crate::status::Status;
use oc_core::{Config, ConfigError, EmulatorError, LoaderError};
use oc_loader::{
    is_self, BinarySource, ClassifyError, Classifier, DecryptedCache, ExecutableFormat, SourceTimes,
};
use oc_vfs::ps3_devices as dev;
use oc_vfs::{emulator_dir, substitute_emulator_dir, MountTable};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Per-title override file name
pub const CONFIG_LAYER: &str = "config.toml";

/// Disc signature probed two levels above the executable
const DISC_SIGNATURE: &str = "PS3_DISC.SFB";

/// Directory pair of a disc executable (`PS3_GAME/USRDIR`)
const DISC_GAME_DIR: &str = "PS3_GAME";
const DISC_USR_DIR: &str = "USRDIR";

/// Length of the SHA-1 prefix in cache directory names
const CACHE_HASH_LEN: usize = 12;

/// Why a boot was abandoned
#[derive(Error, Debug)]
pub enum BootError {
    #[error("No executable path set")]
    NoPath,

    #[error("Failed to open file: {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to apply custom config {path:?}: {source}")]
    Config { path: PathBuf, source: ConfigError },

    #[error("Failed to decrypt SELF: {path}: {source}")]
    Decrypt { path: String, source: LoaderError },

    #[error("Invalid or unsupported file format: {path}")]
    Unrecognized { path: String, source: ClassifyError },

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootError {
    /// Log the failure once, with per-format detail for unknown executables
    pub fn report(&self) {
        match self {
            BootError::Unrecognized { source, .. } => {
                error!("{}", self);
                for (format, reason) in &source.rejections {
                    warn!("** {:<8} -> {}", format.to_string(), reason);
                }
            }
            _ => error!(fatal = true, "{}", self),
        }
    }
}

/// Per-title scratch directory: `<config_dir>/data/<serial>/<file>-<hash>/`
pub fn cache_dir(config_dir: &Path, title_id: &str, path: &str) -> PathBuf {
    let serial = if title_id.is_empty() { "unknown" } else { title_id };
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hash = hex::encode(Sha1::digest(path.as_bytes()));

    config_dir
        .join("data")
        .join(serial)
        .join(format!("{}-{}", name, &hash[..CACHE_HASH_LEN]))
}

/// Override layers in application order; later layers win
pub fn config_layers(cache_dir: &Path, config_dir: &Path, title_id: &str, path: &str) -> Vec<PathBuf> {
    let mut layers = vec![cache_dir.join(CONFIG_LAYER)];
    if !title_id.is_empty() {
        layers.push(config_dir.join("data").join(title_id).join(CONFIG_LAYER));
    }
    layers.push(PathBuf::from(format!("{path}.toml")));
    layers
}

/// Disc root for an executable in `elf_dir`, if a disc signature is present
pub fn detect_disc_root(elf_dir: &str) -> Option<String> {
    let signature = format!("{elf_dir}/../../{DISC_SIGNATURE}");
    if !Path::new(&signature).is_file() {
        return None;
    }

    let parts: Vec<&str> = elf_dir.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
    let on_disc_layout = matches!(parts.as_slice(), [.., game, usr] if *game == DISC_GAME_DIR && *usr == DISC_USR_DIR);

    let suffix = DISC_GAME_DIR.len() + 1 + DISC_USR_DIR.len();
    match elf_dir.get(..elf_dir.len().saturating_sub(suffix)) {
        Some(root) if on_disc_layout => Some(root.to_string()),
        _ => Some(format!("{elf_dir}/../../")),
    }
}

/// Mount every device for an executable living in `elf_dir`
pub fn mount_devices(mounts: &MountTable, config: &Config, config_dir: &Path, elf_dir: &str) {
    let vfs = &config.vfs;
    let root = emulator_dir(vfs, config_dir);
    let resolve = |path: &str| substitute_emulator_dir(path, &root);

    mounts.mount(dev::DEV_HDD0, resolve(&vfs.dev_hdd0));
    mounts.mount(dev::DEV_HDD1, resolve(&vfs.dev_hdd1));
    mounts.mount(dev::DEV_FLASH, resolve(&vfs.dev_flash));
    mounts.mount(dev::DEV_USB, resolve(&vfs.dev_usb000));
    mounts.mount(dev::DEV_USB000, resolve(&vfs.dev_usb000));

    if vfs.app_home.is_empty() {
        mounts.mount(dev::APP_HOME, format!("{elf_dir}/"));
    } else {
        mounts.mount(dev::APP_HOME, resolve(&vfs.app_home));
    }

    if !vfs.dev_bdvd.is_empty() {
        mounts.mount(dev::DEV_BDVD, resolve(&vfs.dev_bdvd));
    } else if let Some(disc) = detect_disc_root(elf_dir) {
        mounts.mount(dev::DEV_BDVD, disc.as_str());
        info!("Disc: {}", disc);
    }

    if vfs.allow_host_root {
        mounts.mount(dev::HOST_ROOT, "");
    }
}

fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Session {
    /// Boot the executable set by [`Session::set_path`]
    pub(crate) fn boot(&self) -> Result<(), BootError> {
        let path = self.path();
        if path.is_empty() {
            return Err(BootError::NoPath);
        }

        let file = File::open(&path).map_err(|source| BootError::Open {
            path: path.clone(),
            source,
        })?;
        info!("Path: {}", path);

        let elf_dir = parent_dir(&path);
        let metadata = self.read_metadata(Path::new(&elf_dir));
        let title = metadata.get("TITLE").cloned().unwrap_or_else(|| path.clone());
        let title_id = metadata.get("TITLE_ID").cloned().unwrap_or_default();
        info!("Title: {}", title);
        info!("Serial: {}", title_id);

        let cache_path = cache_dir(&self.config_dir, &title_id, &path);
        if let Err(e) = std::fs::create_dir_all(&cache_path) {
            warn!("Failed to create cache directory {:?}: {}", cache_path, e);
        }
        info!("Cache: {:?}", cache_path);

        {
            let mut info = self.info.write();
            info.title = title;
            info.title_id = title_id.clone();
            info.cache_path = cache_path.clone();
        }

        for layer in config_layers(&cache_path, &self.config_dir, &title_id, &path) {
            let applied = self
                .config
                .merge_file(&layer)
                .map_err(|source| BootError::Config {
                    path: layer.clone(),
                    source,
                })?;
            if applied {
                info!("Applying custom config: {:?}", layer);
            }
        }

        match self.config.serialize() {
            Ok(text) => info!("Used configuration:\n{}", text),
            Err(e) => warn!("Failed to render configuration: {}", e),
        }

        mount_devices(&self.mounts, &self.config.snapshot(), &self.config_dir, &elf_dir);

        let source = self.unwrap_protected(file, &path, &cache_path)?;
        let image = Classifier::new()
            .classify(source)
            .map_err(|source| BootError::Unrecognized {
                path: path.clone(),
                source,
            })?;

        let format = image.format;
        let machine = MachineKind::of(format);
        info!("Executable: {} ({})", format, machine);

        *self.machine.lock() = machine;
        self.status.store(Status::Ready);
        self.services.address_space.init(machine)?;

        match format {
            ExecutableFormat::PpuExec => {
                self.derive_elf_path(|p| format!("/host_root/{p}"));
                self.services.loader.load_executable(image)?;

                let backend = self.config.snapshot().gpu.backend;
                match self.services.host.render_backend(backend) {
                    Some(backend) => {
                        info!("Renderer: {}", backend.name());
                        *self.render.lock() = Some(backend);
                    }
                    None => warn!("Host provided no renderer"),
                }
            }
            ExecutableFormat::PpuPrx => {
                let handle = self.services.loader.load_shared_object(image, "")?;
                debug!("Loaded PRX, handle 0x{:x}", handle);
            }
            ExecutableFormat::SpuExec => {
                self.services.loader.load_executable(image)?;
            }
            ExecutableFormat::ArmExec => {
                self.derive_elf_path(|p| format!("host_root:{p}"));
                self.services.loader.load_executable(image)?;
            }
        }

        Ok(())
    }

    /// Title metadata from `sce_sys/param.sfo` or `../PARAM.SFO`
    fn read_metadata(&self, elf_dir: &Path) -> HashMap<String, String> {
        let candidates = [elf_dir.join("sce_sys/param.sfo"), elf_dir.join("../PARAM.SFO")];

        let Some((sfo, data)) = candidates
            .iter()
            .find_map(|p| std::fs::read(p).ok().map(|data| (p, data)))
        else {
            debug!("No PARAM.SFO next to the executable");
            return HashMap::new();
        };

        match self.services.metadata.parse(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to parse {:?}: {}", sfo, e);
                HashMap::new()
            }
        }
    }

    /// Replace a SELF with its plaintext image, using the cache when valid
    fn unwrap_protected(
        &self,
        mut file: File,
        path: &str,
        cache_path: &Path,
    ) -> Result<Box<dyn BinarySource>, BootError> {
        let mut magic = [0u8; 4];
        let protected = match file.read_exact(&mut magic) {
            Ok(()) => is_self(&magic),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };

        if !protected {
            return Ok(Box::new(file));
        }

        // Cache entries carry the times seen on the opened handle
        let times = SourceTimes::of(&file.metadata()?)?;

        let cache = DecryptedCache::new(cache_path);
        if let Some(plain) = cache.get(&times) {
            info!("Using decrypted image {:?}", plain);
            return Ok(Box::new(File::open(plain)?));
        }

        let mut image = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut image)?;

        let plain = self
            .services
            .decryptor
            .decrypt(image)
            .map_err(|source| BootError::Decrypt {
                path: path.to_string(),
                source,
            })?;

        if let Err(e) = cache.put(&times, &plain) {
            warn!("Failed to create {}: {}", DecryptedCache::FILE_NAME, e);
        }

        Ok(Box::new(Cursor::new(plain)))
    }

    fn derive_elf_path(&self, derive: impl FnOnce(&str) -> String) {
        let mut info = self.info.write();
        if info.elf_path.is_empty() {
            info.elf_path = derive(&info.path);
            info!("Elf path: {}", info.elf_path);
        }
    }
}
