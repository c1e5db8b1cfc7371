//! VFS errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("Device not mounted: /{0}/")]
    NotMounted(String),

    #[error("Invalid guest path: {0}")]
    InvalidPath(String),
}
