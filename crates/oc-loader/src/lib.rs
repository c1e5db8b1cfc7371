//! Executable loading front end for oxidized-cell
//!
//! Classifies guest executables, unwraps SELF containers and caches their
//! decrypted images.

pub mod cache;
pub mod classify;
pub mod elf;
pub mod self_file;

// Re-export main types
pub use cache::{DecryptedCache, SourceTimes};
pub use classify::{
    BinarySource, ClassifyError, Classifier, ElfRecognizer, ExecutableFormat, ExecutableImage,
    Recognizer,
};
pub use elf::{ElfClass, ElfDescriptor, ElfError, ElfShape, Endian, ELF_MAGIC};
pub use self_file::{is_self, Decryptor, EmbeddedImageDecryptor, SelfHeader, SELF_MAGIC};
