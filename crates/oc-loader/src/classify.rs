//! Executable format classifier
//!
//! Recognizers are tried in a fixed priority order and the first match
//! wins. Rejection reasons are only collected for the diagnostic report when
//! nothing matches.

use crate::elf::{em, et, ElfClass, ElfDescriptor, ElfError, ElfShape, Endian};
use std::fmt;
use std::io::{Read, Seek};
use thiserror::Error;

/// Seekable binary handle the classifier and loaders read from
pub trait BinarySource: Read + Seek + Send {}

impl<T: Read + Seek + Send> BinarySource for T {}

/// Executable container formats, in classification priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutableFormat {
    /// PPU executable
    PpuExec,
    /// PPU relocatable module (PRX)
    PpuPrx,
    /// Standalone SPU executable
    SpuExec,
    /// ARMv7 executable
    ArmExec,
}

impl ExecutableFormat {
    pub const PRIORITY: [ExecutableFormat; 4] = [
        ExecutableFormat::PpuExec,
        ExecutableFormat::PpuPrx,
        ExecutableFormat::SpuExec,
        ExecutableFormat::ArmExec,
    ];

    /// Header shape that identifies this format
    pub fn shape(&self) -> ElfShape {
        match self {
            ExecutableFormat::PpuExec => ElfShape {
                class: ElfClass::Elf64,
                endian: Endian::Big,
                e_type: et::EXEC,
                machine: em::PPC64,
            },
            ExecutableFormat::PpuPrx => ElfShape {
                class: ElfClass::Elf64,
                endian: Endian::Big,
                e_type: et::PRX,
                machine: em::PPC64,
            },
            ExecutableFormat::SpuExec => ElfShape {
                class: ElfClass::Elf32,
                endian: Endian::Big,
                e_type: et::EXEC,
                machine: em::SPU,
            },
            ExecutableFormat::ArmExec => ElfShape {
                class: ElfClass::Elf32,
                endian: Endian::Little,
                e_type: et::EXEC,
                machine: em::ARM,
            },
        }
    }
}

impl fmt::Display for ExecutableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutableFormat::PpuExec => "ppu_exec",
            ExecutableFormat::PpuPrx => "ppu_prx",
            ExecutableFormat::SpuExec => "spu_exec",
            ExecutableFormat::ArmExec => "arm_exec",
        };
        f.write_str(name)
    }
}

/// One format recognizer
pub trait Recognizer: Send + Sync {
    fn format(&self) -> ExecutableFormat;

    /// Inspect `source` from its start
    fn recognize(&self, source: &mut dyn BinarySource) -> Result<ElfDescriptor, ElfError>;
}

/// Recognizer checking the ELF header shape of its format
#[derive(Debug, Clone, Copy)]
pub struct ElfRecognizer {
    format: ExecutableFormat,
}

impl ElfRecognizer {
    pub fn new(format: ExecutableFormat) -> Self {
        Self { format }
    }
}

impl Recognizer for ElfRecognizer {
    fn format(&self) -> ExecutableFormat {
        self.format
    }

    fn recognize(&self, source: &mut dyn BinarySource) -> Result<ElfDescriptor, ElfError> {
        self.format.shape().check(source)
    }
}

/// Matched executable, handed to its architecture loader
pub struct ExecutableImage {
    pub format: ExecutableFormat,
    pub descriptor: ElfDescriptor,
    pub source: Box<dyn BinarySource>,
}

impl fmt::Debug for ExecutableImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableImage")
            .field("format", &self.format)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Every recognizer rejected the image
#[derive(Error, Debug)]
#[error("Invalid or unsupported file format")]
pub struct ClassifyError {
    pub rejections: Vec<(ExecutableFormat, ElfError)>,
}

/// Ordered list of recognizers
pub struct Classifier {
    recognizers: Vec<Box<dyn Recognizer>>,
}

impl Classifier {
    /// Standard recognizers in priority order
    pub fn new() -> Self {
        Self::from_recognizers(
            ExecutableFormat::PRIORITY
                .into_iter()
                .map(|format| Box::new(ElfRecognizer::new(format)) as Box<dyn Recognizer>)
                .collect(),
        )
    }

    /// Custom recognizers; earlier entries take precedence
    pub fn from_recognizers(recognizers: Vec<Box<dyn Recognizer>>) -> Self {
        Self { recognizers }
    }

    /// Classify `source`, stopping at the first match
    pub fn classify(&self, mut source: Box<dyn BinarySource>) -> Result<ExecutableImage, ClassifyError> {
        let mut rejections = Vec::with_capacity(self.recognizers.len());

        for recognizer in &self.recognizers {
            match recognizer.recognize(source.as_mut()) {
                Ok(descriptor) => {
                    tracing::debug!("Classified as {}", recognizer.format());
                    return Ok(ExecutableImage {
                        format: recognizer.format(),
                        descriptor,
                        source,
                    });
                }
                Err(e) => rejections.push((recognizer.format(), e)),
            }
        }

        Err(ClassifyError { rejections })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::build_header;
    use std::io::Cursor;

    /// Accepts anything starting with its tag byte
    struct TagRecognizer {
        format: ExecutableFormat,
        tag: u8,
    }

    impl Recognizer for TagRecognizer {
        fn format(&self) -> ExecutableFormat {
            self.format
        }

        fn recognize(&self, source: &mut dyn BinarySource) -> Result<ElfDescriptor, ElfError> {
            let mut byte = [0u8; 1];
            source.seek(std::io::SeekFrom::Start(0))?;
            source.read_exact(&mut byte)?;
            if byte[0] & self.tag == 0 {
                return Err(ElfError::BadMagic);
            }
            ElfRecognizer::new(ExecutableFormat::PpuExec)
                .recognize(&mut Cursor::new(build_header(ExecutableFormat::PpuExec.shape(), 0)))
        }
    }

    fn image(format: ExecutableFormat) -> Box<dyn BinarySource> {
        Box::new(Cursor::new(build_header(format.shape(), 0x1000)))
    }

    #[test]
    fn test_each_format_is_recognized() {
        let classifier = Classifier::new();
        for format in ExecutableFormat::PRIORITY {
            let matched = classifier.classify(image(format)).unwrap();
            assert_eq!(matched.format, format);
            assert_eq!(matched.descriptor.entry, 0x1000);
        }
    }

    #[test]
    fn test_first_recognizer_wins() {
        // Byte 0x03 satisfies both tags
        let recognizers: Vec<Box<dyn Recognizer>> = vec![
            Box::new(TagRecognizer { format: ExecutableFormat::PpuExec, tag: 0x01 }),
            Box::new(TagRecognizer { format: ExecutableFormat::PpuPrx, tag: 0x02 }),
            Box::new(TagRecognizer { format: ExecutableFormat::SpuExec, tag: 0x02 }),
            Box::new(TagRecognizer { format: ExecutableFormat::ArmExec, tag: 0x02 }),
        ];
        let classifier = Classifier::from_recognizers(recognizers);

        let matched = classifier.classify(Box::new(Cursor::new(vec![0x03]))).unwrap();
        assert_eq!(matched.format, ExecutableFormat::PpuExec);

        let matched = classifier.classify(Box::new(Cursor::new(vec![0x02]))).unwrap();
        assert_eq!(matched.format, ExecutableFormat::PpuPrx);
    }

    #[test]
    fn test_total_failure_reports_every_recognizer() {
        let classifier = Classifier::new();
        let err = classifier
            .classify(Box::new(Cursor::new(b"not an executable at all".to_vec())))
            .unwrap_err();

        let formats: Vec<_> = err.rejections.iter().map(|(f, _)| *f).collect();
        assert_eq!(formats, ExecutableFormat::PRIORITY.to_vec());
        assert!(err.rejections.iter().all(|(_, e)| matches!(e, ElfError::BadMagic)));
    }

    #[test]
    fn test_wrong_machine_is_reported() {
        let mut header = build_header(ExecutableFormat::PpuExec.shape(), 0);
        header[19] = 0x99;
        let err = Classifier::new().classify(Box::new(Cursor::new(header))).unwrap_err();
        assert!(matches!(err.rejections[0].1, ElfError::BadMachine(0x99)));
        assert!(matches!(err.rejections[2].1, ElfError::BadClass(2)));
    }
}
