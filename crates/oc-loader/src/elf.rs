//! ELF header recognition
//!
//! Each guest executable flavour is an ELF variant told apart by class,
//! byte order, object type and machine. Recognition only reads the file
//! header; segment loading belongs to the architecture loaders.

use std::io::{Read, Seek, SeekFrom};
use thiserror::Error;

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Object types
pub mod et {
    pub const EXEC: u16 = 2;
    /// PS3 PRX module
    pub const PRX: u16 = 0xFFA4;
}

/// Machine ids
pub mod em {
    pub const ARM: u16 = 40;
    pub const PPC64: u16 = 21;
    pub const SPU: u16 = 23;
}

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const IDENT_SIZE: usize = 16;
const ELF32_HEADER_SIZE: usize = 52;
const ELF64_HEADER_SIZE: usize = 64;

/// ELF word size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn ident(self) -> u8 {
        match self {
            ElfClass::Elf32 => 1,
            ElfClass::Elf64 => 2,
        }
    }

    fn header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => ELF32_HEADER_SIZE,
            ElfClass::Elf64 => ELF64_HEADER_SIZE,
        }
    }
}

/// ELF byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn ident(self) -> u8 {
        match self {
            Endian::Little => 1,
            Endian::Big => 2,
        }
    }

    fn u16(self, b: &[u8]) -> u16 {
        let raw = [b[0], b[1]];
        match self {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        match self {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b[..8]);
        match self {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        }
    }
}

/// Why a recognizer rejected an image
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("File too small")]
    TooSmall,

    #[error("Invalid magic")]
    BadMagic,

    #[error("Invalid class {0}")]
    BadClass(u8),

    #[error("Invalid byte order {0}")]
    BadEndianness(u8),

    #[error("Invalid version {0}")]
    BadVersion(u8),

    #[error("Invalid object type 0x{0:04x}")]
    BadType(u16),

    #[error("Invalid machine {0}")]
    BadMachine(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header fields of a recognized image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfDescriptor {
    pub class: ElfClass,
    pub endian: Endian,
    pub e_type: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub phnum: u16,
    pub shnum: u16,
}

/// Expected header shape for one executable flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfShape {
    pub class: ElfClass,
    pub endian: Endian,
    pub e_type: u16,
    pub machine: u16,
}

impl ElfShape {
    /// Read the header from the start of `reader` and check it against this shape
    pub fn check<R: Read + Seek + ?Sized>(&self, reader: &mut R) -> Result<ElfDescriptor, ElfError> {
        reader.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; ELF64_HEADER_SIZE];
        let read = read_up_to(reader, &mut header)?;
        if read < IDENT_SIZE {
            return Err(ElfError::TooSmall);
        }
        if header[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if header[EI_CLASS] != self.class.ident() {
            return Err(ElfError::BadClass(header[EI_CLASS]));
        }
        if header[EI_DATA] != self.endian.ident() {
            return Err(ElfError::BadEndianness(header[EI_DATA]));
        }
        if header[EI_VERSION] != 1 {
            return Err(ElfError::BadVersion(header[EI_VERSION]));
        }
        if read < self.class.header_size() {
            return Err(ElfError::TooSmall);
        }

        let e = self.endian;
        let machine = e.u16(&header[18..]);
        if machine != self.machine {
            return Err(ElfError::BadMachine(machine));
        }
        let e_type = e.u16(&header[16..]);
        if e_type != self.e_type {
            return Err(ElfError::BadType(e_type));
        }

        let descriptor = match self.class {
            ElfClass::Elf32 => ElfDescriptor {
                class: self.class,
                endian: e,
                e_type,
                machine,
                entry: e.u32(&header[24..]) as u64,
                phoff: e.u32(&header[28..]) as u64,
                shoff: e.u32(&header[32..]) as u64,
                flags: e.u32(&header[36..]),
                phnum: e.u16(&header[44..]),
                shnum: e.u16(&header[48..]),
            },
            ElfClass::Elf64 => ElfDescriptor {
                class: self.class,
                endian: e,
                e_type,
                machine,
                entry: e.u64(&header[24..]),
                phoff: e.u64(&header[32..]),
                shoff: e.u64(&header[40..]),
                flags: e.u32(&header[48..]),
                phnum: e.u16(&header[56..]),
                shnum: e.u16(&header[60..]),
            },
        };

        Ok(descriptor)
    }
}

fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Build a minimal ELF header image, used by tests and tools
pub fn build_header(shape: ElfShape, entry: u64) -> Vec<u8> {
    let e = shape.endian;
    let put16 = |v: u16| match e {
        Endian::Little => v.to_le_bytes().to_vec(),
        Endian::Big => v.to_be_bytes().to_vec(),
    };
    let put32 = |v: u32| match e {
        Endian::Little => v.to_le_bytes().to_vec(),
        Endian::Big => v.to_be_bytes().to_vec(),
    };
    let put64 = |v: u64| match e {
        Endian::Little => v.to_le_bytes().to_vec(),
        Endian::Big => v.to_be_bytes().to_vec(),
    };

    let mut out = Vec::with_capacity(shape.class.header_size());
    out.extend_from_slice(&ELF_MAGIC);
    out.extend_from_slice(&[shape.class.ident(), e.ident(), 1]);
    out.resize(IDENT_SIZE, 0);
    out.extend(put16(shape.e_type));
    out.extend(put16(shape.machine));
    out.extend(put32(1));

    match shape.class {
        ElfClass::Elf32 => {
            out.extend(put32(entry as u32));
            out.extend(put32(0)); // phoff
            out.extend(put32(0)); // shoff
            out.extend(put32(0)); // flags
            out.extend(put16(ELF32_HEADER_SIZE as u16));
            out.extend(put16(32)); // phentsize
        }
        ElfClass::Elf64 => {
            out.extend(put64(entry));
            out.extend(put64(0));
            out.extend(put64(0));
            out.extend(put32(0));
            out.extend(put16(ELF64_HEADER_SIZE as u16));
            out.extend(put16(56));
        }
    }
    out.extend(put16(0)); // phnum
    out.extend(put16(0)); // shentsize
    out.extend(put16(0)); // shnum
    out.extend(put16(0)); // shstrndx
    out
}
