//! PARAM.SFO metadata
//!
//! Layout: 20-byte header (`\0PSF`, version, key table offset, data table
//! offset, entry count), 16-byte index entries, a key table of NUL-terminated
//! names and a data table. All fields are little-endian.

use crate::metadata::MetadataParser;
use oc_core::error::{EmulatorError, LoaderError};
use std::collections::{BTreeMap, HashMap};

pub const SFO_MAGIC: [u8; 4] = *b"\0PSF";

const HEADER_SIZE: usize = 20;
const INDEX_ENTRY_SIZE: usize = 16;

const FMT_UTF8_SPECIAL: u16 = 0x0004;
const FMT_UTF8: u16 = 0x0204;
const FMT_INTEGER: u16 = 0x0404;

/// SFO entry value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SfoValue {
    Utf8(String),
    Integer(u32),
}

impl std::fmt::Display for SfoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SfoValue::Utf8(s) => f.write_str(s),
            SfoValue::Integer(v) => write!(f, "{v}"),
        }
    }
}

fn invalid(msg: impl Into<String>) -> LoaderError {
    LoaderError::InvalidMetadata(msg.into())
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, LoaderError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid(format!("truncated at 0x{offset:x}")))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, LoaderError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid(format!("truncated at 0x{offset:x}")))
}

/// Parsed PARAM.SFO
#[derive(Debug, Clone, Default)]
pub struct ParamSfo {
    entries: BTreeMap<String, SfoValue>,
}

impl ParamSfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an SFO image
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < HEADER_SIZE || data[0..4] != SFO_MAGIC {
            return Err(invalid("bad SFO magic"));
        }

        let key_table = u32_at(data, 8)? as usize;
        let data_table = u32_at(data, 12)? as usize;
        let count = u32_at(data, 16)? as usize;

        let mut entries = BTreeMap::new();
        for i in 0..count {
            let index = HEADER_SIZE + i * INDEX_ENTRY_SIZE;
            let key_offset = u16_at(data, index)? as usize;
            let fmt = u16_at(data, index + 2)?;
            let len = u32_at(data, index + 4)? as usize;
            let value_offset = u32_at(data, index + 12)? as usize;

            let key_start = key_table + key_offset;
            let key_bytes = data
                .get(key_start..)
                .ok_or_else(|| invalid("key out of bounds"))?;
            let key_end = key_bytes
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| invalid("unterminated key"))?;
            let key = String::from_utf8_lossy(&key_bytes[..key_end]).into_owned();

            let value_start = data_table + value_offset;
            let value = match fmt {
                FMT_INTEGER => SfoValue::Integer(u32_at(data, value_start)?),
                FMT_UTF8 | FMT_UTF8_SPECIAL => {
                    let raw = data
                        .get(value_start..value_start + len)
                        .ok_or_else(|| invalid(format!("value of {key} out of bounds")))?;
                    let text = raw.split(|&b| b == 0).next().unwrap_or_default();
                    SfoValue::Utf8(String::from_utf8_lossy(text).into_owned())
                }
                other => {
                    tracing::warn!("SFO: skipping {} with unknown format 0x{:04x}", key, other);
                    continue;
                }
            };

            entries.insert(key, value);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&SfoValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            SfoValue::Utf8(s) => Some(s),
            SfoValue::Integer(_) => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.get_string("TITLE")
    }

    pub fn title_id(&self) -> Option<&str> {
        self.get_string("TITLE_ID")
    }

    pub fn insert(&mut self, key: &str, value: SfoValue) -> &mut Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    /// Every entry rendered as text
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    /// Serialize to the on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.entries.len();
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut index = Vec::with_capacity(count * INDEX_ENTRY_SIZE);

        for (key, value) in &self.entries {
            let key_offset = keys.len() as u16;
            keys.extend_from_slice(key.as_bytes());
            keys.push(0);

            let value_offset = values.len() as u32;
            let (fmt, len, bytes) = match value {
                SfoValue::Integer(v) => (FMT_INTEGER, 4u32, v.to_le_bytes().to_vec()),
                SfoValue::Utf8(s) => {
                    let mut bytes = s.as_bytes().to_vec();
                    bytes.push(0);
                    (FMT_UTF8, bytes.len() as u32, bytes)
                }
            };
            let max_len = (len + 3) & !3;

            index.extend_from_slice(&key_offset.to_le_bytes());
            index.extend_from_slice(&fmt.to_le_bytes());
            index.extend_from_slice(&len.to_le_bytes());
            index.extend_from_slice(&max_len.to_le_bytes());
            index.extend_from_slice(&value_offset.to_le_bytes());

            values.extend_from_slice(&bytes);
            values.resize(value_offset as usize + max_len as usize, 0);
        }
        keys.resize((keys.len() + 3) & !3, 0);

        let key_table = (HEADER_SIZE + index.len()) as u32;
        let data_table = key_table + keys.len() as u32;

        let mut out = Vec::with_capacity(data_table as usize + values.len());
        out.extend_from_slice(&SFO_MAGIC);
        out.extend_from_slice(&0x0101u32.to_le_bytes());
        out.extend_from_slice(&key_table.to_le_bytes());
        out.extend_from_slice(&data_table.to_le_bytes());
        out.extend_from_slice(&(count as u32).to_le_bytes());
        out.extend(index);
        out.extend(keys);
        out.extend(values);
        out
    }
}

/// [`MetadataParser`] for PARAM.SFO sidecars
#[derive(Debug, Default, Clone, Copy)]
pub struct SfoParser;

impl MetadataParser for SfoParser {
    fn parse(&self, data: &[u8]) -> Result<HashMap<String, String>, EmulatorError> {
        Ok(ParamSfo::parse(data)?.to_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParamSfo {
        let mut sfo = ParamSfo::new();
        sfo.insert("TITLE", SfoValue::Utf8("Test Game Title".to_string()))
            .insert("TITLE_ID", SfoValue::Utf8("BLES12345".to_string()))
            .insert("PARENTAL_LEVEL", SfoValue::Integer(3));
        sfo
    }

    #[test]
    fn test_parse_generated() {
        let data = sample().to_bytes();
        assert_eq!(&data[0..4], b"\0PSF");

        let parsed = ParamSfo::parse(&data).unwrap();
        assert_eq!(parsed.title(), Some("Test Game Title"));
        assert_eq!(parsed.title_id(), Some("BLES12345"));
        assert_eq!(parsed.get("PARENTAL_LEVEL"), Some(&SfoValue::Integer(3)));
        assert_eq!(parsed.get_string("PARENTAL_LEVEL"), None);
    }

    #[test]
    fn test_bad_magic() {
        assert!(ParamSfo::parse(b"\x7fELF0000000000000000000").is_err());
        assert!(ParamSfo::parse(b"\0PSF").is_err());
    }

    #[test]
    fn test_truncated_entries() {
        let data = sample().to_bytes();
        assert!(ParamSfo::parse(&data[..30]).is_err());
    }

    #[test]
    fn test_parser_renders_map() {
        let map = SfoParser.parse(&sample().to_bytes()).unwrap();
        assert_eq!(map.get("TITLE").map(String::as_str), Some("Test Game Title"));
        assert_eq!(map.get("PARENTAL_LEVEL").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_empty_sfo() {
        let parsed = ParamSfo::parse(&ParamSfo::new().to_bytes()).unwrap();
        assert!(parsed.title().is_none());
    }
}
