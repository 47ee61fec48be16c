//! Text encodings as seen by the line scanner.
//!
//! The buffer engine treats an encoding as an opaque service: it asks for the
//! terminator byte pattern and the code-unit width (so terminators are only
//! matched on unit boundaries), then hands the raw line to `decode`.

use std::sync::Arc;

use crate::error::{HandleError, Result};

/// Byte-to-text conversion service used by `readline` and `puts`.
pub trait TextEncoding: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Line terminator as encoded bytes.
    fn terminator(&self) -> &'static [u8];

    /// Width of one code unit in bytes. Terminators are matched only at
    /// offsets that are a multiple of this width.
    fn unit_width(&self) -> usize {
        1
    }

    fn decode(&self, bytes: &[u8]) -> Result<String>;

    fn encode(&self, text: &str) -> Result<Vec<u8>>;
}

/// Shared encoding handle stored on each handle record.
pub type EncodingRef = Arc<dyn TextEncoding>;

#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl TextEncoding for Utf8 {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn terminator(&self) -> &'static [u8] {
        b"\n"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HandleError::invalid(format!("malformed utf8: {e}")))
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ascii;

impl TextEncoding for Ascii {
    fn name(&self) -> &'static str {
        "ascii"
    }

    fn terminator(&self) -> &'static [u8] {
        b"\n"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
            return Err(HandleError::invalid(format!(
                "non-ascii byte 0x{:02x} at offset {pos}",
                bytes[pos]
            )));
        }
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        if !text.is_ascii() {
            return Err(HandleError::invalid("text is not ascii"));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// ISO-8859-1. Every byte decodes, so binary handles use it for text views.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1;

impl TextEncoding for Latin1 {
    fn name(&self) -> &'static str {
        "iso-8859-1"
    }

    fn terminator(&self) -> &'static [u8] {
        b"\n"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        text.chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .map_err(|_| HandleError::invalid(format!("{c:?} is outside latin1")))
            })
            .collect()
    }
}

/// UTF-16, little endian. Two-byte units, so a `0x0A` that is the high byte
/// of some other unit is never mistaken for a newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf16Le;

impl TextEncoding for Utf16Le {
    fn name(&self) -> &'static str {
        "utf16le"
    }

    fn terminator(&self) -> &'static [u8] {
        b"\n\0"
    }

    fn unit_width(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        if bytes.len() % 2 != 0 {
            return Err(HandleError::invalid("odd byte count for utf16"));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).map_err(|e| HandleError::invalid(format!("malformed utf16: {e}")))
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect())
    }
}

/// Look an encoding up by name (case-insensitive, common aliases).
pub fn by_name(name: &str) -> Option<EncodingRef> {
    match name.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Some(Arc::new(Utf8)),
        "ascii" | "us-ascii" => Some(Arc::new(Ascii)),
        "latin1" | "iso-8859-1" | "binary" => Some(Arc::new(Latin1)),
        "utf16le" | "utf-16le" => Some(Arc::new(Utf16Le)),
        _ => None,
    }
}

/// Find the first terminator in `hay` whose start lies on a unit boundary.
/// `hay` must itself start on a unit boundary.
pub fn find_terminator(hay: &[u8], term: &[u8], unit: usize) -> Option<usize> {
    if term.is_empty() || hay.len() < term.len() {
        return None;
    }
    let unit = unit.max(1);
    let last = hay.len() - term.len();
    let mut i = 0;
    while i <= last {
        if &hay[i..i + term.len()] == term {
            return Some(i);
        }
        i += unit;
    }
    None
}
