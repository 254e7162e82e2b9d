use std::io;
use thiserror::Error;

/// Every failure the GSF codec can report.
///
/// Decode-side variants carry the absolute stream offset at which the
/// problem was detected so a corrupted file can be diagnosed.
#[derive(Error, Debug)]
pub enum GsfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected end of stream at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEof { offset: u64, wanted: usize },

    #[error("Not a GSF file: signature {} at offset {offset}", hex::encode(.found))]
    BadFileType { offset: u64, found: [u8; 8] },

    #[error("Unsupported GSF version {major}.{minor} (only 7.0 is understood)")]
    BadVersion { major: u16, minor: u16 },

    #[error("Decode error at offset {offset}{}: {reason}", .length.map(|l| format!(" (length {l})")).unwrap_or_default())]
    Decode {
        offset: u64,
        length: Option<u64>,
        reason: String,
    },

    #[error("Invalid UTF-8 string {} at offset {offset}", hex::encode(.bytes))]
    InvalidString { offset: u64, bytes: Vec<u8> },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Payload at offset {offset} ({length} bytes) has not been loaded")]
    NotYetLoaded { offset: u64, length: u64 },
}

impl GsfError {
    pub(crate) fn decode(offset: u64, reason: impl Into<String>) -> Self {
        GsfError::Decode { offset, length: None, reason: reason.into() }
    }

    pub(crate) fn decode_len(offset: u64, length: u64, reason: impl Into<String>) -> Self {
        GsfError::Decode { offset, length: Some(length), reason: reason.into() }
    }

    /// True for errors caused by the stream running out of bytes.
    pub fn is_eof(&self) -> bool {
        match self {
            GsfError::UnexpectedEof { .. } => true,
            GsfError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GsfError>;
