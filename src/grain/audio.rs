use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample format code of an audio or coded-audio grain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CogAudioFormat(pub u32);

impl CogAudioFormat {
    pub const S16_PLANES:         Self = Self(0x00);
    pub const S16_PAIRS:          Self = Self(0x01);
    pub const S16_INTERLEAVED:    Self = Self(0x02);
    pub const S24_PLANES:         Self = Self(0x04);
    pub const S24_PAIRS:          Self = Self(0x05);
    pub const S24_INTERLEAVED:    Self = Self(0x06);
    pub const S32_PLANES:         Self = Self(0x08);
    pub const S32_PAIRS:          Self = Self(0x09);
    pub const S32_INTERLEAVED:    Self = Self(0x0a);
    pub const FLOAT_PLANES:       Self = Self(0x30);
    pub const FLOAT_PAIRS:        Self = Self(0x31);
    pub const FLOAT_INTERLEAVED:  Self = Self(0x32);
    pub const DOUBLE_PLANES:      Self = Self(0x38);
    pub const DOUBLE_PAIRS:       Self = Self(0x39);
    pub const DOUBLE_INTERLEAVED: Self = Self(0x3a);

    pub const MP1:                Self = Self(0x200);
    pub const AAC:                Self = Self(0x201);
    pub const OPUS:               Self = Self(0x202);

    pub const UNKNOWN:            Self = Self(0xffff_fffe);

    pub fn is_compressed(self) -> bool {
        self != Self::UNKNOWN && (self.0 >> 9) & 1 == 1
    }

    /// Bytes per sample per channel for uncompressed formats.
    pub fn sample_size(self) -> Option<u32> {
        if self == Self::UNKNOWN || self.is_compressed() {
            return None;
        }
        Some(match self.0 >> 2 {
            0x0  => 2,
            0x1  => 3,
            0x2  => 4,
            0xc  => 4,
            0xe  => 8,
            _    => return None,
        })
    }
}

impl fmt::Debug for CogAudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CogAudioFormat(0x{:02x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioHeader {
    pub format:      CogAudioFormat,
    pub channels:    u16,
    pub samples:     u32,
    pub sample_rate: u32,
}

impl AudioHeader {
    /// Payload size implied by the header, when the format is uncompressed.
    pub fn expected_length(&self) -> Option<u64> {
        self.format
            .sample_size()
            .map(|s| s as u64 * self.channels as u64 * self.samples as u64)
    }
}
