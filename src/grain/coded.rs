use serde::{Deserialize, Serialize};

use super::audio::CogAudioFormat;
use super::video::{CogFrameFormat, CogFrameLayout};

/// Header of a compressed video grain (one coded picture).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedVideoHeader {
    pub format:          CogFrameFormat,
    pub layout:          CogFrameLayout,
    pub origin_width:    u32,
    pub origin_height:   u32,
    pub coded_width:     u32,
    pub coded_height:    u32,
    pub is_key_frame:    bool,
    pub temporal_offset: i32,
    /// Byte offsets of coded units (e.g. NAL units) in the payload.  Empty
    /// when not known; an empty list is not written.
    pub unit_offsets:    Vec<u32>,
}

impl CodedVideoHeader {
    pub fn new(format: CogFrameFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            layout:          CogFrameLayout::FULL_FRAME,
            origin_width:    width,
            origin_height:   height,
            coded_width:     width,
            coded_height:    height,
            is_key_frame:    false,
            temporal_offset: 0,
            unit_offsets:    Vec::new(),
        }
    }
}

/// Header of a compressed audio grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedAudioHeader {
    pub format:      CogAudioFormat,
    pub channels:    u16,
    pub samples:     u32,
    /// Encoder delay samples at the start of the grain.
    pub priming:     u32,
    /// Padding samples at the end of the grain.
    pub remainder:   u32,
    pub sample_rate: u32,
}
