//! In-memory grain model: the common metadata every grain carries, a
//! type-specific [`GrainBody`], and an optional payload.

pub mod audio;
pub mod coded;
pub mod event;
pub mod video;

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GsfError, Result};
use crate::primitive::GsfReadExt;
use crate::rational::Rational;
use crate::timestamp::Timestamp;

pub use audio::{AudioHeader, CogAudioFormat};
pub use coded::{CodedAudioHeader, CodedVideoHeader};
pub use event::{EventItem, EventPayload};
pub use video::{CogFrameFormat, CogFrameLayout, Component, VideoHeader};

/// Length of the fixed tag field of a time label.
pub const TIMELABEL_TAG_LEN: usize = 16;

// ── GrainType ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrainType {
    Empty,
    Video,
    CodedVideo,
    Audio,
    CodedAudio,
    Event,
}

impl GrainType {
    pub fn name(self) -> &'static str {
        match self {
            GrainType::Empty      => "empty",
            GrainType::Video      => "video",
            GrainType::CodedVideo => "coded_video",
            GrainType::Audio      => "audio",
            GrainType::CodedAudio => "coded_audio",
            GrainType::Event      => "event",
        }
    }
}

impl fmt::Display for GrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GrainType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "empty"       => Ok(GrainType::Empty),
            "video"       => Ok(GrainType::Video),
            "coded_video" => Ok(GrainType::CodedVideo),
            "audio"       => Ok(GrainType::Audio),
            "coded_audio" => Ok(GrainType::CodedAudio),
            "event"       => Ok(GrainType::Event),
            other         => Err(format!("Unknown grain type {other:?}")),
        }
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// SMPTE-style time label attached to a grain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLabel {
    /// At most 16 bytes survive encoding; trailing NULs are stripped.
    pub tag:                   String,
    pub frames_since_midnight: u32,
    pub frame_rate:            Rational,
    pub drop_frame:            bool,
}

/// Type-specific part of a grain.  Exactly one variant per grain type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grain_type", rename_all = "snake_case")]
pub enum GrainBody {
    Empty,
    Video(VideoHeader),
    CodedVideo(CodedVideoHeader),
    Audio(AudioHeader),
    CodedAudio(CodedAudioHeader),
    Event,
}

impl GrainBody {
    pub fn grain_type(&self) -> GrainType {
        match self {
            GrainBody::Empty         => GrainType::Empty,
            GrainBody::Video(_)      => GrainType::Video,
            GrainBody::CodedVideo(_) => GrainType::CodedVideo,
            GrainBody::Audio(_)      => GrainType::Audio,
            GrainBody::CodedAudio(_) => GrainType::CodedAudio,
            GrainBody::Event         => GrainType::Event,
        }
    }
}

/// Everything stored in a grain's `gbhd` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrainMeta {
    pub source_id:          Uuid,
    pub flow_id:            Uuid,
    pub origin_timestamp:   Timestamp,
    pub sync_timestamp:     Timestamp,
    /// Not carried by GSF; always `None` on decoded grains.
    pub creation_timestamp: Option<Timestamp>,
    pub rate:               Rational,
    pub duration:           Rational,
    pub timelabels:         Vec<TimeLabel>,
    pub body:               GrainBody,
}

impl GrainMeta {
    /// Metadata with `sync_timestamp = origin_timestamp`, 25 fps rate and a
    /// one-frame duration.
    pub fn new(source_id: Uuid, flow_id: Uuid, origin_timestamp: Timestamp, body: GrainBody) -> Self {
        Self {
            source_id,
            flow_id,
            origin_timestamp,
            sync_timestamp: origin_timestamp,
            creation_timestamp: None,
            rate: Rational::new(25, 1),
            duration: Rational::new(1, 25),
            timelabels: Vec::new(),
            body,
        }
    }

    pub fn grain_type(&self) -> GrainType {
        self.body.grain_type()
    }
}

// ── Payload ──────────────────────────────────────────────────────────────────

/// Grain payload bytes, either in memory or a byte range of the source
/// stream still to be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Resolved(Vec<u8>),
    Deferred { offset: u64, length: u64 },
}

impl Payload {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Payload::Resolved(_))
    }

    /// Bytes of a resolved payload; `NotYetLoaded` for a deferred one.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Payload::Resolved(bytes) => Ok(bytes),
            Payload::Deferred { offset, length } => {
                Err(GsfError::NotYetLoaded { offset: *offset, length: *length })
            }
        }
    }

    pub fn len(&self) -> Result<usize> {
        self.as_bytes().map(<[u8]>::len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Read a deferred payload from `r` in one go.  The stream position is
    /// restored afterwards.  A resolved payload is returned as is.
    pub fn resolve<R: Read + Seek + ?Sized>(&mut self, r: &mut R) -> Result<&[u8]> {
        if let Payload::Deferred { offset, length } = *self {
            let len = usize::try_from(length)
                .map_err(|_| GsfError::decode_len(offset, length, "Payload too large for memory"))?;
            let here = r.stream_position()?;
            r.seek(SeekFrom::Start(offset))?;
            let bytes = r.read_bytes(len);
            r.seek(SeekFrom::Start(here))?;
            *self = Payload::Resolved(bytes?);
        }
        self.as_bytes()
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Payload::Resolved(bytes) => Ok(bytes),
            Payload::Deferred { offset, length } => Err(GsfError::NotYetLoaded { offset, length }),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Resolved(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Resolved(bytes.to_vec())
    }
}

// ── Grain ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grain {
    pub meta:    GrainMeta,
    pub payload: Option<Payload>,
}

impl Grain {
    pub fn new(meta: GrainMeta, payload: Option<Payload>) -> Self {
        Self { meta, payload }
    }

    pub fn empty(source_id: Uuid, flow_id: Uuid, origin_timestamp: Timestamp) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::Empty), None)
    }

    pub fn video(source_id: Uuid, flow_id: Uuid, origin_timestamp: Timestamp, header: VideoHeader) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::Video(header)), None)
    }

    pub fn coded_video(
        source_id:        Uuid,
        flow_id:          Uuid,
        origin_timestamp: Timestamp,
        header:           CodedVideoHeader,
    ) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::CodedVideo(header)), None)
    }

    pub fn audio(source_id: Uuid, flow_id: Uuid, origin_timestamp: Timestamp, header: AudioHeader) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::Audio(header)), None)
    }

    pub fn coded_audio(
        source_id:        Uuid,
        flow_id:          Uuid,
        origin_timestamp: Timestamp,
        header:           CodedAudioHeader,
    ) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::CodedAudio(header)), None)
    }

    pub fn event(source_id: Uuid, flow_id: Uuid, origin_timestamp: Timestamp) -> Self {
        Self::new(GrainMeta::new(source_id, flow_id, origin_timestamp, GrainBody::Event), None)
    }

    pub fn with_rate(mut self, rate: Rational) -> Self {
        self.meta.rate = rate;
        self
    }

    pub fn with_duration(mut self, duration: Rational) -> Self {
        self.meta.duration = duration;
        self
    }

    pub fn with_sync_timestamp(mut self, ts: Timestamp) -> Self {
        self.meta.sync_timestamp = ts;
        self
    }

    pub fn with_timelabels(mut self, timelabels: Vec<TimeLabel>) -> Self {
        self.meta.timelabels = timelabels;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn grain_type(&self) -> GrainType {
        self.meta.grain_type()
    }

    /// Payload bytes, `None` when the grain has no payload.
    pub fn payload_bytes(&self) -> Result<Option<&[u8]>> {
        self.payload.as_ref().map(Payload::as_bytes).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_deferred_payload_must_be_resolved() {
        let mut c = Cursor::new(b"xxxxhello".to_vec());
        let mut p = Payload::Deferred { offset: 4, length: 5 };
        assert!(matches!(p.as_bytes(), Err(GsfError::NotYetLoaded { offset: 4, length: 5 })));
        assert!(p.len().is_err());

        assert_eq!(p.resolve(&mut c).unwrap(), b"hello");
        assert_eq!(c.position(), 0);
        assert_eq!(p, Payload::Resolved(b"hello".to_vec()));
    }

    #[test]
    fn test_resolve_past_eof() {
        let mut c = Cursor::new(vec![0u8; 4]);
        let mut p = Payload::Deferred { offset: 2, length: 10 };
        assert!(matches!(p.resolve(&mut c), Err(GsfError::UnexpectedEof { offset: 2, .. })));
        assert!(!p.is_resolved());
    }

    #[test]
    fn test_grain_type_names() {
        for t in [
            GrainType::Empty,
            GrainType::Video,
            GrainType::CodedVideo,
            GrainType::Audio,
            GrainType::CodedAudio,
            GrainType::Event,
        ] {
            assert_eq!(t.name().parse::<GrainType>().unwrap(), t);
        }
        assert!("subtitle".parse::<GrainType>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let ts = Timestamp::new(100, 0);
        let g = Grain::event(Uuid::nil(), Uuid::nil(), ts).with_payload(b"{}".as_slice());
        assert_eq!(g.grain_type(), GrainType::Event);
        assert_eq!(g.meta.sync_timestamp, ts);
        assert_eq!(g.meta.rate, Rational::new(25, 1));
        assert_eq!(g.payload_bytes().unwrap(), Some(b"{}".as_slice()));
    }
}
