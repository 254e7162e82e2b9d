//! Reader and writer for GSF, the Generic Streaming Format: a block
//! structured container holding a file header, segments of media grains
//! (video, coded video, audio, coded audio, event, empty) and their
//! payloads.
//!
//! ```no_run
//! use std::io::Cursor;
//! use gsf::{GsfDecoder, GsfEncoder, Grain, Timestamp};
//! use uuid::Uuid;
//!
//! # fn main() -> gsf::Result<()> {
//! let mut enc = GsfEncoder::new(Cursor::new(Vec::new()));
//! let seg = enc.add_segment(None, None)?;
//! enc.add_grain(seg, Grain::event(Uuid::new_v4(), Uuid::new_v4(), Timestamp::new(10, 0)))?;
//! enc.dump()?;
//!
//! let bytes = enc.into_sink().into_inner().into_inner();
//! let file = GsfDecoder::new(Cursor::new(bytes))?.decode()?;
//! assert_eq!(file.segments[&seg].len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod primitive;
pub mod rational;
pub mod timestamp;
pub mod block;
pub mod grain;
pub mod gbhd;
pub mod header;
pub mod io_stream;

pub use error::{GsfError, Result};
pub use rational::Rational;
pub use timestamp::Timestamp;
pub use block::{Block, Tag};
pub use grain::{
    AudioHeader, CodedAudioHeader, CodedVideoHeader, CogAudioFormat, CogFrameFormat, CogFrameLayout, Component,
    EventItem, EventPayload, Grain, GrainBody, GrainMeta, GrainType, Payload, TimeLabel, VideoHeader,
};
pub use header::{FileHeader, Segment, TagPair, COUNT_UNKNOWN};
pub use io_stream::{
    DecoderOptions, DefaultGrainFactory, EncoderOptions, EncoderState, GrainFactory, Grains, GsfDecoder, GsfEncoder,
    GsfFile, GsfSink, SeekableSink, StreamSink,
};
