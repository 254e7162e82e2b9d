//! Whole-file GSF decoding and encoding.
//!
//! # Layout
//! ```text
//! "SSBBgrsg"  u16 major = 7  u16 minor = 0
//! head { id, created, segm { local_id, id, count, tag* }*, tag* }
//! grai { local_id, gbhd { ... }, grdt { payload } }*
//! grai (size 0)
//! ```
//!
//! # Decoder
//! [`GsfDecoder`] checks the signature and version, finds the `head`
//! block (skipping anything before it), then yields grains one `grai`
//! block at a time.  A zero-size `grai` ends the sequence; so does running
//! out of stream between two grains.  Unknown blocks at any level other
//! than inside `gbhd` are skipped.
//!
//! # Encoder
//! [`GsfEncoder`] is either *building* (segments, tags and grains are
//! collected), *streaming* (the header is out, grains are written as they
//! are added) or *finalized*.  On a seekable sink the segment counts left
//! as `-1` while streaming are patched when the dump ends.

pub mod reader;
pub mod writer;

pub use reader::{DecoderOptions, DefaultGrainFactory, GrainFactory, Grains, GsfDecoder, GsfFile};
pub use writer::{EncoderOptions, EncoderState, GsfEncoder, GsfSink, SeekableSink, StreamSink};

/// File signature: `SSBB` then `grsg`.
pub const SIGNATURE: &[u8; 8] = b"SSBBgrsg";
pub const VERSION_MAJOR: u16 = 7;
pub const VERSION_MINOR: u16 = 0;
