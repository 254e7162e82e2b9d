use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{NaiveDateTime, SubsecRound, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{SIGNATURE, VERSION_MAJOR, VERSION_MINOR};
use crate::block::{checked_size, write_block_header, Tag, BLOCK_HEADER_SIZE};
use crate::error::{GsfError, Result};
use crate::gbhd::{gbhd_size, write_gbhd};
use crate::grain::{Grain, Payload};
use crate::header::{write_head, FileHeader, Segment, TagPair, COUNT_UNKNOWN};
use crate::primitive::GsfWriteExt;

// ── Sinks ────────────────────────────────────────────────────────────────────

/// Byte sink for [`GsfEncoder`].  Sinks that can seek back report
/// [`GsfSink::can_patch`] and get their segment counts filled in at the
/// end of a streamed dump.
pub trait GsfSink: Write {
    /// Bytes written so far, as an absolute offset.
    fn position(&mut self) -> io::Result<u64>;
    fn can_patch(&self) -> bool;
    /// Overwrite `bytes` at `offset`, leaving the write position unchanged.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;
}

/// A sink over anything seekable: files, `Cursor<Vec<u8>>`.
pub struct SeekableSink<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> SeekableSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> GsfSink for SeekableSink<W> {
    fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    fn can_patch(&self) -> bool {
        true
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let here = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(())
    }
}

/// A forward-only sink (pipes, sockets).  Counts bytes to know its
/// position; cannot patch.
pub struct StreamSink<W: Write> {
    inner:   W,
    written: u64,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> GsfSink for StreamSink<W> {
    fn position(&mut self) -> io::Result<u64> {
        Ok(self.written)
    }

    fn can_patch(&self) -> bool {
        false
    }

    fn patch(&mut self, offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot patch offset {offset} of a forward-only stream"),
        ))
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// File identifier.  Defaults to a random v4 UUID.
    pub id:      Uuid,
    /// Creation time, whole seconds.  Defaults to now (UTC).
    pub created: NaiveDateTime,
    pub tags:    Vec<TagPair>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            id:      Uuid::new_v4(),
            created: Utc::now().naive_utc().trunc_subsecs(0),
            tags:    Vec::new(),
        }
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Segments, tags and grains may be added; nothing written yet.
    Building,
    /// Header written; grains go straight to the sink.
    Streaming,
    /// Terminator written; nothing more may be added.
    Finalized,
}

struct SegmentEntry {
    segment:      Segment,
    pending:      Vec<Grain>,
    written:      i64,
    count_offset: Option<u64>,
}

pub struct GsfEncoder<S: GsfSink> {
    sink:     S,
    id:       Uuid,
    created:  NaiveDateTime,
    tags:     Vec<TagPair>,
    segments: Vec<SegmentEntry>,
    state:    EncoderState,
}

impl GsfEncoder<SeekableSink<BufWriter<File>>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Seek> GsfEncoder<SeekableSink<W>> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, EncoderOptions::default())
    }

    pub fn with_options(writer: W, options: EncoderOptions) -> Self {
        Self::with_sink(SeekableSink::new(writer), options)
    }
}

impl<W: Write> GsfEncoder<StreamSink<W>> {
    pub fn streaming(writer: W) -> Self {
        Self::streaming_with_options(writer, EncoderOptions::default())
    }

    pub fn streaming_with_options(writer: W, options: EncoderOptions) -> Self {
        Self::with_sink(StreamSink::new(writer), options)
    }
}

impl<S: GsfSink> GsfEncoder<S> {
    pub fn with_sink(sink: S, options: EncoderOptions) -> Self {
        Self {
            sink,
            id:       options.id,
            created:  options.created,
            tags:     options.tags,
            segments: Vec::new(),
            state:    EncoderState::Building,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The header as it stands, with each segment's count of grains added
    /// so far.
    pub fn header(&self) -> FileHeader {
        FileHeader {
            id:       self.id,
            created:  self.created,
            segments: self.segments.iter().map(|e| Segment { count: e.count(), ..e.segment.clone() }).collect(),
            tags:     self.tags.clone(),
        }
    }

    fn ensure_building(&self, what: &str) -> Result<()> {
        match self.state {
            EncoderState::Building => Ok(()),
            state => Err(GsfError::Encode(format!("Cannot {what} once the encoder is {state:?}"))),
        }
    }

    fn entry_mut(&mut self, local_id: u16) -> Option<&mut SegmentEntry> {
        self.segments.iter_mut().find(|e| e.segment.local_id == local_id)
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_building("add a file tag")?;
        self.tags.push((key.into(), value.into()));
        Ok(())
    }

    /// Add a segment.  `local_id` defaults to one past the highest in use,
    /// `id` to a random UUID.  Returns the local id.
    pub fn add_segment(&mut self, local_id: Option<u16>, id: Option<Uuid>) -> Result<u16> {
        self.ensure_building("add a segment")?;
        let local_id = match local_id {
            Some(l) => l,
            None => match self.segments.iter().map(|e| e.segment.local_id).max() {
                None => 1,
                Some(max) => max
                    .checked_add(1)
                    .ok_or_else(|| GsfError::Encode("No local segment id left".into()))?,
            },
        };
        if self.entry_mut(local_id).is_some() {
            return Err(GsfError::Encode(format!("Segment with local id {local_id} already exists")));
        }
        let id = id.unwrap_or_else(Uuid::new_v4);
        debug!(local_id, %id, "added segment");
        self.segments.push(SegmentEntry {
            segment:      Segment::new(local_id, id),
            pending:      Vec::new(),
            written:      0,
            count_offset: None,
        });
        Ok(local_id)
    }

    pub fn add_segment_tag(&mut self, local_id: u16, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_building("add a segment tag")?;
        let entry = self
            .entry_mut(local_id)
            .ok_or_else(|| GsfError::Encode(format!("No segment with local id {local_id}")))?;
        entry.segment.tags.push((key.into(), value.into()));
        Ok(())
    }

    /// Add a grain to segment `local_id`.
    ///
    /// While building, the segment is created if it does not exist and the
    /// grain is held until the dump.  While streaming, the grain is written
    /// immediately and the segment must already exist.
    pub fn add_grain(&mut self, local_id: u16, grain: Grain) -> Result<()> {
        if let Some(Payload::Deferred { offset, length }) = grain.payload {
            return Err(GsfError::NotYetLoaded { offset, length });
        }
        match self.state {
            EncoderState::Building => {
                if self.entry_mut(local_id).is_none() {
                    self.add_segment(Some(local_id), None)?;
                }
                if let Some(entry) = self.entry_mut(local_id) {
                    entry.pending.push(grain);
                }
                Ok(())
            }
            EncoderState::Streaming => {
                let entry = self
                    .segments
                    .iter_mut()
                    .find(|e| e.segment.local_id == local_id)
                    .ok_or_else(|| GsfError::Encode(format!("No segment with local id {local_id}")))?;
                write_grain(&mut self.sink, local_id, &grain)?;
                entry.written += 1;
                Ok(())
            }
            EncoderState::Finalized => Err(GsfError::Encode("Cannot add a grain to a finalized encoder".into())),
        }
    }

    /// Write the header with unknown (`-1`) segment counts, then every
    /// grain added so far.  Later grains are written as they are added.
    pub fn start_dump(&mut self) -> Result<()> {
        self.ensure_building("start a dump")?;
        self.write_preamble(|_| COUNT_UNKNOWN)?;
        self.write_pending()?;
        self.state = EncoderState::Streaming;
        debug!(id = %self.id, segments = self.segments.len(), patchable = self.sink.can_patch(), "streaming dump started");
        Ok(())
    }

    /// Fill in the segment counts if the sink can seek, then write the
    /// terminator.
    pub fn end_dump(&mut self) -> Result<()> {
        if self.state != EncoderState::Streaming {
            return Err(GsfError::Encode(format!("Cannot end a dump while {:?}", self.state)));
        }
        if self.sink.can_patch() {
            for entry in &self.segments {
                if let Some(offset) = entry.count_offset {
                    self.sink.patch(offset, &entry.written.to_le_bytes())?;
                    trace!(local_id = entry.segment.local_id, count = entry.written, offset, "patched segment count");
                }
            }
        }
        self.finish()
    }

    /// Write the whole file at once with exact segment counts.
    pub fn dump(&mut self) -> Result<()> {
        self.ensure_building("dump")?;
        self.write_preamble(|e| e.pending.len() as i64)?;
        self.write_pending()?;
        self.finish()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn write_preamble<F>(&mut self, mut count: F) -> Result<()>
    where
        F: FnMut(&SegmentEntry) -> i64,
    {
        let header = FileHeader {
            id:       self.id,
            created:  self.created,
            segments: self.segments.iter().map(|e| Segment { count: count(e), ..e.segment.clone() }).collect(),
            tags:     self.tags.clone(),
        };

        self.sink.write_all(SIGNATURE)?;
        self.sink.write_u16_le(VERSION_MAJOR)?;
        self.sink.write_u16_le(VERSION_MINOR)?;
        let head_start = self.sink.position()?;
        let offsets = write_head(&mut self.sink, &header, |s| s.count)?;

        if self.sink.can_patch() {
            for (entry, rel) in self.segments.iter_mut().zip(offsets) {
                entry.count_offset = Some(head_start + rel);
            }
        }
        Ok(())
    }

    fn write_pending(&mut self) -> Result<()> {
        for entry in &mut self.segments {
            for grain in entry.pending.drain(..) {
                write_grain(&mut self.sink, entry.segment.local_id, &grain)?;
                entry.written += 1;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        write_block_header(&mut self.sink, Tag::GRAI, 0)?;
        self.sink.flush()?;
        self.state = EncoderState::Finalized;
        let bytes = self.sink.position()?;
        debug!(
            id = %self.id,
            grains = self.segments.iter().map(|e| e.written).sum::<i64>(),
            bytes,
            "GSF dump finished"
        );
        Ok(())
    }
}

impl SegmentEntry {
    fn count(&self) -> i64 {
        self.written + self.pending.len() as i64
    }
}

// ── Grain blocks ─────────────────────────────────────────────────────────────

/// Total size of the `grai` block for `grain`.
pub fn grai_size(grain: &Grain) -> Result<u64> {
    let payload = grain.payload_bytes()?.map_or(0, <[u8]>::len) as u64;
    Ok(BLOCK_HEADER_SIZE + 2 + gbhd_size(&grain.meta) + BLOCK_HEADER_SIZE + payload)
}

/// Write one `grai` block: local id, `gbhd`, then `grdt` (always present,
/// empty for a grain without payload).
pub fn write_grain<W: Write + ?Sized>(w: &mut W, local_id: u16, grain: &Grain) -> Result<()> {
    let payload = grain.payload_bytes()?.unwrap_or(&[]);
    let grai = grai_size(grain)?;

    write_block_header(w, Tag::GRAI, checked_size(Tag::GRAI, grai)?)?;
    w.write_u16_le(local_id)?;
    write_gbhd(w, &grain.meta)?;
    write_block_header(w, Tag::GRDT, checked_size(Tag::GRDT, BLOCK_HEADER_SIZE + payload.len() as u64)?)?;
    w.write_all(payload)?;

    trace!(local_id, grain_type = %grain.grain_type(), size = grai, "wrote grain");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;
    use std::io::Cursor;

    #[test]
    fn test_stream_sink_counts_and_refuses_patch() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_all(b"abcdef").unwrap();
        assert_eq!(sink.position().unwrap(), 6);
        assert!(!sink.can_patch());
        assert!(sink.patch(0, b"x").is_err());
    }

    #[test]
    fn test_seekable_sink_patch_restores_position() {
        let mut sink = SeekableSink::new(Cursor::new(Vec::new()));
        sink.write_all(b"abcdef").unwrap();
        sink.patch(1, b"XY").unwrap();
        sink.write_all(b"g").unwrap();
        assert_eq!(sink.into_inner().into_inner(), b"aXYdefg");
    }

    #[test]
    fn test_empty_grain_block_size() {
        let grain = Grain::empty(Uuid::nil(), Uuid::nil(), Timestamp::default());
        // grai header + local id + gbhd (92) + empty grdt.
        assert_eq!(grai_size(&grain).unwrap(), 8 + 2 + 92 + 8);
        let mut out = Vec::new();
        write_grain(&mut out, 1, &grain).unwrap();
        assert_eq!(out.len(), 110);
        assert_eq!(&out[..4], b"grai");
        assert_eq!(&out[102..], b"grdt\x08\0\0\0");
    }

    #[test]
    fn test_state_machine() {
        let mut enc = GsfEncoder::new(Cursor::new(Vec::new()));
        assert_eq!(enc.add_segment(None, None).unwrap(), 1);
        assert_eq!(enc.add_segment(None, None).unwrap(), 2);
        assert!(enc.add_segment(Some(1), None).is_err());
        assert!(enc.end_dump().is_err());

        enc.start_dump().unwrap();
        assert_eq!(enc.state(), EncoderState::Streaming);
        assert!(enc.add_segment(None, None).is_err());
        assert!(enc.add_tag("k", "v").is_err());
        assert!(enc.add_grain(9, Grain::empty(Uuid::nil(), Uuid::nil(), Timestamp::default())).is_err());

        enc.end_dump().unwrap();
        assert_eq!(enc.state(), EncoderState::Finalized);
        assert!(enc.add_grain(1, Grain::empty(Uuid::nil(), Uuid::nil(), Timestamp::default())).is_err());
        assert!(enc.dump().is_err());
    }

    #[test]
    fn test_deferred_payload_rejected() {
        let mut enc = GsfEncoder::streaming(Vec::new());
        let grain = Grain::empty(Uuid::nil(), Uuid::nil(), Timestamp::default())
            .with_payload(Payload::Deferred { offset: 10, length: 4 });
        assert!(matches!(enc.add_grain(1, grain), Err(GsfError::NotYetLoaded { offset: 10, length: 4 })));
    }
}
