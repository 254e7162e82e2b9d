use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace};

use super::{SIGNATURE, VERSION_MAJOR, VERSION_MINOR};
use crate::block::{Block, OnWrongTag, Tag};
use crate::error::{GsfError, Result};
use crate::gbhd::decode_gbhd;
use crate::grain::{Grain, GrainMeta, Payload};
use crate::header::{decode_head, FileHeader};
use crate::primitive::GsfReadExt;

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`GsfDecoder`].
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Treat 1-7 stray bytes at the end of a block as a decode error.
    pub strict_blocks: bool,
    /// Return payloads as [`Payload::Deferred`] byte ranges instead of
    /// reading them.
    pub lazy_payloads: bool,
    /// Drop payloads entirely; every grain comes back with `None`.
    pub skip_payloads: bool,
    /// Only return grains from these segments.  `None` returns all.
    pub local_ids:     Option<Vec<u16>>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            strict_blocks: true,
            lazy_payloads: false,
            skip_payloads: false,
            local_ids:     None,
        }
    }
}

// ── GrainFactory ─────────────────────────────────────────────────────────────

/// Builds the caller's grain representation from decoded metadata and
/// payload.
pub trait GrainFactory {
    type Grain;
    fn build(&mut self, local_id: u16, meta: GrainMeta, payload: Option<Payload>) -> Self::Grain;
}

/// Produces plain [`Grain`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGrainFactory;

impl GrainFactory for DefaultGrainFactory {
    type Grain = Grain;

    fn build(&mut self, _local_id: u16, meta: GrainMeta, payload: Option<Payload>) -> Grain {
        Grain::new(meta, payload)
    }
}

impl<G, F> GrainFactory for F
where
    F: FnMut(u16, GrainMeta, Option<Payload>) -> G,
{
    type Grain = G;

    fn build(&mut self, local_id: u16, meta: GrainMeta, payload: Option<Payload>) -> G {
        self(local_id, meta, payload)
    }
}

// ── GsfFile ──────────────────────────────────────────────────────────────────

/// A fully decoded file: the header plus every grain, grouped by segment
/// local id in stream order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GsfFile<G = Grain> {
    pub header:   FileHeader,
    pub segments: BTreeMap<u16, Vec<G>>,
}

// ── GsfDecoder ───────────────────────────────────────────────────────────────

pub struct GsfDecoder<R: Read + Seek, F = DefaultGrainFactory> {
    reader:     R,
    options:    DecoderOptions,
    factory:    F,
    header:     Option<FileHeader>,
    stream_len: u64,
    done:       bool,
}

impl GsfDecoder<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> GsfDecoder<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, DecoderOptions::default())
    }

    pub fn with_options(reader: R, options: DecoderOptions) -> Result<Self> {
        GsfDecoder::with_factory(reader, options, DefaultGrainFactory)
    }
}

impl<R: Read + Seek, F: GrainFactory> GsfDecoder<R, F> {
    /// Decoding starts at the reader's current position.
    pub fn with_factory(mut reader: R, options: DecoderOptions, factory: F) -> Result<Self> {
        let here = reader.stream_position()?;
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(here))?;
        Ok(Self { reader, options, factory, header: None, stream_len, done: false })
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// The file header, once read.
    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// Read the signature, version and `head` block.  Idempotent.
    pub fn read_file_header(&mut self) -> Result<&FileHeader> {
        let header = match self.header.take() {
            Some(h) => h,
            None    => self.decode_file_header()?,
        };
        Ok(self.header.insert(header))
    }

    fn decode_file_header(&mut self) -> Result<FileHeader> {
        let r = &mut self.reader;
        let offset = r.stream_position()?;
        let found = r.read_array::<8>()?;
        if &found != SIGNATURE {
            return Err(GsfError::BadFileType { offset, found });
        }
        let major = r.read_u16_le()?;
        let minor = r.read_u16_le()?;
        if (major, minor) != (VERSION_MAJOR, VERSION_MINOR) {
            return Err(GsfError::BadVersion { major, minor });
        }

        let head = Block::open(r, Some(Tag::HEAD), OnWrongTag::Skip, Some(self.stream_len))?
            .ok_or_else(|| GsfError::decode(self.stream_len, "No head block found"))?;
        let header = decode_head(r, &head, self.options.strict_blocks)?;
        head.close(r)?;

        debug!(
            id = %header.id,
            created = %header.created,
            segments = header.segments.len(),
            tags = header.tags.len(),
            "read GSF file header"
        );
        Ok(header)
    }

    /// Decode the next grain and the local id of its segment.  `None` once
    /// the sequence has ended.  After an error the decoder yields nothing
    /// further.
    pub fn next_grain(&mut self) -> Result<Option<(u16, F::Grain)>> {
        let next = self.read_next_grain();
        if next.is_err() {
            self.done = true;
        }
        next
    }

    fn read_next_grain(&mut self) -> Result<Option<(u16, F::Grain)>> {
        if self.header.is_none() {
            self.read_file_header()?;
        }
        let strict = self.options.strict_blocks;

        while !self.done {
            let r = &mut self.reader;
            let grai = match Block::open_or_terminator(r, Tag::GRAI, OnWrongTag::Skip, Some(self.stream_len)) {
                Ok(Some(b)) => b,
                Ok(None) => {
                    debug!("stream ended without a terminating grai block");
                    self.done = true;
                    break;
                }
                Err(e) if e.is_eof() => {
                    debug!(error = %e, "stream ended inside a block header after the last grain");
                    self.done = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            if grai.is_terminator() {
                trace!(offset = grai.start, "grain terminator");
                self.done = true;
                break;
            }

            let local_id = r.read_u16_le()?;
            if let Some(ids) = &self.options.local_ids {
                if !ids.contains(&local_id) {
                    grai.close(r)?;
                    continue;
                }
            }

            let gbhd = grai
                .find_child(r, Tag::GBHD, OnWrongTag::Fail, strict)?
                .ok_or_else(|| GsfError::decode_len(grai.start, grai.size as u64, "grai block has no gbhd block"))?;
            let meta = decode_gbhd(r, &gbhd, strict)?;
            gbhd.close(r)?;

            let payload = self.read_payload(&grai)?;
            grai.close(&mut self.reader)?;

            trace!(local_id, grain_type = %meta.grain_type(), offset = grai.start, "decoded grain");
            let grain = self.factory.build(local_id, meta, payload);
            return Ok(Some((local_id, grain)));
        }
        Ok(None)
    }

    fn read_payload(&mut self, grai: &Block) -> Result<Option<Payload>> {
        let r = &mut self.reader;
        let Some(grdt) = grai.find_child(r, Tag::GRDT, OnWrongTag::Skip, self.options.strict_blocks)? else {
            return Ok(None);
        };
        let length = grdt.remaining(r)?;
        let offset = r.stream_position()?;

        let payload = if length == 0 || self.options.skip_payloads {
            None
        } else if self.options.lazy_payloads {
            Some(Payload::Deferred { offset, length })
        } else {
            let len = usize::try_from(length)
                .map_err(|_| GsfError::decode_len(offset, length, "Payload too large for memory"))?;
            Some(Payload::Resolved(r.read_bytes(len)?))
        };
        grdt.close(r)?;
        Ok(payload)
    }

    /// Iterate over the remaining grains.
    pub fn grains(&mut self) -> Grains<'_, R, F> {
        Grains { decoder: self }
    }

    /// Decode the header (if not yet read) and every remaining grain.
    pub fn decode(&mut self) -> Result<GsfFile<F::Grain>> {
        let header = self.read_file_header()?.clone();
        let mut segments: BTreeMap<u16, Vec<F::Grain>> = BTreeMap::new();
        while let Some((local_id, grain)) = self.next_grain()? {
            segments.entry(local_id).or_default().push(grain);
        }
        Ok(GsfFile { header, segments })
    }

    /// Resolve a deferred payload produced by this decoder.
    pub fn load_payload(&mut self, payload: &mut Payload) -> Result<()> {
        payload.resolve(&mut self.reader)?;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Iterator returned by [`GsfDecoder::grains`].
pub struct Grains<'a, R: Read + Seek, F> {
    decoder: &'a mut GsfDecoder<R, F>,
}

impl<R: Read + Seek, F: GrainFactory> Iterator for Grains<'_, R, F> {
    type Item = Result<(u16, F::Grain)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_grain().transpose()
    }
}
