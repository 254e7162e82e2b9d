//! File header (`head`) with its segment (`segm`) and tag (`tag `) children.

use std::io::{Read, Seek, Write};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::block::{checked_size, write_block_header, Block, Tag, BLOCK_HEADER_SIZE};
use crate::error::Result;
use crate::primitive::{varstring_size, GsfReadExt, GsfWriteExt, DATETIME_SIZE, UUID_SIZE};

/// Grain count written for a segment whose length is not yet known.
pub const COUNT_UNKNOWN: i64 = -1;

const HEAD_FIXED_SIZE: u64 = BLOCK_HEADER_SIZE + UUID_SIZE + DATETIME_SIZE;
const SEGM_FIXED_SIZE: u64 = BLOCK_HEADER_SIZE + 2 + UUID_SIZE + 8;
/// Offset of the count field inside a `segm` block.
const SEGM_COUNT_OFFSET: u64 = BLOCK_HEADER_SIZE + 2 + UUID_SIZE;

/// A `(key, value)` string pair.
pub type TagPair = (String, String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub local_id: u16,
    pub id:       Uuid,
    /// Number of grains, or [`COUNT_UNKNOWN`] when written by a streaming
    /// encoder that could not go back to fill it in.
    pub count:    i64,
    pub tags:     Vec<TagPair>,
}

impl Segment {
    pub fn new(local_id: u16, id: Uuid) -> Self {
        Self { local_id, id, count: 0, tags: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub id:       Uuid,
    pub created:  NaiveDateTime,
    pub segments: Vec<Segment>,
    pub tags:     Vec<TagPair>,
}

impl FileHeader {
    pub fn segment(&self, local_id: u16) -> Option<&Segment> {
        self.segments.iter().find(|s| s.local_id == local_id)
    }
}

// ── Sizes ────────────────────────────────────────────────────────────────────

pub fn tag_block_size(key: &str, value: &str) -> u64 {
    BLOCK_HEADER_SIZE + varstring_size(key) + varstring_size(value)
}

pub fn segm_size(segment: &Segment) -> u64 {
    SEGM_FIXED_SIZE + segment.tags.iter().map(|(k, v)| tag_block_size(k, v)).sum::<u64>()
}

pub fn head_size(header: &FileHeader) -> u64 {
    HEAD_FIXED_SIZE
        + header.segments.iter().map(segm_size).sum::<u64>()
        + header.tags.iter().map(|(k, v)| tag_block_size(k, v)).sum::<u64>()
}

// ── Decoding ─────────────────────────────────────────────────────────────────

fn decode_tag<R: Read + Seek + ?Sized>(r: &mut R, block: &Block) -> Result<TagPair> {
    let key = r.read_varstring()?;
    let value = r.read_varstring()?;
    block.remaining(r)?;
    Ok((key, value))
}

fn decode_segm<R: Read + Seek + ?Sized>(r: &mut R, segm: &Block, strict: bool) -> Result<Segment> {
    let local_id = r.read_u16_le()?;
    let id = r.read_uuid()?;
    let count = r.read_sint(8)?;
    let mut segment = Segment { local_id, id, count, tags: Vec::new() };

    while let Some(child) = segm.next_child(r, strict)? {
        if child.tag == Tag::TAG {
            segment.tags.push(decode_tag(r, &child)?);
        } else {
            debug!(tag = %child.tag, offset = child.start, "ignoring unknown block in segm");
        }
        child.close(r)?;
    }
    Ok(segment)
}

/// Decode the body of an opened `head` block.  The caller closes it.
pub fn decode_head<R: Read + Seek + ?Sized>(r: &mut R, head: &Block, strict: bool) -> Result<FileHeader> {
    let id = r.read_uuid()?;
    let created = r.read_datetime()?;
    let mut header = FileHeader { id, created, segments: Vec::new(), tags: Vec::new() };

    while let Some(child) = head.next_child(r, strict)? {
        match child.tag {
            Tag::SEGM => {
                let segment = decode_segm(r, &child, strict)?;
                debug!(local_id = segment.local_id, id = %segment.id, count = segment.count, "segment");
                header.segments.push(segment);
            }
            Tag::TAG => header.tags.push(decode_tag(r, &child)?),
            other => debug!(tag = %other, offset = child.start, "ignoring unknown block in head"),
        }
        child.close(r)?;
    }
    Ok(header)
}

// ── Encoding ─────────────────────────────────────────────────────────────────

fn write_tag<W: Write + ?Sized>(w: &mut W, key: &str, value: &str) -> Result<()> {
    write_block_header(w, Tag::TAG, checked_size(Tag::TAG, tag_block_size(key, value))?)?;
    w.write_varstring(key)?;
    w.write_varstring(value)
}

/// Write the `head` block.  `count_for` supplies each segment's count
/// field.  Returns, per segment, the offset of its count field relative
/// to the start of the `head` block, for later patching.
pub fn write_head<W, F>(w: &mut W, header: &FileHeader, mut count_for: F) -> Result<Vec<u64>>
where
    W: Write + ?Sized,
    F: FnMut(&Segment) -> i64,
{
    write_block_header(w, Tag::HEAD, checked_size(Tag::HEAD, head_size(header))?)?;
    w.write_uuid(&header.id)?;
    w.write_datetime(&header.created)?;

    let mut count_offsets = Vec::with_capacity(header.segments.len());
    let mut at = HEAD_FIXED_SIZE;
    for segment in &header.segments {
        let size = segm_size(segment);
        write_block_header(w, Tag::SEGM, checked_size(Tag::SEGM, size)?)?;
        w.write_u16_le(segment.local_id)?;
        w.write_uuid(&segment.id)?;
        w.write_sint(count_for(segment), 8)?;
        for (key, value) in &segment.tags {
            write_tag(w, key, value)?;
        }
        count_offsets.push(at + SEGM_COUNT_OFFSET);
        at += size;
    }

    for (key, value) in &header.tags {
        write_tag(w, key, value)?;
    }
    Ok(count_offsets)
}
