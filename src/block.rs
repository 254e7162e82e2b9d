//! Block framing: a 4-byte ASCII tag, a `u32` total size (header
//! included), then the body.  Blocks nest; a parent's body is a fixed
//! field prefix followed by zero or more child blocks.
//!
//! Reading is positional.  A [`Block`] remembers where it started and how
//! long it is, and [`Block::close`] always seeks to its end, so trailing
//! bytes a reader does not understand are skipped rather than misparsed.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{GsfError, Result};
use crate::primitive::{GsfReadExt, GsfWriteExt};

/// Size of the tag + length envelope.
pub const BLOCK_HEADER_SIZE: u64 = 8;

// ── Tag ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag([u8; 4]);

impl Tag {
    pub const HEAD: Tag = Tag(*b"head");
    pub const SEGM: Tag = Tag(*b"segm");
    pub const TAG:  Tag = Tag(*b"tag ");
    pub const GRAI: Tag = Tag(*b"grai");
    pub const GBHD: Tag = Tag(*b"gbhd");
    pub const TILS: Tag = Tag(*b"tils");
    pub const VGHD: Tag = Tag(*b"vghd");
    pub const CGHD: Tag = Tag(*b"cghd");
    pub const AGHD: Tag = Tag(*b"aghd");
    pub const CAHD: Tag = Tag(*b"cahd");
    pub const EGHD: Tag = Tag(*b"eghd");
    pub const COMP: Tag = Tag(*b"comp");
    pub const UNOF: Tag = Tag(*b"unof");
    pub const GRDT: Tag = Tag(*b"grdt");

    pub const fn new(bytes: [u8; 4]) -> Self {
        Tag(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:?})", String::from_utf8_lossy(&self.0))
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

/// What [`Block::open`] does with a block whose tag is not the one asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnWrongTag {
    /// Seek past it and try the next block.
    Skip,
    /// Fail with a decode error.
    Fail,
}

/// An opened block: its tag, declared size and absolute start offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub tag:   Tag,
    pub size:  u32,
    pub start: u64,
}

impl Block {
    /// Read the block header at the current position.
    ///
    /// With `want` set, blocks carrying other tags are skipped or rejected
    /// according to `on_wrong`.  `limit` is the absolute offset no block may
    /// extend past (the parent's end, or the stream length).  Returns `None`
    /// when the stream (or `limit`) is reached before a block header.
    ///
    /// A declared size below the 8 header bytes, zero included, is a decode
    /// error at the block's own offset.
    pub fn open<R: Read + Seek + ?Sized>(
        r:        &mut R,
        want:     Option<Tag>,
        on_wrong: OnWrongTag,
        limit:    Option<u64>,
    ) -> Result<Option<Block>> {
        Self::read_header(r, want, on_wrong, limit, false)
    }

    /// Like [`Block::open`] for a required tag, but a zero-size block with
    /// that tag is returned as the end-of-sequence marker
    /// (see [`Block::is_terminator`]).
    pub fn open_or_terminator<R: Read + Seek + ?Sized>(
        r:        &mut R,
        want:     Tag,
        on_wrong: OnWrongTag,
        limit:    Option<u64>,
    ) -> Result<Option<Block>> {
        Self::read_header(r, Some(want), on_wrong, limit, true)
    }

    fn read_header<R: Read + Seek + ?Sized>(
        r:          &mut R,
        want:       Option<Tag>,
        on_wrong:   OnWrongTag,
        limit:      Option<u64>,
        terminator: bool,
    ) -> Result<Option<Block>> {
        loop {
            let start = r.stream_position()?;
            if let Some(limit) = limit {
                if start + BLOCK_HEADER_SIZE > limit {
                    return Ok(None);
                }
            }

            let mut raw = [0u8; 4];
            if !r.read_exact_or_eof(&mut raw)? {
                return Ok(None);
            }
            if std::str::from_utf8(&raw).is_err() {
                return Err(GsfError::decode_len(start, 4, format!("Invalid block tag {}", hex::encode(raw))));
            }
            let tag = Tag(raw);
            let size = r.read_u32_le()?;
            let block = Block { tag, size, start };
            let wanted = want.map_or(true, |w| w == tag);

            if size == 0 && wanted && terminator {
                return Ok(Some(block));
            }
            if (size as u64) < BLOCK_HEADER_SIZE {
                return Err(GsfError::decode_len(
                    start,
                    size as u64,
                    format!("Block {tag} is smaller than its own header"),
                ));
            }
            if let Some(limit) = limit {
                if block.end() > limit {
                    return Err(GsfError::decode_len(
                        start,
                        size as u64,
                        format!("Block {tag} overruns its container ending at offset {limit}"),
                    ));
                }
            }

            if wanted {
                return Ok(Some(block));
            }
            match on_wrong {
                OnWrongTag::Fail => {
                    return Err(GsfError::decode_len(
                        start,
                        size as u64,
                        format!("Expected {} block, found {tag}", want.unwrap_or(tag)),
                    ));
                }
                OnWrongTag::Skip => {
                    debug!(%tag, offset = start, size, "skipping block");
                    block.close(r)?;
                }
            }
        }
    }

    /// Absolute offset one past the last byte of this block.
    pub fn end(&self) -> u64 {
        self.start + self.size as u64
    }

    /// The zero-size end-of-sequence marker.
    pub fn is_terminator(&self) -> bool {
        self.size == 0
    }

    /// Offset of the first body byte.
    pub fn body_start(&self) -> u64 {
        self.start + BLOCK_HEADER_SIZE
    }

    /// Bytes left in the block after the current stream position.
    pub fn remaining<R: Seek + ?Sized>(&self, r: &mut R) -> Result<u64> {
        let pos = r.stream_position()?;
        self.end().checked_sub(pos).ok_or_else(|| {
            GsfError::decode_len(
                self.start,
                self.size as u64,
                format!("Read {} bytes past the end of block {}", pos - self.end(), self.tag),
            )
        })
    }

    /// True when at least one more child block header fits in this block.
    ///
    /// With `strict`, a tail too short to hold a header is a decode error
    /// rather than padding.
    pub fn has_child<R: Seek + ?Sized>(&self, r: &mut R, strict: bool) -> Result<bool> {
        let remaining = self.remaining(r)?;
        if remaining >= BLOCK_HEADER_SIZE {
            return Ok(true);
        }
        if remaining > 0 && strict {
            let pos = r.stream_position()?;
            return Err(GsfError::decode_len(
                pos,
                remaining,
                format!("Partial block inside {}", self.tag),
            ));
        }
        Ok(false)
    }

    /// Open the next child block, whatever its tag.  The previous child
    /// must have been closed.
    pub fn next_child<R: Read + Seek + ?Sized>(&self, r: &mut R, strict: bool) -> Result<Option<Block>> {
        if !self.has_child(r, strict)? {
            return Ok(None);
        }
        let pos = r.stream_position()?;
        Block::open(r, None, OnWrongTag::Skip, Some(self.end()))?
            .map(Some)
            .ok_or(GsfError::UnexpectedEof { offset: pos, wanted: BLOCK_HEADER_SIZE as usize })
    }

    /// Open the first remaining child tagged `want`.
    pub fn find_child<R: Read + Seek + ?Sized>(
        &self,
        r:        &mut R,
        want:     Tag,
        on_wrong: OnWrongTag,
        strict:   bool,
    ) -> Result<Option<Block>> {
        if !self.has_child(r, strict)? {
            return Ok(None);
        }
        Block::open(r, Some(want), on_wrong, Some(self.end()))
    }

    /// Seek to the end of the block, discarding anything unread.
    pub fn close<R: Seek + ?Sized>(&self, r: &mut R) -> Result<()> {
        r.seek(SeekFrom::Start(self.end()))?;
        Ok(())
    }
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Check a precomputed block size (header included) against the `u32`
/// length field.
pub fn checked_size(tag: Tag, size: u64) -> Result<u32> {
    u32::try_from(size)
        .map_err(|_| GsfError::Encode(format!("Block {tag} of {size} bytes exceeds the 4 GiB block limit")))
}

/// Write a block envelope.  `size` is the total size, header included.
pub fn write_block_header<W: Write + ?Sized>(w: &mut W, tag: Tag, size: u32) -> Result<()> {
    w.write_all(tag.as_bytes())?;
    w.write_u32_le(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn block(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_block_header(&mut out, Tag::new(*tag), 8 + body.len() as u32).unwrap();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_open_skips_unwanted_tags() {
        let mut data = block(b"dumy", &[1, 2, 3]);
        data.extend(block(b"head", &[9, 9]));
        let mut c = Cursor::new(data);

        let head = Block::open(&mut c, Some(Tag::HEAD), OnWrongTag::Skip, None).unwrap().unwrap();
        assert_eq!(head.tag, Tag::HEAD);
        assert_eq!(head.start, 11);
        assert_eq!(head.size, 10);
        assert_eq!(head.remaining(&mut c).unwrap(), 2);
    }

    #[test]
    fn test_open_wrong_tag_fails_when_asked() {
        let mut c = Cursor::new(block(b"dumy", &[]));
        let err = Block::open(&mut c, Some(Tag::GBHD), OnWrongTag::Fail, None).unwrap_err();
        assert!(matches!(err, GsfError::Decode { offset: 0, .. }));
    }

    #[test]
    fn test_open_at_eof_is_none() {
        let mut c = Cursor::new(block(b"dumy", &[0; 4]));
        assert!(Block::open(&mut c, Some(Tag::HEAD), OnWrongTag::Skip, None).unwrap().is_none());
    }

    #[test]
    fn test_invalid_tag_bytes() {
        let mut c = Cursor::new(vec![0xff, 0xfe, 0xfd, 0xfc, 8, 0, 0, 0]);
        let err = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap_err();
        assert!(matches!(err, GsfError::Decode { offset: 0, length: Some(4), .. }));
    }

    #[test]
    fn test_zero_size_only_for_wanted_tag() {
        let mut c = Cursor::new(b"grai\0\0\0\0".to_vec());
        let b = Block::open_or_terminator(&mut c, Tag::GRAI, OnWrongTag::Skip, None).unwrap().unwrap();
        assert!(b.is_terminator());

        let mut c = Cursor::new(b"dumy\0\0\0\0".to_vec());
        assert!(Block::open_or_terminator(&mut c, Tag::GRAI, OnWrongTag::Skip, None).is_err());
    }

    #[test]
    fn test_zero_size_rejected_at_own_offset() {
        let mut data = block(b"grai", &[]);
        data.extend_from_slice(b"grdt\0\0\0\0");
        let mut c = Cursor::new(data);
        c.seek(SeekFrom::Start(8)).unwrap();

        let err = Block::open(&mut c, Some(Tag::GRDT), OnWrongTag::Skip, None).unwrap_err();
        match err {
            GsfError::Decode { offset, reason, .. } => {
                assert_eq!(offset, 8);
                assert!(reason.contains("grdt"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        c.seek(SeekFrom::Start(8)).unwrap();
        assert!(Block::open(&mut c, None, OnWrongTag::Skip, None).is_err());
    }

    #[test]
    fn test_children_and_close() {
        let mut body = vec![0xaa, 0xbb];
        body.extend(block(b"tils", &[1]));
        body.extend(block(b"vghd", &[2, 3]));
        let mut data = block(b"gbhd", &body);
        data.extend(block(b"next", &[]));
        let mut c = Cursor::new(data);

        let parent = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        c.seek(SeekFrom::Current(2)).unwrap();

        let mut tags = Vec::new();
        while let Some(child) = parent.next_child(&mut c, true).unwrap() {
            tags.push(child.tag);
            child.close(&mut c).unwrap();
        }
        assert_eq!(tags, vec![Tag::TILS, Tag::VGHD]);
        assert_eq!(parent.remaining(&mut c).unwrap(), 0);

        parent.close(&mut c).unwrap();
        let next = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        assert_eq!(next.tag, Tag::new(*b"next"));
    }

    #[test]
    fn test_partial_child_is_strict_error() {
        let data = block(b"segm", &[0, 0, 0]);
        let mut c = Cursor::new(data);
        let parent = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        assert!(parent.has_child(&mut c, true).is_err());
        assert!(!parent.has_child(&mut c, false).unwrap());
    }

    #[test]
    fn test_child_overrunning_parent() {
        let mut body = Vec::new();
        write_block_header(&mut body, Tag::TAG, 64).unwrap();
        let mut c = Cursor::new(block(b"segm", &body));
        let parent = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        let err = parent.next_child(&mut c, true).unwrap_err();
        assert!(matches!(err, GsfError::Decode { offset: 8, length: Some(64), .. }));
    }

    #[test]
    fn test_undersized_block() {
        let mut c = Cursor::new(b"head\x04\0\0\0".to_vec());
        assert!(Block::open(&mut c, Some(Tag::HEAD), OnWrongTag::Skip, None).is_err());
    }
}
