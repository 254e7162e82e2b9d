//! Grain header (`gbhd`) codec.
//!
//! A `gbhd` body is a fixed 84-byte prefix (ids, 16 reserved bytes,
//! origin/sync timestamps, rate, duration), then child blocks: at most one
//! `tils` with time labels and at most one type child (`vghd`, `cghd`,
//! `aghd`, `cahd` or `eghd`), in either order.  No type child means an
//! empty grain.  The encoder always writes `tils` first.
//!
//! Encoding is single pass: every block size is computed up front from
//! the header contents so the length field precedes the body.

use std::io::{Read, Seek, Write};

use crate::block::{checked_size, write_block_header, Block, OnWrongTag, Tag, BLOCK_HEADER_SIZE};
use crate::error::{GsfError, Result};
use crate::grain::video::assign_offsets;
use crate::grain::{
    AudioHeader, CodedAudioHeader, CodedVideoHeader, CogAudioFormat, CogFrameFormat, CogFrameLayout,
    Component, GrainBody, GrainMeta, TimeLabel, VideoHeader, TIMELABEL_TAG_LEN,
};
use crate::primitive::{GsfReadExt, GsfWriteExt, RATIONAL_SIZE, TIMESTAMP_SIZE, UUID_SIZE};

/// Bytes of the fixed `gbhd` prefix.
pub const GBHD_PREFIX_SIZE: u64 = 3 * UUID_SIZE + 2 * TIMESTAMP_SIZE + 2 * RATIONAL_SIZE;
/// Bytes of one encoded time label.
pub const TIMELABEL_SIZE: u64 = TIMELABEL_TAG_LEN as u64 + 4 + RATIONAL_SIZE + 1;

const VGHD_SIZE: u64 = BLOCK_HEADER_SIZE + 5 * 4 + 2 * RATIONAL_SIZE;
const CGHD_SIZE: u64 = BLOCK_HEADER_SIZE + 6 * 4 + 1 + 4;
const AGHD_SIZE: u64 = BLOCK_HEADER_SIZE + 4 + 2 + 4 + 4;
const CAHD_SIZE: u64 = BLOCK_HEADER_SIZE + 4 + 2 + 4 * 4;
const EGHD_SIZE: u64 = BLOCK_HEADER_SIZE + 1;
const COMPONENT_SIZE: u64 = 4 * 4;

// ── Sizes ────────────────────────────────────────────────────────────────────

fn tils_size(timelabels: &[TimeLabel]) -> u64 {
    if timelabels.is_empty() {
        0
    } else {
        BLOCK_HEADER_SIZE + 2 + TIMELABEL_SIZE * timelabels.len() as u64
    }
}

fn comp_size(components: &[Component]) -> u64 {
    if components.is_empty() {
        0
    } else {
        BLOCK_HEADER_SIZE + 2 + COMPONENT_SIZE * components.len() as u64
    }
}

fn unof_size(unit_offsets: &[u32]) -> u64 {
    if unit_offsets.is_empty() {
        0
    } else {
        BLOCK_HEADER_SIZE + 2 + 4 * unit_offsets.len() as u64
    }
}

/// Size of the type child block, zero for an empty grain.
pub fn body_size(body: &GrainBody) -> u64 {
    match body {
        GrainBody::Empty         => 0,
        GrainBody::Video(v)      => VGHD_SIZE + comp_size(&v.components),
        GrainBody::CodedVideo(c) => CGHD_SIZE + unof_size(&c.unit_offsets),
        GrainBody::Audio(_)      => AGHD_SIZE,
        GrainBody::CodedAudio(_) => CAHD_SIZE,
        GrainBody::Event         => EGHD_SIZE,
    }
}

/// Total size of the `gbhd` block for `meta`, header included.
pub fn gbhd_size(meta: &GrainMeta) -> u64 {
    BLOCK_HEADER_SIZE + GBHD_PREFIX_SIZE + tils_size(&meta.timelabels) + body_size(&meta.body)
}

fn count_u16(what: &str, n: usize) -> Result<u16> {
    u16::try_from(n).map_err(|_| GsfError::Encode(format!("Too many {what}: {n} (at most 65535)")))
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode the body of an opened `gbhd` block.  The caller closes it.
pub fn decode_gbhd<R: Read + Seek + ?Sized>(r: &mut R, gbhd: &Block, strict: bool) -> Result<GrainMeta> {
    let source_id = r.read_uuid()?;
    let flow_id = r.read_uuid()?;
    r.read_array::<16>()?;
    let origin_timestamp = r.read_timestamp()?;
    let sync_timestamp = r.read_timestamp()?;
    let rate = r.read_rational()?;
    let duration = r.read_rational()?;
    gbhd.remaining(r)?;

    let mut timelabels = None;
    let mut body = None;
    while let Some(child) = gbhd.next_child(r, strict)? {
        let duplicate = match child.tag {
            Tag::TILS if timelabels.is_some() => Some("tils"),
            Tag::TILS => {
                timelabels = Some(decode_tils(r, &child)?);
                None
            }
            _ if body.is_some() => Some("type"),
            _ => {
                body = Some(decode_body(r, &child, strict)?);
                None
            }
        };
        if let Some(what) = duplicate {
            return Err(GsfError::decode_len(
                child.start,
                child.size as u64,
                format!("Second {what} block {} in gbhd", child.tag),
            ));
        }
        child.close(r)?;
    }
    let timelabels = timelabels.unwrap_or_default();
    let body = body.unwrap_or(GrainBody::Empty);

    Ok(GrainMeta {
        source_id,
        flow_id,
        origin_timestamp,
        sync_timestamp,
        creation_timestamp: None,
        rate,
        duration,
        timelabels,
        body,
    })
}

fn decode_tils<R: Read + Seek + ?Sized>(r: &mut R, tils: &Block) -> Result<Vec<TimeLabel>> {
    let count = r.read_u16_le()?;
    let mut labels = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = r.read_string(TIMELABEL_TAG_LEN)?;
        labels.push(TimeLabel {
            tag:                   tag.trim_end_matches('\0').to_owned(),
            frames_since_midnight: r.read_u32_le()?,
            frame_rate:            r.read_rational()?,
            drop_frame:            r.read_bool()?,
        });
    }
    tils.remaining(r)?;
    Ok(labels)
}

fn decode_body<R: Read + Seek + ?Sized>(r: &mut R, block: &Block, strict: bool) -> Result<GrainBody> {
    let body = match block.tag {
        Tag::VGHD => GrainBody::Video(decode_vghd(r, block, strict)?),
        Tag::CGHD => GrainBody::CodedVideo(decode_cghd(r, block, strict)?),
        Tag::AGHD => GrainBody::Audio(AudioHeader {
            format:      CogAudioFormat(r.read_u32_le()?),
            channels:    r.read_u16_le()?,
            samples:     r.read_u32_le()?,
            sample_rate: r.read_u32_le()?,
        }),
        Tag::CAHD => GrainBody::CodedAudio(CodedAudioHeader {
            format:      CogAudioFormat(r.read_u32_le()?),
            channels:    r.read_u16_le()?,
            samples:     r.read_u32_le()?,
            priming:     r.read_u32_le()?,
            remainder:   r.read_u32_le()?,
            sample_rate: r.read_u32_le()?,
        }),
        Tag::EGHD => {
            r.read_u8_le()?;
            GrainBody::Event
        }
        other => {
            return Err(GsfError::decode_len(
                block.start,
                block.size as u64,
                format!("Unknown type {other} at offset {}", block.start),
            ));
        }
    };
    block.remaining(r)?;
    Ok(body)
}

fn decode_vghd<R: Read + Seek + ?Sized>(r: &mut R, vghd: &Block, strict: bool) -> Result<VideoHeader> {
    let mut header = VideoHeader {
        format:              CogFrameFormat(r.read_u32_le()?),
        layout:              CogFrameLayout(r.read_u32_le()?),
        width:               r.read_u32_le()?,
        height:              r.read_u32_le()?,
        extension:           r.read_u32_le()?,
        source_aspect_ratio: r.read_rational()?.non_zero(),
        pixel_aspect_ratio:  r.read_rational()?.non_zero(),
        components:          Vec::new(),
    };

    if let Some(comp) = vghd.find_child(r, Tag::COMP, OnWrongTag::Skip, strict)? {
        let count = r.read_u16_le()?;
        header.components.reserve(count as usize);
        for _ in 0..count {
            let width = r.read_u32_le()?;
            let height = r.read_u32_le()?;
            let stride = r.read_u32_le()?;
            let length = r.read_u32_le()?;
            header.components.push(Component::new(width, height, stride, length));
        }
        comp.remaining(r)?;
        comp.close(r)?;
        assign_offsets(&mut header.components);
    }
    Ok(header)
}

fn decode_cghd<R: Read + Seek + ?Sized>(r: &mut R, cghd: &Block, strict: bool) -> Result<CodedVideoHeader> {
    let mut header = CodedVideoHeader {
        format:          CogFrameFormat(r.read_u32_le()?),
        layout:          CogFrameLayout(r.read_u32_le()?),
        origin_width:    r.read_u32_le()?,
        origin_height:   r.read_u32_le()?,
        coded_width:     r.read_u32_le()?,
        coded_height:    r.read_u32_le()?,
        is_key_frame:    r.read_bool()?,
        temporal_offset: r.read_sint(4)? as i32,
        unit_offsets:    Vec::new(),
    };

    if let Some(unof) = cghd.find_child(r, Tag::UNOF, OnWrongTag::Skip, strict)? {
        let count = r.read_u16_le()?;
        header.unit_offsets.reserve(count as usize);
        for _ in 0..count {
            header.unit_offsets.push(r.read_u32_le()?);
        }
        unof.remaining(r)?;
        unof.close(r)?;
    }
    Ok(header)
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Write a complete `gbhd` block for `meta`.
pub fn write_gbhd<W: Write + ?Sized>(w: &mut W, meta: &GrainMeta) -> Result<()> {
    write_block_header(w, Tag::GBHD, checked_size(Tag::GBHD, gbhd_size(meta))?)?;
    w.write_uuid(&meta.source_id)?;
    w.write_uuid(&meta.flow_id)?;
    w.write_all(&[0u8; 16])?;
    w.write_timestamp(&meta.origin_timestamp)?;
    w.write_timestamp(&meta.sync_timestamp)?;
    w.write_rational(&meta.rate)?;
    w.write_rational(&meta.duration)?;

    if !meta.timelabels.is_empty() {
        let count = count_u16("time labels", meta.timelabels.len())?;
        write_block_header(w, Tag::TILS, checked_size(Tag::TILS, tils_size(&meta.timelabels))?)?;
        w.write_u16_le(count)?;
        for label in &meta.timelabels {
            w.write_fixed_string(&label.tag, TIMELABEL_TAG_LEN)?;
            w.write_u32_le(label.frames_since_midnight)?;
            w.write_rational(&label.frame_rate)?;
            w.write_bool(label.drop_frame)?;
        }
    }

    write_body(w, &meta.body)
}

fn write_body<W: Write + ?Sized>(w: &mut W, body: &GrainBody) -> Result<()> {
    match body {
        GrainBody::Empty => Ok(()),
        GrainBody::Video(v) => {
            write_block_header(w, Tag::VGHD, checked_size(Tag::VGHD, body_size(body))?)?;
            w.write_u32_le(v.format.0)?;
            w.write_u32_le(v.layout.0)?;
            w.write_u32_le(v.width)?;
            w.write_u32_le(v.height)?;
            w.write_u32_le(v.extension)?;
            w.write_rational(&v.source_aspect_ratio.unwrap_or_default())?;
            w.write_rational(&v.pixel_aspect_ratio.unwrap_or_default())?;
            if !v.components.is_empty() {
                let count = count_u16("components", v.components.len())?;
                write_block_header(w, Tag::COMP, checked_size(Tag::COMP, comp_size(&v.components))?)?;
                w.write_u16_le(count)?;
                for c in &v.components {
                    w.write_u32_le(c.width)?;
                    w.write_u32_le(c.height)?;
                    w.write_u32_le(c.stride)?;
                    w.write_u32_le(c.length)?;
                }
            }
            Ok(())
        }
        GrainBody::CodedVideo(c) => {
            write_block_header(w, Tag::CGHD, checked_size(Tag::CGHD, body_size(body))?)?;
            w.write_u32_le(c.format.0)?;
            w.write_u32_le(c.layout.0)?;
            w.write_u32_le(c.origin_width)?;
            w.write_u32_le(c.origin_height)?;
            w.write_u32_le(c.coded_width)?;
            w.write_u32_le(c.coded_height)?;
            w.write_bool(c.is_key_frame)?;
            w.write_sint(c.temporal_offset as i64, 4)?;
            if !c.unit_offsets.is_empty() {
                let count = count_u16("unit offsets", c.unit_offsets.len())?;
                write_block_header(w, Tag::UNOF, checked_size(Tag::UNOF, unof_size(&c.unit_offsets))?)?;
                w.write_u16_le(count)?;
                for offset in &c.unit_offsets {
                    w.write_u32_le(*offset)?;
                }
            }
            Ok(())
        }
        GrainBody::Audio(a) => {
            write_block_header(w, Tag::AGHD, AGHD_SIZE as u32)?;
            w.write_u32_le(a.format.0)?;
            w.write_u16_le(a.channels)?;
            w.write_u32_le(a.samples)?;
            w.write_u32_le(a.sample_rate)
        }
        GrainBody::CodedAudio(a) => {
            write_block_header(w, Tag::CAHD, CAHD_SIZE as u32)?;
            w.write_u32_le(a.format.0)?;
            w.write_u16_le(a.channels)?;
            w.write_u32_le(a.samples)?;
            w.write_u32_le(a.priming)?;
            w.write_u32_le(a.remainder)?;
            w.write_u32_le(a.sample_rate)
        }
        GrainBody::Event => {
            write_block_header(w, Tag::EGHD, EGHD_SIZE as u32)?;
            w.write_u8_le(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::Rational;
    use crate::timestamp::Timestamp;
    use std::io::{Cursor, SeekFrom};
    use uuid::Uuid;

    fn meta(body: GrainBody) -> GrainMeta {
        GrainMeta::new(
            Uuid::from_u128(0x1111),
            Uuid::from_u128(0x2222),
            Timestamp::new(1_417_179_210, 40_000_000),
            body,
        )
    }

    fn encode_then_decode(m: &GrainMeta) -> (GrainMeta, Vec<u8>) {
        let mut out = Vec::new();
        write_gbhd(&mut out, m).unwrap();
        assert_eq!(out.len() as u64, gbhd_size(m));

        let mut c = Cursor::new(out.clone());
        let gbhd = Block::open(&mut c, Some(Tag::GBHD), OnWrongTag::Fail, None).unwrap().unwrap();
        let decoded = decode_gbhd(&mut c, &gbhd, true).unwrap();
        assert_eq!(gbhd.remaining(&mut c).unwrap(), 0);
        (decoded, out)
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(GBHD_PREFIX_SIZE, 84);
        assert_eq!(TIMELABEL_SIZE, 29);
        assert_eq!(gbhd_size(&meta(GrainBody::Empty)), 92);

        let mut v = VideoHeader::new(CogFrameFormat::U8_420, CogFrameLayout::FULL_FRAME, 16, 16).unwrap();
        assert_eq!(body_size(&GrainBody::Video(v.clone())), 44 + 10 + 16 * 3);
        v.components.clear();
        assert_eq!(body_size(&GrainBody::Video(v)), 44);
        assert_eq!(body_size(&GrainBody::Event), 9);
    }

    #[test]
    fn test_empty_grain() {
        let m = meta(GrainBody::Empty);
        let (decoded, bytes) = encode_then_decode(&m);
        assert_eq!(decoded, m);
        assert_eq!(&bytes[..4], b"gbhd");
        assert_eq!(&bytes[40..56], &[0u8; 16]);
    }

    #[test]
    fn test_timelabels() {
        let mut m = meta(GrainBody::Event);
        m.timelabels = vec![
            TimeLabel {
                tag:                   "tc".into(),
                frames_since_midnight: 1_234_567,
                frame_rate:            Rational::new(25, 1),
                drop_frame:            false,
            },
            TimeLabel {
                tag:                   "a-sixteen-byte-t".into(),
                frames_since_midnight: 0,
                frame_rate:            Rational::new(30000, 1001),
                drop_frame:            true,
            },
        ];
        let (decoded, _) = encode_then_decode(&m);
        assert_eq!(decoded, m);
    }

    #[test]
    fn test_video_aspect_ratios_optional() {
        let mut v = VideoHeader::new(CogFrameFormat::U8_422, CogFrameLayout::SEPARATE_FIELDS, 1920, 1080).unwrap();
        let (decoded, _) = encode_then_decode(&meta(GrainBody::Video(v.clone())));
        assert_eq!(decoded.body, GrainBody::Video(v.clone()));

        v.source_aspect_ratio = Some(Rational::new(16, 9));
        v.pixel_aspect_ratio = Some(Rational::new(1, 1));
        let (decoded, _) = encode_then_decode(&meta(GrainBody::Video(v.clone())));
        assert_eq!(decoded.body, GrainBody::Video(v));
    }

    #[test]
    fn test_coded_video_unit_offsets() {
        let mut c = CodedVideoHeader::new(CogFrameFormat::H264, 1920, 1080);
        c.coded_height = 1088;
        c.is_key_frame = true;
        c.temporal_offset = -2;
        c.unit_offsets = vec![0, 17, 1024];
        let (decoded, _) = encode_then_decode(&meta(GrainBody::CodedVideo(c.clone())));
        assert_eq!(decoded.body, GrainBody::CodedVideo(c.clone()));

        c.unit_offsets.clear();
        let (decoded, _) = encode_then_decode(&meta(GrainBody::CodedVideo(c.clone())));
        assert_eq!(decoded.body, GrainBody::CodedVideo(c));
    }

    #[test]
    fn test_audio_bodies() {
        let a = AudioHeader { format: CogAudioFormat::S24_INTERLEAVED, channels: 2, samples: 1920, sample_rate: 48000 };
        let (decoded, _) = encode_then_decode(&meta(GrainBody::Audio(a)));
        assert_eq!(decoded.body, GrainBody::Audio(a));

        let ca = CodedAudioHeader {
            format:      CogAudioFormat::AAC,
            channels:    6,
            samples:     1024,
            priming:     2112,
            remainder:   13,
            sample_rate: 48000,
        };
        let (decoded, _) = encode_then_decode(&meta(GrainBody::CodedAudio(ca)));
        assert_eq!(decoded.body, GrainBody::CodedAudio(ca));
    }

    #[test]
    fn test_unknown_type_block() {
        let m = meta(GrainBody::Event);
        let mut out = Vec::new();
        write_gbhd(&mut out, &m).unwrap();
        let type_offset = out.len() - 9;
        out[type_offset..type_offset + 4].copy_from_slice(b"xghd");

        let mut c = Cursor::new(out);
        let gbhd = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        match decode_gbhd(&mut c, &gbhd, true) {
            Err(GsfError::Decode { offset, reason, .. }) => {
                assert_eq!(offset, type_offset as u64);
                assert!(reason.contains("Unknown type xghd"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    /// Re-wrap the children of an encoded gbhd in a new order.
    fn reorder_children(encoded: &[u8], children: &[&[u8]]) -> Vec<u8> {
        let prefix_end = (BLOCK_HEADER_SIZE + GBHD_PREFIX_SIZE) as usize;
        let mut body = encoded[8..prefix_end].to_vec();
        for child in children {
            body.extend_from_slice(child);
        }
        let mut out = Vec::new();
        write_block_header(&mut out, Tag::GBHD, 8 + body.len() as u32).unwrap();
        out.extend(body);
        out
    }

    #[test]
    fn test_timelabels_after_type_block() {
        let mut m = meta(GrainBody::Event);
        m.timelabels = vec![TimeLabel {
            tag:                   "tc".into(),
            frames_since_midnight: 90_000,
            frame_rate:            Rational::new(25, 1),
            drop_frame:            false,
        }];
        let mut out = Vec::new();
        write_gbhd(&mut out, &m).unwrap();
        let tils_at = (BLOCK_HEADER_SIZE + GBHD_PREFIX_SIZE) as usize;
        let eghd_at = tils_at + tils_size(&m.timelabels) as usize;
        let swapped = reorder_children(&out, &[&out[eghd_at..], &out[tils_at..eghd_at]]);

        let mut c = Cursor::new(swapped);
        let gbhd = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        assert_eq!(decode_gbhd(&mut c, &gbhd, true).unwrap(), m);
    }

    #[test]
    fn test_second_type_block_is_error() {
        let m = meta(GrainBody::Event);
        let mut out = Vec::new();
        write_gbhd(&mut out, &m).unwrap();
        let eghd = out[out.len() - EGHD_SIZE as usize..].to_vec();
        let doubled = reorder_children(&out, &[&eghd, &eghd]);
        let second_at = doubled.len() - EGHD_SIZE as usize;

        let mut c = Cursor::new(doubled);
        let gbhd = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        match decode_gbhd(&mut c, &gbhd, true) {
            Err(GsfError::Decode { offset, reason, .. }) => {
                assert_eq!(offset, second_at as u64);
                assert!(reason.contains("Second type block eghd"), "{reason}");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_bytes_in_type_block_are_skipped() {
        let a = AudioHeader { format: CogAudioFormat::S16_PLANES, channels: 1, samples: 10, sample_rate: 8000 };
        let m = meta(GrainBody::Audio(a));
        let mut out = Vec::new();
        write_gbhd(&mut out, &m).unwrap();
        // grow aghd and gbhd by four bytes of padding
        out.extend_from_slice(&[0xee; 4]);
        let aghd_at = out.len() - 4 - AGHD_SIZE as usize;
        out[aghd_at + 4..aghd_at + 8].copy_from_slice(&((AGHD_SIZE + 4) as u32).to_le_bytes());
        out[4..8].copy_from_slice(&((gbhd_size(&m) + 4) as u32).to_le_bytes());

        let mut c = Cursor::new(out);
        let gbhd = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        assert_eq!(decode_gbhd(&mut c, &gbhd, true).unwrap(), m);
        assert_eq!(c.seek(SeekFrom::Current(0)).unwrap(), gbhd.end());
    }

    #[test]
    fn test_component_count_overrunning_block() {
        let v = VideoHeader::new(CogFrameFormat::U8_444, CogFrameLayout::FULL_FRAME, 8, 8).unwrap();
        let m = meta(GrainBody::Video(v));
        let mut out = Vec::new();
        write_gbhd(&mut out, &m).unwrap();
        let count_at = out.len() - 3 * COMPONENT_SIZE as usize - 2;
        out[count_at..count_at + 2].copy_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);

        let mut c = Cursor::new(out);
        let gbhd = Block::open(&mut c, None, OnWrongTag::Skip, None).unwrap().unwrap();
        assert!(matches!(decode_gbhd(&mut c, &gbhd, true), Err(GsfError::Decode { .. })));
    }
}
