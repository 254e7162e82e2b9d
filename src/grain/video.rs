//! Raw video grain header and the COG frame format / layout codes.
//!
//! # Frame format bits
//! A `CogFrameFormat` is an opaque `u32` on disk, but its bits describe
//! the sample layout:
//!
//! | Bits   | Meaning |
//! |--------|---------|
//! | 0      | horizontal chroma subsampling (shift) |
//! | 1      | vertical chroma subsampling (shift) |
//! | 2-3    | bytes per sample: 0 = 1, 1 = 2, 2 = 4 |
//! | 8      | packed (all components interleaved in one plane) |
//! | 9      | compressed |
//! | 10-15  | active bits per sample |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GsfError, Result};
use crate::rational::Rational;

// ── CogFrameFormat ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CogFrameFormat(pub u32);

impl CogFrameFormat {
    pub const MJPEG:         Self = Self(0x0200);
    pub const DNXHD:         Self = Self(0x0201);
    pub const MPEG2:         Self = Self(0x0202);
    pub const AVCI:          Self = Self(0x0203);
    pub const H264:          Self = Self(0x0204);
    pub const DV:            Self = Self(0x0205);
    pub const D10:           Self = Self(0x0206);
    pub const VC2:           Self = Self(0x0207);
    pub const VP8:           Self = Self(0x0208);
    pub const H265:          Self = Self(0x0209);

    pub const U8_444:        Self = Self(0x2000);
    pub const U8_422:        Self = Self(0x2001);
    pub const U8_420:        Self = Self(0x2003);
    pub const S16_444_10BIT: Self = Self(0x2804);
    pub const S16_422_10BIT: Self = Self(0x2805);
    pub const S16_420_10BIT: Self = Self(0x2807);
    pub const S16_444_12BIT: Self = Self(0x3004);
    pub const S16_422_12BIT: Self = Self(0x3005);
    pub const S16_420_12BIT: Self = Self(0x3007);
    pub const S16_444:       Self = Self(0x4004);
    pub const S16_422:       Self = Self(0x4005);
    pub const S16_420:       Self = Self(0x4007);

    pub const YUYV:          Self = Self(0x2100);
    pub const UYVY:          Self = Self(0x2101);
    pub const AYUV:          Self = Self(0x2102);
    pub const RGB:           Self = Self(0x2104);
    pub const V216:          Self = Self(0x4105);
    pub const V210:          Self = Self(0x2906);
    pub const RGBX:          Self = Self(0x2110);
    pub const XRGB:          Self = Self(0x2111);
    pub const BGRX:          Self = Self(0x2112);
    pub const XBGR:          Self = Self(0x2113);
    pub const RGBA:          Self = Self(0x2114);
    pub const ARGB:          Self = Self(0x2115);
    pub const BGRA:          Self = Self(0x2116);
    pub const ABGR:          Self = Self(0x2117);

    pub const UNKNOWN:       Self = Self(0xffff_fffe);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    pub fn is_compressed(self) -> bool {
        !self.is_unknown() && (self.0 >> 9) & 1 == 1
    }

    pub fn is_packed(self) -> bool {
        !self.is_unknown() && !self.is_compressed() && (self.0 >> 8) & 1 == 1
    }

    pub fn is_planar(self) -> bool {
        !self.is_unknown() && (self.0 >> 8) & 0x3 == 0
    }

    pub fn h_shift(self) -> u32 {
        self.0 & 1
    }

    pub fn v_shift(self) -> u32 {
        (self.0 >> 1) & 1
    }

    pub fn bytes_per_value(self) -> u32 {
        match (self.0 >> 2) & 0x3 {
            0 => 1,
            1 => 2,
            _ => 4,
        }
    }

    pub fn active_bits(self) -> u32 {
        (self.0 >> 10) & 0x3f
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::MJPEG         => "MJPEG",
            Self::DNXHD         => "DNxHD",
            Self::MPEG2         => "MPEG2",
            Self::AVCI          => "AVCI",
            Self::H264          => "H264",
            Self::DV            => "DV",
            Self::D10           => "D10",
            Self::VC2           => "VC2",
            Self::VP8           => "VP8",
            Self::H265          => "H265",
            Self::U8_444        => "U8_444",
            Self::U8_422        => "U8_422",
            Self::U8_420        => "U8_420",
            Self::S16_444_10BIT => "S16_444_10BIT",
            Self::S16_422_10BIT => "S16_422_10BIT",
            Self::S16_420_10BIT => "S16_420_10BIT",
            Self::S16_444_12BIT => "S16_444_12BIT",
            Self::S16_422_12BIT => "S16_422_12BIT",
            Self::S16_420_12BIT => "S16_420_12BIT",
            Self::S16_444       => "S16_444",
            Self::S16_422       => "S16_422",
            Self::S16_420       => "S16_420",
            Self::YUYV          => "YUYV",
            Self::UYVY          => "UYVY",
            Self::AYUV          => "AYUV",
            Self::RGB           => "RGB",
            Self::V216          => "v216",
            Self::V210          => "v210",
            Self::RGBX          => "RGBx",
            Self::XRGB          => "xRGB",
            Self::BGRX          => "BGRx",
            Self::XBGR          => "xBGR",
            Self::RGBA          => "RGBA",
            Self::ARGB          => "ARGB",
            Self::BGRA          => "BGRA",
            Self::ABGR          => "ABGR",
            Self::UNKNOWN       => "UNKNOWN",
            _ => return None,
        })
    }
}

impl fmt::Debug for CogFrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "CogFrameFormat::{name}"),
            None       => write!(f, "CogFrameFormat(0x{:04x})", self.0),
        }
    }
}

// ── CogFrameLayout ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CogFrameLayout(pub u32);

impl CogFrameLayout {
    pub const FULL_FRAME:      Self = Self(0x00);
    pub const SEPARATE_FIELDS: Self = Self(0x01);
    pub const SINGLE_FIELD:    Self = Self(0x02);
    pub const MIXED_FIELDS:    Self = Self(0x03);
    pub const SEGMENTED_FRAME: Self = Self(0x04);
    pub const UNKNOWN:         Self = Self(0xffff_fffe);
}

// ── Components ───────────────────────────────────────────────────────────────

/// One plane of a video grain's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub width:  u32,
    pub height: u32,
    pub stride: u32,
    pub length: u32,
    /// Byte offset of the plane in the payload: the sum of the lengths of
    /// the planes before it.  Never stored on disk.
    pub offset: u32,
}

impl Component {
    pub fn new(width: u32, height: u32, stride: u32, length: u32) -> Self {
        Self { width, height, stride, length, offset: 0 }
    }
}

/// Recompute every component's offset as the running sum of the lengths
/// before it.
pub fn assign_offsets(components: &mut [Component]) {
    let mut offset = 0u32;
    for c in components {
        c.offset = offset;
        offset = offset.wrapping_add(c.length);
    }
}

fn div_ceil_shift(v: u32, shift: u32) -> u64 {
    (v as u64 + (1u64 << shift) - 1) >> shift
}

fn fit_u32(value: u64, what: &str, format: CogFrameFormat, width: u32, height: u32) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        GsfError::Encode(format!("{format:?} at {width}x{height}: {what} of {value} bytes exceeds 32 bits"))
    })
}

/// Default plane layout for `format` at `width` x `height`.
///
/// Planar formats give luma plus two chroma planes; packed formats give a
/// single interleaved plane; compressed and unknown formats give none.
/// Fails when a stride, plane length or total frame size does not fit
/// the 32-bit component fields.
pub fn default_components(format: CogFrameFormat, width: u32, height: u32) -> Result<Vec<Component>> {
    let plane = |w: u64, h: u64, stride: u64| -> Result<Component> {
        Ok(Component::new(
            fit_u32(w, "plane width", format, width, height)?,
            fit_u32(h, "plane height", format, width, height)?,
            fit_u32(stride, "stride", format, width, height)?,
            fit_u32(stride * h, "plane length", format, width, height)?,
        ))
    };
    let (w, h) = (width as u64, height as u64);

    let mut components = if format.is_planar() {
        let bpv = format.bytes_per_value() as u64;
        let cw = div_ceil_shift(width, format.h_shift());
        let ch = div_ceil_shift(height, format.v_shift());
        vec![plane(w, h, w * bpv)?, plane(cw, ch, cw * bpv)?, plane(cw, ch, cw * bpv)?]
    } else if format.is_packed() {
        let stride = match format {
            CogFrameFormat::YUYV | CogFrameFormat::UYVY => div_ceil_shift(width, 1) * 4,
            CogFrameFormat::V216 => div_ceil_shift(width, 1) * 8,
            CogFrameFormat::V210 => (w + 47) / 48 * 128,
            CogFrameFormat::RGB  => w * 3,
            _                    => w * 4,
        };
        vec![plane(w, h, stride)?]
    } else {
        Vec::new()
    };

    let total: u64 = components.iter().map(|c| c.length as u64).sum();
    fit_u32(total, "frame size", format, width, height)?;
    assign_offsets(&mut components);
    Ok(components)
}

// ── VideoHeader ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoHeader {
    pub format:              CogFrameFormat,
    pub layout:              CogFrameLayout,
    pub width:               u32,
    pub height:              u32,
    pub extension:           u32,
    pub source_aspect_ratio: Option<Rational>,
    pub pixel_aspect_ratio:  Option<Rational>,
    pub components:          Vec<Component>,
}

impl VideoHeader {
    /// Header with the default component layout for `format`.  Fails when
    /// the frame is too large for the 32-bit component fields.
    pub fn new(format: CogFrameFormat, layout: CogFrameLayout, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            format,
            layout,
            width,
            height,
            extension: 0,
            source_aspect_ratio: None,
            pixel_aspect_ratio: None,
            components: default_components(format, width, height)?,
        })
    }

    /// Replace the component list, deriving offsets.
    pub fn set_components(&mut self, components: impl IntoIterator<Item = Component>) {
        self.components = components.into_iter().collect();
        assign_offsets(&mut self.components);
    }

    /// Total payload bytes described by the components.
    pub fn expected_length(&self) -> u64 {
        self.components.iter().map(|c| c.length as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_420_layout() {
        let h = VideoHeader::new(CogFrameFormat::U8_420, CogFrameLayout::FULL_FRAME, 480, 270).unwrap();
        let lengths: Vec<u32> = h.components.iter().map(|c| c.length).collect();
        let offsets: Vec<u32> = h.components.iter().map(|c| c.offset).collect();
        assert_eq!(lengths, vec![480 * 270, 240 * 135, 240 * 135]);
        assert_eq!(offsets, vec![0, 129_600, 162_000]);
        assert_eq!(h.expected_length(), 194_400);
    }

    #[test]
    fn test_s16_422_10bit_layout() {
        let f = CogFrameFormat::S16_422_10BIT;
        assert!(f.is_planar());
        assert_eq!(f.active_bits(), 10);
        assert_eq!(f.bytes_per_value(), 2);

        let c = default_components(f, 1920, 1080).unwrap();
        assert_eq!(c[0].stride, 3840);
        assert_eq!((c[1].width, c[1].height, c[1].stride), (960, 1080, 1920));
        assert_eq!(c[2].offset, 3840 * 1080 + 1920 * 1080);
    }

    #[test]
    fn test_packed_and_compressed() {
        assert!(CogFrameFormat::V210.is_packed());
        let c = default_components(CogFrameFormat::V210, 1920, 1080).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].stride, 5120);

        let c = default_components(CogFrameFormat::UYVY, 720, 576).unwrap();
        assert_eq!((c[0].stride, c[0].length), (1440, 1440 * 576));

        assert!(CogFrameFormat::H264.is_compressed());
        assert!(default_components(CogFrameFormat::H264, 1920, 1080).unwrap().is_empty());
        assert!(default_components(CogFrameFormat::UNKNOWN, 1920, 1080).unwrap().is_empty());
    }

    #[test]
    fn test_set_components_derives_offsets() {
        let mut h = VideoHeader::new(CogFrameFormat::UNKNOWN, CogFrameLayout::UNKNOWN, 4, 4).unwrap();
        h.set_components([Component::new(4, 4, 4, 16), Component { offset: 99, ..Component::new(2, 2, 2, 4) }]);
        assert_eq!(h.components[1].offset, 16);
    }

    #[test]
    fn test_oversized_frames_are_rejected() {
        let err = VideoHeader::new(CogFrameFormat::U8_444, CogFrameLayout::FULL_FRAME, 70_000, 70_000).unwrap_err();
        assert!(matches!(err, GsfError::Encode(_)));
        let err = VideoHeader::new(CogFrameFormat::U8_420, CogFrameLayout::FULL_FRAME, u32::MAX, 2).unwrap_err();
        assert!(matches!(err, GsfError::Encode(_)));
        assert!(default_components(CogFrameFormat::RGBA, u32::MAX, 1).is_err());

        // each plane fits but the frame as a whole does not
        assert!(default_components(CogFrameFormat::U8_444, 40_000, 40_000).is_err());
        // compressed formats carry no planes, so any size is fine
        assert!(VideoHeader::new(CogFrameFormat::H264, CogFrameLayout::FULL_FRAME, u32::MAX, u32::MAX).is_ok());
    }

    #[test]
    fn test_debug_names() {
        assert_eq!(format!("{:?}", CogFrameFormat::U8_420), "CogFrameFormat::U8_420");
        assert_eq!(format!("{:?}", CogFrameFormat(0x1234)), "CogFrameFormat(0x1234)");
    }
}
