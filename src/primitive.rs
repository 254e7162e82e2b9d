//! Fixed-layout primitives shared by every GSF block.
//!
//! # Endianness
//! Integers are stored least-significant byte first at widths of 1, 2, 4,
//! 6 or 8 bytes.  Signed values are two's complement at their stored
//! width.  Every read reports the stream offset it started at when it
//! fails, so callers never need to track positions for diagnostics.

use std::io::{self, Read, Seek, Write};

use byteorder::LittleEndian;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use uuid::Uuid;

use crate::error::{GsfError, Result};
use crate::rational::Rational;
use crate::timestamp::Timestamp;

/// Maximum byte length of a length-prefixed string.
pub const MAX_VARSTRING_LEN: usize = u16::MAX as usize;

/// On-disk sizes of the composite primitives.
pub const UUID_SIZE:      u64 = 16;
pub const DATETIME_SIZE:  u64 = 7;
pub const TIMESTAMP_SIZE: u64 = 10;
pub const RATIONAL_SIZE:  u64 = 8;

fn map_eof(offset: u64, wanted: usize) -> impl FnOnce(io::Error) -> GsfError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            GsfError::UnexpectedEof { offset, wanted }
        } else {
            GsfError::Io(e)
        }
    }
}

fn width_mask(n: usize) -> u64 {
    if n >= 8 { u64::MAX } else { (1u64 << (8 * n)) - 1 }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// UTF-8 sequence.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Number of bytes `write_varstring` emits for `s`, prefix included.
pub fn varstring_size(s: &str) -> u64 {
    2 + truncate_utf8(s, MAX_VARSTRING_LEN).len() as u64
}

// ── Reading ──────────────────────────────────────────────────────────────────

pub trait GsfReadExt: Read + Seek {
    /// Fill `buf` completely, or return `false` if the stream was already
    /// at EOF.  A partially filled buffer is an `UnexpectedEof` error.
    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let offset = self.stream_position()?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(GsfError::UnexpectedEof { offset, wanted: buf.len() }),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let offset = self.stream_position()?;
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf).map_err(map_eof(offset, n))?;
        Ok(buf)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let offset = self.stream_position()?;
        let mut buf = [0u8; N];
        self.read_exact(&mut buf).map_err(map_eof(offset, N))?;
        Ok(buf)
    }

    fn read_uint(&mut self, n: usize) -> Result<u64> {
        let offset = self.stream_position()?;
        byteorder::ReadBytesExt::read_uint::<LittleEndian>(self, n).map_err(map_eof(offset, n))
    }

    fn read_sint(&mut self, n: usize) -> Result<i64> {
        let offset = self.stream_position()?;
        byteorder::ReadBytesExt::read_int::<LittleEndian>(self, n).map_err(map_eof(offset, n))
    }

    fn read_u8_le(&mut self) -> Result<u8> {
        Ok(self.read_uint(1)? as u8)
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_uint(1)? != 0)
    }

    /// Fixed-length UTF-8 string.
    fn read_string(&mut self, len: usize) -> Result<String> {
        let offset = self.stream_position()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map_err(|e| GsfError::InvalidString { offset, bytes: e.into_bytes() })
    }

    /// `u16` length prefix followed by that many bytes of UTF-8.
    fn read_varstring(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        self.read_string(len)
    }

    fn read_uuid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.read_array::<16>()?))
    }

    /// Calendar date-time: `i16` year then month, day, hour, minute and
    /// second as single bytes.
    fn read_datetime(&mut self) -> Result<NaiveDateTime> {
        let offset = self.stream_position()?;
        let year   = self.read_sint(2)? as i32;
        let month  = self.read_u8_le()? as u32;
        let day    = self.read_u8_le()? as u32;
        let hour   = self.read_u8_le()? as u32;
        let minute = self.read_u8_le()? as u32;
        let second = self.read_u8_le()? as u32;
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or_else(|| GsfError::decode_len(
                offset,
                DATETIME_SIZE,
                format!("Invalid date {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
            ))
    }

    /// Grain timestamp: 48-bit seconds then 32-bit nanoseconds.
    fn read_timestamp(&mut self) -> Result<Timestamp> {
        let seconds = self.read_uint(6)?;
        let nanoseconds = self.read_u32_le()?;
        Ok(Timestamp::new(seconds, nanoseconds))
    }

    /// `u32` numerator then `u32` denominator.  A zero on either side
    /// yields the zero rational.
    fn read_rational(&mut self) -> Result<Rational> {
        let numerator = self.read_u32_le()?;
        let denominator = self.read_u32_le()?;
        Ok(Rational::new(numerator, denominator))
    }
}

impl<R: Read + Seek + ?Sized> GsfReadExt for R {}

// ── Writing ──────────────────────────────────────────────────────────────────

pub trait GsfWriteExt: Write {
    /// Write the low `n` bytes of `value`.
    fn write_uint(&mut self, value: u64, n: usize) -> Result<()> {
        byteorder::WriteBytesExt::write_uint::<LittleEndian>(self, value & width_mask(n), n)?;
        Ok(())
    }

    /// Two's complement at width `n`.
    fn write_sint(&mut self, value: i64, n: usize) -> Result<()> {
        self.write_uint(value as u64, n)
    }

    fn write_u8_le(&mut self, value: u8) -> Result<()> {
        self.write_uint(value as u64, 1)
    }

    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_uint(value as u64, 2)
    }

    fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_uint(value as u64, 4)
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8_le(value as u8)
    }

    /// Write `s` into exactly `len` bytes, NUL padded or truncated.
    fn write_fixed_string(&mut self, s: &str, len: usize) -> Result<()> {
        let s = truncate_utf8(s, len);
        self.write_all(s.as_bytes())?;
        self.write_all(&vec![0u8; len - s.len()])?;
        Ok(())
    }

    /// Strings longer than 65535 bytes are truncated.
    fn write_varstring(&mut self, s: &str) -> Result<()> {
        let s = truncate_utf8(s, MAX_VARSTRING_LEN);
        self.write_u16_le(s.len() as u16)?;
        self.write_all(s.as_bytes())?;
        Ok(())
    }

    fn write_uuid(&mut self, id: &Uuid) -> Result<()> {
        self.write_all(id.as_bytes())?;
        Ok(())
    }

    fn write_datetime(&mut self, dt: &NaiveDateTime) -> Result<()> {
        let year = i16::try_from(dt.year())
            .map_err(|_| GsfError::Encode(format!("Year {} does not fit in 16 bits", dt.year())))?;
        self.write_sint(year as i64, 2)?;
        self.write_u8_le(dt.month() as u8)?;
        self.write_u8_le(dt.day() as u8)?;
        self.write_u8_le(dt.hour() as u8)?;
        self.write_u8_le(dt.minute() as u8)?;
        self.write_u8_le(dt.second() as u8)?;
        Ok(())
    }

    fn write_timestamp(&mut self, ts: &Timestamp) -> Result<()> {
        if ts.seconds() > Timestamp::MAX_SECONDS {
            return Err(GsfError::Encode(format!("Timestamp {ts} does not fit in 48-bit seconds")));
        }
        self.write_uint(ts.seconds(), 6)?;
        self.write_u32_le(ts.nanoseconds())
    }

    fn write_rational(&mut self, r: &Rational) -> Result<()> {
        self.write_u32_le(r.numerator())?;
        self.write_u32_le(r.denominator())
    }
}

impl<W: Write + ?Sized> GsfWriteExt for W {}
