//! Frame types passed across the capture → encode → send pipeline.
//!
//! [`RawScreenFrame`] is what a capture provider hands back;
//! [`EncodedFrame`] is what the pacer ships. Neither is a wire type;
//! the wire carries a [`FrameMeta`](crate::protocol::FrameMeta) and the
//! encoded bytes.

use std::time::Instant;

use crate::protocol::Codec;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

// ── RawScreenFrame ───────────────────────────────────────────────

/// An uncompressed bitmap from the capture provider.
///
/// `data` holds `height` rows of `stride` bytes; `stride` may exceed
/// `width * bpp` when the OS pads rows.
#[derive(Debug, Clone)]
pub struct RawScreenFrame {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl RawScreenFrame {
    /// Total byte size the bitmap should occupy.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Whether `data` is large enough for the declared geometry.
    pub fn is_consistent(&self) -> bool {
        let min_stride = self.width as usize * self.format.bytes_per_pixel();
        (self.stride as usize) >= min_stride && self.data.len() >= self.byte_len()
    }

    /// Pack into tightly laid out RGB8, dropping padding and alpha.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height as usize {
            let row = &self.data[y * self.stride as usize..];
            for x in 0..self.width as usize {
                let px = &row[x * bpp..x * bpp + bpp];
                match self.format {
                    PixelFormat::Bgra8 => out.extend_from_slice(&[px[2], px[1], px[0]]),
                }
            }
        }
        out
    }
}

// ── FrameRequest / EncodedFrame ──────────────────────────────────

/// What the pacer asks the capture+encode collaborator for.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub monitor: u32,
    pub codec: Codec,
    pub quality: u8,
}

/// A compressed frame ready for the wire.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    /// Codec actually produced (may differ from the one requested).
    pub codec: Codec,
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
