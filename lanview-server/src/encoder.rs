//! Still-image frame encoder.
//!
//! Every session codec is served as JPEG; the frame metadata reports
//! the codec actually produced so clients can tell.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, RgbImage};
use lanview_core::{Codec, EncodedFrame, RawScreenFrame, RemoteError};

use crate::config::ResizeConfig;

/// Largest box a frame is scaled down into, aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitInside {
    pub width: u32,
    pub height: u32,
}

impl FitInside {
    pub fn from_config(cfg: &ResizeConfig) -> Option<Self> {
        (cfg.enabled && cfg.width > 0 && cfg.height > 0).then_some(Self {
            width: cfg.width,
            height: cfg.height,
        })
    }

    /// Target size for a `w` x `h` source. Never upscales.
    pub fn target(&self, w: u32, h: u32) -> (u32, u32) {
        if w <= self.width && h <= self.height {
            return (w, h);
        }
        let scale = f64::min(
            f64::from(self.width) / f64::from(w),
            f64::from(self.height) / f64::from(h),
        );
        let tw = (f64::from(w) * scale).round().max(1.0) as u32;
        let th = (f64::from(h) * scale).round().max(1.0) as u32;
        (tw, th)
    }
}

/// JPEG encoder with optional downscale.
#[derive(Debug, Clone, Default)]
pub struct JpegEncoder {
    resize: Option<FitInside>,
}

impl JpegEncoder {
    pub fn new(resize: Option<FitInside>) -> Self {
        Self { resize }
    }

    /// Encode `frame` at `quality` (1-100).
    pub fn encode(&self, frame: &RawScreenFrame, quality: u8) -> Result<EncodedFrame, RemoteError> {
        if !frame.is_consistent() {
            return Err(RemoteError::Encode(format!(
                "bitmap too small for {}x{} (stride {}, {} bytes)",
                frame.width,
                frame.height,
                frame.stride,
                frame.data.len()
            )));
        }

        let img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, frame.to_rgb8())
            .ok_or_else(|| RemoteError::Encode("invalid image dimensions".into()))?;

        let img = match self.resize.map(|fit| fit.target(frame.width, frame.height)) {
            Some((w, h)) if (w, h) != (frame.width, frame.height) => {
                imageops::resize(&img, w, h, FilterType::Triangle)
            }
            _ => img,
        };

        let mut buf = Cursor::new(Vec::new());
        let encoder = ImageJpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        img.write_with_encoder(encoder)
            .map_err(|e| RemoteError::Encode(format!("JPEG encode failed: {e}")))?;

        Ok(EncodedFrame {
            width: img.width(),
            height: img.height(),
            codec: Codec::Jpeg,
            data: buf.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ScreenCapturer, TestPattern};
    use std::time::Duration;

    fn frame(w: u32, h: u32) -> RawScreenFrame {
        TestPattern::new(w, h).capture(Duration::ZERO).unwrap()
    }

    #[test]
    fn encodes_jpeg() {
        let out = JpegEncoder::default().encode(&frame(64, 48), 70).unwrap();
        assert_eq!(out.codec, Codec::Jpeg);
        assert_eq!((out.width, out.height), (64, 48));
        assert_eq!(&out.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let f = frame(160, 120);
        let enc = JpegEncoder::default();
        let high = enc.encode(&f, 90).unwrap();
        let low = enc.encode(&f, 10).unwrap();
        assert!(low.size() < high.size());
    }

    #[test]
    fn fit_inside_preserves_aspect() {
        let fit = FitInside {
            width: 1280,
            height: 720,
        };
        assert_eq!(fit.target(2560, 1440), (1280, 720));
        assert_eq!(fit.target(1920, 1200), (1152, 720));
        assert_eq!(fit.target(800, 600), (800, 600));
    }

    #[test]
    fn resize_applies_before_encoding() {
        let enc = JpegEncoder::new(Some(FitInside {
            width: 32,
            height: 32,
        }));
        let out = enc.encode(&frame(128, 64), 70).unwrap();
        assert_eq!((out.width, out.height), (32, 16));
    }

    #[test]
    fn disabled_resize_config_yields_none() {
        assert_eq!(FitInside::from_config(&ResizeConfig::default()), None);
    }

    #[test]
    fn truncated_bitmap_is_rejected() {
        let mut f = frame(16, 16);
        f.data.truncate(8);
        let err = JpegEncoder::default().encode(&f, 70).unwrap_err();
        assert!(matches!(err, RemoteError::Encode(_)));
    }
}
