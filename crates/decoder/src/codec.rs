//! Frame codecs
//!
//! Every codec writes tightly packed RGBA8 into a buffer the pool has already
//! sized to `width * height * 4`. `precheck` runs before that buffer is
//! leased, so a header that lies about its size never costs an allocation.

use std::io::Cursor;

use contracts::{CodecKind, InboundFrame, Surface};
use image::{ImageFormat, ImageReader};

use crate::DecodeError;

/// Largest accepted frame edge in pixels
pub const MAX_DIMENSION: u32 = 8192;

/// Payload decoder for one codec tag
pub trait FrameCodec: Send {
    fn kind(&self) -> CodecKind;

    /// Cheap payload checks against the frame header, before any surface is leased
    fn precheck(&self, _frame: &InboundFrame) -> Result<(), DecodeError> {
        Ok(())
    }

    /// Decode `frame` into `out` (already `width * height * 4` bytes)
    fn decode_into(&self, frame: &InboundFrame, out: &mut [u8]) -> Result<(), DecodeError>;
}

/// Reject empty or oversized frame headers
pub fn check_dimensions(frame: &InboundFrame) -> Result<(), DecodeError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(DecodeError::Dimensions {
            sequence: frame.sequence,
            width,
            height,
        });
    }
    Ok(())
}

/// Uncompressed RGBA8
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRgbaCodec;

impl FrameCodec for RawRgbaCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Raw
    }

    fn precheck(&self, frame: &InboundFrame) -> Result<(), DecodeError> {
        let expected = Surface::rgba_len(frame.width, frame.height);
        if frame.payload.len() != expected {
            return Err(DecodeError::SizeMismatch {
                sequence: frame.sequence,
                expected,
                actual: frame.payload.len(),
            });
        }
        Ok(())
    }

    fn decode_into(&self, frame: &InboundFrame, out: &mut [u8]) -> Result<(), DecodeError> {
        let expected = Surface::rgba_len(frame.width, frame.height);
        if frame.payload.len() != expected || out.len() != expected {
            return Err(DecodeError::SizeMismatch {
                sequence: frame.sequence,
                expected,
                actual: frame.payload.len(),
            });
        }
        out.copy_from_slice(&frame.payload);
        Ok(())
    }
}

/// PNG or JPEG through the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    kind: CodecKind,
    format: ImageFormat,
}

impl ImageCodec {
    pub fn png() -> Self {
        Self {
            kind: CodecKind::Png,
            format: ImageFormat::Png,
        }
    }

    pub fn jpeg() -> Self {
        Self {
            kind: CodecKind::Jpeg,
            format: ImageFormat::Jpeg,
        }
    }
}

impl FrameCodec for ImageCodec {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn precheck(&self, frame: &InboundFrame) -> Result<(), DecodeError> {
        let name = self.kind.as_str();
        let (width, height) = ImageReader::with_format(Cursor::new(&frame.payload[..]), self.format)
            .into_dimensions()
            .map_err(|e| DecodeError::codec(frame.sequence, name, e.to_string()))?;
        if (width, height) != (frame.width, frame.height) {
            return Err(DecodeError::codec(
                frame.sequence,
                name,
                format!(
                    "payload is {}x{}, header says {}x{}",
                    width, height, frame.width, frame.height
                ),
            ));
        }
        Ok(())
    }

    fn decode_into(&self, frame: &InboundFrame, out: &mut [u8]) -> Result<(), DecodeError> {
        let name = self.kind.as_str();
        let image = image::load_from_memory_with_format(&frame.payload, self.format)
            .map_err(|e| DecodeError::codec(frame.sequence, name, e.to_string()))?;

        if image.width() != frame.width || image.height() != frame.height {
            return Err(DecodeError::codec(
                frame.sequence,
                name,
                format!(
                    "decoded {}x{}, header says {}x{}",
                    image.width(),
                    image.height(),
                    frame.width,
                    frame.height
                ),
            ));
        }

        let rgba = image.into_rgba8();
        if rgba.as_raw().len() != out.len() {
            return Err(DecodeError::SizeMismatch {
                sequence: frame.sequence,
                expected: out.len(),
                actual: rgba.as_raw().len(),
            });
        }
        out.copy_from_slice(rgba.as_raw());
        Ok(())
    }
}

/// Codec registry keyed by codec tag
pub struct CodecSet {
    codecs: Vec<Box<dyn FrameCodec>>,
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.kind()))
            .finish()
    }
}

impl Default for CodecSet {
    fn default() -> Self {
        Self::empty()
            .with(RawRgbaCodec)
            .with(ImageCodec::png())
            .with(ImageCodec::jpeg())
    }
}

impl CodecSet {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register a codec, replacing any previous one for the same tag
    pub fn with(mut self, codec: impl FrameCodec + 'static) -> Self {
        self.codecs.retain(|c| c.kind() != codec.kind());
        self.codecs.push(Box::new(codec));
        self
    }

    pub fn supports(&self, kind: CodecKind) -> bool {
        self.codecs.iter().any(|c| c.kind() == kind)
    }

    fn codec_for(&self, frame: &InboundFrame) -> Result<&dyn FrameCodec, DecodeError> {
        check_dimensions(frame)?;
        self.codecs
            .iter()
            .find(|c| c.kind() == frame.codec)
            .map(|c| &**c)
            .ok_or(DecodeError::Unsupported {
                sequence: frame.sequence,
                codec: frame.codec.as_str(),
            })
    }

    /// Header and size checks that need no output buffer
    pub fn precheck(&self, frame: &InboundFrame) -> Result<(), DecodeError> {
        self.codec_for(frame)?.precheck(frame)
    }

    pub fn decode_into(&self, frame: &InboundFrame, out: &mut [u8]) -> Result<(), DecodeError> {
        self.codec_for(frame)?.decode_into(frame, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{PoseSample, StereoLayout};
    use image::RgbaImage;

    fn frame(codec: CodecKind, width: u32, height: u32, payload: Vec<u8>) -> InboundFrame {
        InboundFrame {
            sequence: 1,
            server_timestamp: 0.0,
            pose_sequence: 1,
            render_pose: PoseSample::paused(0.0),
            server_received_at: 0.0,
            received_at: 0.0,
            payload: Bytes::from(payload),
            width,
            height,
            stereo_layout: StereoLayout::Mono,
            codec,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, 7, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_raw_copies_payload() {
        let payload: Vec<u8> = (0..16).collect();
        let mut out = vec![0; 16];
        CodecSet::default()
            .decode_into(&frame(CodecKind::Raw, 2, 2, payload.clone()), &mut out)
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_raw_wrong_length_is_corrupt() {
        let mut out = vec![0; 16];
        let err = CodecSet::default()
            .decode_into(&frame(CodecKind::Raw, 2, 2, vec![1, 2, 3]), &mut out)
            .unwrap_err();
        assert!(matches!(err, DecodeError::SizeMismatch { expected: 16, actual: 3, .. }));
        assert_eq!(err.reason(), "corrupt");
    }

    #[test]
    fn test_png_decodes_to_rgba() {
        let mut out = vec![0; Surface::rgba_len(3, 2)];
        CodecSet::default()
            .decode_into(&frame(CodecKind::Png, 3, 2, png_bytes(3, 2)), &mut out)
            .unwrap();
        // row 1, column 2
        let i = (3 + 2) * 4;
        assert_eq!(&out[i..i + 4], &[2, 1, 7, 255]);
    }

    #[test]
    fn test_png_header_mismatch_and_garbage() {
        let codecs = CodecSet::default();
        let mut out = vec![0; Surface::rgba_len(4, 4)];
        assert!(codecs
            .decode_into(&frame(CodecKind::Png, 4, 4, png_bytes(3, 2)), &mut out)
            .is_err());
        assert!(codecs
            .decode_into(&frame(CodecKind::Png, 4, 4, vec![0xde, 0xad]), &mut out)
            .is_err());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let mut out = Vec::new();
        let err = CodecSet::default()
            .decode_into(&frame(CodecKind::Raw, 0, 4, Vec::new()), &mut out)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Dimensions { .. }));
    }

    #[test]
    fn test_unregistered_codec() {
        let codecs = CodecSet::empty().with(RawRgbaCodec);
        assert!(!codecs.supports(CodecKind::Jpeg));
        let mut out = vec![0; 16];
        let err = codecs
            .decode_into(&frame(CodecKind::Jpeg, 2, 2, vec![0; 16]), &mut out)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { .. }));
    }

    #[test]
    fn test_precheck_rejects_lying_headers() {
        let codecs = CodecSet::default();
        let raw = codecs.precheck(&frame(CodecKind::Raw, 8192, 8192, vec![0; 16])).unwrap_err();
        assert!(matches!(raw, DecodeError::SizeMismatch { actual: 16, .. }));

        assert!(codecs.precheck(&frame(CodecKind::Png, 8192, 8192, png_bytes(3, 2))).is_err());
        assert!(codecs.precheck(&frame(CodecKind::Png, 3, 2, vec![0xde, 0xad])).is_err());
        assert!(codecs.precheck(&frame(CodecKind::Png, 3, 2, png_bytes(3, 2))).is_ok());
        assert!(codecs.precheck(&frame(CodecKind::Raw, 2, 2, vec![0; 16])).is_ok());
    }
}
