//! Raw audio/video frame containers and buffer copy helpers.

use crate::result::{Error, Result};

/// ARGB32 pixel value for opaque black (little-endian `0xAARRGGBB`).
pub const ARGB32_BLACK: u32 = 0xFF00_0000;

/// Interleaved 32-bit ARGB frame, rows `stride` bytes apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argb32Frame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
}

impl Argb32Frame {
    pub fn black(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        let data = ARGB32_BLACK.to_le_bytes().repeat(pixels);
        Self {
            width,
            height,
            stride: width as usize * 4,
            data,
        }
    }
}

/// Planar YUV 4:2:0 frame with an optional alpha plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420AFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub a: Option<Vec<u8>>,
    pub stride_y: usize,
    pub stride_u: usize,
    pub stride_v: usize,
    pub stride_a: usize,
}

impl I420AFrame {
    pub fn chroma_size(width: u32, height: u32) -> (u32, u32) {
        ((width + 1) / 2, (height + 1) / 2)
    }

    pub fn black(width: u32, height: u32) -> Self {
        let luma = width as usize * height as usize;
        let (cw, ch) = Self::chroma_size(width, height);
        let chroma = cw as usize * ch as usize;
        Self {
            width,
            height,
            y: vec![0; luma],
            u: vec![128; chroma],
            v: vec![128; chroma],
            a: Some(vec![255; luma]),
            stride_y: width as usize,
            stride_u: cw as usize,
            stride_v: cw as usize,
            stride_a: width as usize,
        }
    }
}

/// A video frame in one of the two layouts exchanged with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoFrame {
    Argb32(Argb32Frame),
    I420A(I420AFrame),
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        match self {
            VideoFrame::Argb32(f) => f.width,
            VideoFrame::I420A(f) => f.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            VideoFrame::Argb32(f) => f.height,
            VideoFrame::I420A(f) => f.height,
        }
    }

    /// Solid black frame with the same layout and resolution.
    pub fn black_like(&self) -> Self {
        match self {
            VideoFrame::Argb32(f) => VideoFrame::Argb32(Argb32Frame::black(f.width, f.height)),
            VideoFrame::I420A(f) => VideoFrame::I420A(I420AFrame::black(f.width, f.height)),
        }
    }
}

/// Interleaved signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per channel
    pub frames: u32,
    pub data: Vec<i16>,
}

impl AudioFrame {
    pub const BITS_PER_SAMPLE: u32 = 16;

    pub fn silence(sample_rate: u32, channels: u32, frames: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frames,
            data: vec![0; frames as usize * channels as usize],
        }
    }

    pub fn silence_like(&self) -> Self {
        Self::silence(self.sample_rate, self.channels, self.frames)
    }

    /// Whether every sample lies within `tolerance` of zero.
    ///
    /// Muted audio is near-silence; consumers compare with a small tolerance
    /// rather than against exact zero.
    pub fn is_near_silent(&self, tolerance: i16) -> bool {
        self.data.iter().all(|s| s.unsigned_abs() <= tolerance.unsigned_abs())
    }
}

/// Copy `rows` rows of `row_bytes` bytes between strided buffers.
///
/// Both strides must be at least `row_bytes`. When both buffers are tightly
/// packed the copy is a single block; otherwise it proceeds row by row.
pub fn copy_stride(
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<()> {
    if dst_stride < row_bytes || src_stride < row_bytes {
        return Err(Error::InvalidParameter(format!(
            "stride smaller than row size (dst {}, src {}, row {})",
            dst_stride, src_stride, row_bytes
        )));
    }
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    let span = |stride: usize| (rows - 1) * stride + row_bytes;
    if dst.len() < span(dst_stride) || src.len() < span(src_stride) {
        return Err(Error::InvalidParameter("buffer too small for strided copy".into()));
    }

    if dst_stride == row_bytes && src_stride == row_bytes {
        let total = row_bytes * rows;
        dst[..total].copy_from_slice(&src[..total]);
    } else {
        for row in 0..rows {
            let d = row * dst_stride;
            let s = row * src_stride;
            dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_argb() {
        let f = Argb32Frame::black(2, 2);
        assert_eq!(f.data.len(), 16);
        assert_eq!(&f.data[..4], &[0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_black_i420a_odd_size() {
        let f = I420AFrame::black(3, 3);
        assert_eq!(f.y.len(), 9);
        assert_eq!(f.u.len(), 4);
        assert!(f.u.iter().chain(f.v.iter()).all(|&c| c == 128));
        assert!(f.y.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_black_like_keeps_geometry() {
        let src = VideoFrame::Argb32(Argb32Frame {
            width: 4,
            height: 2,
            stride: 16,
            data: vec![0x7F; 32],
        });
        let black = src.black_like();
        assert_eq!((black.width(), black.height()), (4, 2));
        assert_ne!(black, src);
    }

    #[test]
    fn test_silence() {
        let a = AudioFrame::silence(48000, 2, 480);
        assert_eq!(a.data.len(), 960);
        assert!(a.is_near_silent(0));

        let mut noisy = a.clone();
        noisy.data[3] = -4;
        assert!(noisy.is_near_silent(5));
        assert!(!noisy.is_near_silent(3));
    }

    #[test]
    fn test_copy_stride_packed() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 12];
        copy_stride(&mut dst, 4, &src, 4, 4, 3).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_copy_stride_row_by_row() {
        // 2 rows of 3 bytes, source padded to 5, destination padded to 4
        let src = [1, 2, 3, 9, 9, 4, 5, 6, 9, 9];
        let mut dst = [0u8; 7];
        copy_stride(&mut dst, 4, &src, 5, 3, 2).unwrap();
        assert_eq!(dst, [1, 2, 3, 0, 4, 5, 6]);
    }

    #[test]
    fn test_copy_stride_rejects_bad_strides() {
        let src = [0u8; 8];
        let mut dst = [0u8; 8];
        assert!(copy_stride(&mut dst, 2, &src, 4, 4, 2).is_err());
        assert!(copy_stride(&mut dst, 4, &src, 4, 4, 3).is_err());
    }
}
