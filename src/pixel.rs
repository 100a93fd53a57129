use crate::error::{AviError, Result};
use crate::header::ChannelMasks;
use crate::palette::Rgb;

/// Pixel layout tag of a bitmap frame.
///
/// Multi-byte pixels are stored the way device-independent bitmaps store
/// them: `Rgb24` is B, G, R in memory and `Argb32` is B, G, R, A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelFormat {
    // Indexed
    Indexed1 = 0,
    Indexed4 = 1,
    Indexed8 = 2,

    // 16-bit
    Gray16 = 3,
    Rgb555 = 4,
    Rgb565 = 5,
    Argb1555 = 6,

    // 24/32-bit
    Rgb24 = 7,
    Rgb32 = 8,
    Argb32 = 9,
    PArgb32 = 10,

    // 48/64-bit
    Rgb48 = 11,
    Argb64 = 12,
    PArgb64 = 13,

    // Flag values that do not name a concrete layout
    Undefined = 14,
    Indexed = 15,
    Gdi = 16,
    Alpha = 17,
    PAlpha = 18,
    Extended = 19,
    Canonical = 20,
}

impl PixelFormat {
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Indexed1),
            1 => Some(Self::Indexed4),
            2 => Some(Self::Indexed8),
            3 => Some(Self::Gray16),
            4 => Some(Self::Rgb555),
            5 => Some(Self::Rgb565),
            6 => Some(Self::Argb1555),
            7 => Some(Self::Rgb24),
            8 => Some(Self::Rgb32),
            9 => Some(Self::Argb32),
            10 => Some(Self::PArgb32),
            11 => Some(Self::Rgb48),
            12 => Some(Self::Argb64),
            13 => Some(Self::PArgb64),
            14 => Some(Self::Undefined),
            15 => Some(Self::Indexed),
            16 => Some(Self::Gdi),
            17 => Some(Self::Alpha),
            18 => Some(Self::PAlpha),
            19 => Some(Self::Extended),
            20 => Some(Self::Canonical),
            _ => None,
        }
    }

    /// Bit depth implied by the format.
    ///
    /// Only concrete layouts have a depth; the flag-style tags fail with
    /// [`AviError::UnsupportedFormat`].
    pub fn bits_per_pixel(self) -> Result<u16> {
        let bits = match self {
            Self::Indexed1 => 1,
            Self::Indexed4 => 4,
            Self::Indexed8 => 8,
            Self::Gray16 | Self::Rgb555 | Self::Rgb565 | Self::Argb1555 => 16,
            Self::Rgb24 => 24,
            Self::Rgb32 | Self::Argb32 | Self::PArgb32 => 32,
            Self::Rgb48 => 48,
            Self::Argb64 | Self::PArgb64 => 64,
            Self::Undefined
            | Self::Indexed
            | Self::Gdi
            | Self::Alpha
            | Self::PAlpha
            | Self::Extended
            | Self::Canonical => return Err(AviError::UnsupportedFormat(self)),
        };
        Ok(bits)
    }

    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Indexed1 | Self::Indexed4 | Self::Indexed8)
    }

    /// Masks for layouts a plain 16-bit DIB (5-5-5) cannot describe.
    pub fn channel_masks(self) -> Option<ChannelMasks> {
        match self {
            Self::Rgb565 => Some([0xF800, 0x07E0, 0x001F]),
            _ => None,
        }
    }
}

/// Bytes needed for one row of pixels without padding.
pub fn row_bytes(width: u32, bits_per_pixel: u16) -> usize {
    (width as usize * bits_per_pixel as usize + 7) / 8
}

/// Row length of a DIB: rows are padded to a 4-byte boundary.
pub fn dib_stride(width: u32, bits_per_pixel: u16) -> usize {
    (width as usize * bits_per_pixel as usize + 31) / 32 * 4
}

/// Depth a decoder hands out for rows stored at `bits_per_pixel`, when the
/// two differ.
pub fn decoded_depth(bits_per_pixel: u16) -> Option<u16> {
    match bits_per_pixel {
        1 => Some(4),
        48 | 64 => Some(32),
        _ => None,
    }
}

/// Repacks DIB rows from `from_bits` to the depth [`decoded_depth`] names.
///
/// 1-bit indices widen to 4-bit nibbles. 48- and 64-bit pixels keep the high
/// byte of each 16-bit channel as B, G, R, A; 48-bit rows get opaque alpha.
pub fn repack_rows(src: &[u8], width: u32, height: u32, from_bits: u16) -> Option<Vec<u8>> {
    let to_bits = decoded_depth(from_bits)?;
    let src_stride = dib_stride(width, from_bits);
    let dst_stride = dib_stride(width, to_bits);
    if width == 0 || height == 0 || src.len() < src_stride * height as usize {
        return None;
    }

    let mut out = vec![0u8; dst_stride * height as usize];
    for (src_row, dst_row) in src.chunks_exact(src_stride).zip(out.chunks_exact_mut(dst_stride)) {
        for x in 0..width as usize {
            if from_bits == 1 {
                let index = (src_row[x / 8] >> (7 - x % 8)) & 1;
                dst_row[x / 2] |= if x % 2 == 0 { index << 4 } else { index };
            } else {
                let size = from_bits as usize / 8;
                let px = &src_row[x * size..(x + 1) * size];
                let alpha = if from_bits == 64 { px[7] } else { 0xFF };
                dst_row[x * 4..x * 4 + 4].copy_from_slice(&[px[1], px[3], px[5], alpha]);
            }
        }
    }
    Some(out)
}

/// Borrowed view of one frame's pixels, top row first.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    pub palette: &'a [Rgb],
}

impl<'a> FrameBuffer<'a> {
    /// A frame whose rows are laid out at DIB stride.
    pub fn new(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let bits = format.bits_per_pixel()?;
        Ok(Self {
            data,
            width,
            height,
            stride: dib_stride(width, bits),
            format,
            palette: &[],
        })
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_palette(mut self, palette: &'a [Rgb]) -> Self {
        self.palette = palette;
        self
    }

    /// Checks that `data` covers every row the frame claims to have.
    pub fn validate(&self) -> Result<u16> {
        let bits = self.format.bits_per_pixel()?;
        if self.width == 0 || self.height == 0 {
            return Err(AviError::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let row = row_bytes(self.width, bits);
        if self.stride < row {
            return Err(AviError::InvalidFrame(format!(
                "stride {} shorter than row of {} bytes",
                self.stride, row
            )));
        }
        let needed = self.stride * (self.height as usize - 1) + row;
        if self.data.len() < needed {
            return Err(AviError::InvalidFrame(format!(
                "need {} bytes, have {}",
                needed,
                self.data.len()
            )));
        }
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bit_depths() {
        assert_eq!(PixelFormat::Indexed1.bits_per_pixel().unwrap(), 1);
        assert_eq!(PixelFormat::Indexed4.bits_per_pixel().unwrap(), 4);
        assert_eq!(PixelFormat::Indexed8.bits_per_pixel().unwrap(), 8);
        assert_eq!(PixelFormat::Rgb565.bits_per_pixel().unwrap(), 16);
        assert_eq!(PixelFormat::Rgb24.bits_per_pixel().unwrap(), 24);
        assert_eq!(PixelFormat::Argb32.bits_per_pixel().unwrap(), 32);
        assert_eq!(PixelFormat::Rgb48.bits_per_pixel().unwrap(), 48);
        assert_eq!(PixelFormat::PArgb64.bits_per_pixel().unwrap(), 64);
    }

    #[test]
    fn test_flag_formats_are_unsupported() {
        for format in [PixelFormat::Undefined, PixelFormat::Gdi, PixelFormat::Alpha] {
            assert!(matches!(
                format.bits_per_pixel(),
                Err(AviError::UnsupportedFormat(f)) if f == format
            ));
        }
    }

    #[test]
    fn test_from_u8_round_trips_tags() {
        for n in 0..=20u8 {
            assert_eq!(PixelFormat::from_u8(n).map(|f| f as u8), Some(n));
        }
        assert_eq!(PixelFormat::from_u8(21), None);
    }

    #[test]
    fn test_dib_stride_padding() {
        assert_eq!(dib_stride(1, 24), 4);
        assert_eq!(dib_stride(3, 24), 12);
        assert_eq!(dib_stride(5, 8), 8);
        assert_eq!(dib_stride(9, 1), 4);
        assert_eq!(dib_stride(320, 24), 960);
        assert_eq!(row_bytes(5, 4), 3);
    }

    #[test]
    fn test_one_bit_rows_widen_to_nibbles() {
        // 10 pixels: 1011001101, padded row of 4 bytes
        let rows = [0b1011_0011, 0b0100_0000, 0, 0];
        let out = repack_rows(&rows, 10, 1, 1).unwrap();
        assert_eq!(out.len(), dib_stride(10, 4));
        assert_eq!(&out[..5], &[0x10, 0x11, 0x00, 0x11, 0x01]);
    }

    #[test]
    fn test_deep_rows_keep_high_bytes() {
        // one 48-bit pixel per row, two rows
        let rows = [
            0x00, 0x12, 0x00, 0x34, 0x00, 0x56, 0, 0, //
            0xFF, 0xFF, 0x00, 0x00, 0x00, 0x80, 0, 0,
        ];
        let out = repack_rows(&rows, 1, 2, 48).unwrap();
        assert_eq!(out, vec![0x12, 0x34, 0x56, 0xFF, 0xFF, 0x00, 0x80, 0xFF]);

        let pixel = [0x00, 0x10, 0x00, 0x20, 0x00, 0x30, 0x00, 0x40];
        assert_eq!(repack_rows(&pixel, 1, 1, 64).unwrap(), vec![0x10, 0x20, 0x30, 0x40]);
    }

    #[test]
    fn test_repack_needs_known_depth_and_whole_rows() {
        assert_eq!(decoded_depth(24), None);
        assert!(repack_rows(&[0u8; 8], 1, 1, 24).is_none());
        assert!(repack_rows(&[0u8; 8], 1, 2, 64).is_none());
        assert!(repack_rows(&[], 0, 1, 1).is_none());
    }

    #[test]
    fn test_only_565_needs_masks() {
        assert_eq!(PixelFormat::Rgb565.channel_masks(), Some([0xF800, 0x07E0, 0x001F]));
        assert_eq!(PixelFormat::Rgb555.channel_masks(), None);
        assert_eq!(PixelFormat::Argb32.channel_masks(), None);
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        let data = [0u8; 12];
        let frame = FrameBuffer::new(&data, 2, 2, PixelFormat::Rgb24).unwrap();
        assert!(matches!(frame.validate(), Err(AviError::InvalidFrame(_))));

        let frame = frame.with_stride(6);
        assert_eq!(frame.validate().unwrap(), 24);
    }
}
