use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BufMut;
use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{AviError, Result};
use crate::palette::{PaletteTable, PALETTE_ENTRY_SIZE};
use crate::stream::VideoStreamDescriptor;

/// Largest scale tried when turning a fractional frame rate into rate/scale.
pub const MAX_SCALE: u32 = 1_000_000;

/// `biCompression` value for uncompressed rows described by channel masks.
pub const BI_BITFIELDS: u32 = 3;

/// Red, green and blue masks that follow the info header of a bitfields DIB.
pub type ChannelMasks = [u32; 3];

/// Serialized size of [`ChannelMasks`].
pub const CHANNEL_MASKS_SIZE: usize = 12;

/// Four-character code, stored as the little-endian u32 the container uses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const NONE: Self = Self(0);
    pub const VIDS: Self = Self::from_bytes(*b"vids");
    /// Uncompressed DIB frames.
    pub const DIB: Self = Self::from_bytes(*b"DIB ");
    /// Built-in LZ4 frame codec.
    pub const LZ4: Self = Self::from_bytes(*b"LZ4 ");

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// True for the codes that mean "no compressor".
    pub fn is_uncompressed(self) -> bool {
        self == Self::NONE || self == Self::DIB || self == Self::from_bytes(*b"RGB ")
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({:?})", self.to_string())
    }
}

/// Integral frame-rate representation: frames per second = rate / scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateScale {
    pub rate: u32,
    pub scale: u32,
}

impl RateScale {
    pub fn frames_per_second(&self) -> f64 {
        self.rate as f64 / self.scale as f64
    }
}

/// Derives rate/scale by multiplying by 10 until the rate is integral.
pub fn rate_and_scale(frame_rate: f64) -> Result<RateScale> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(AviError::RateNotRepresentable(frame_rate));
    }

    let mut scale = 1u32;
    loop {
        let scaled = frame_rate * scale as f64;
        let rounded = scaled.round();
        if (scaled - rounded).abs() < 1e-6 {
            if rounded < 1.0 || rounded > u32::MAX as f64 {
                return Err(AviError::RateNotRepresentable(frame_rate));
            }
            return Ok(RateScale {
                rate: rounded as u32,
                scale,
            });
        }
        if scale >= MAX_SCALE {
            return Err(AviError::RateNotRepresentable(frame_rate));
        }
        scale *= 10;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Per-stream header (`strh`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub fcc_type: FourCC,
    pub fcc_handler: FourCC,
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    /// -1 selects the codec default.
    pub quality: i32,
    pub sample_size: u32,
    pub frame: FrameRect,
}

impl StreamHeader {
    pub const SIZE: usize = 56;

    pub fn rate_scale(&self) -> RateScale {
        RateScale {
            rate: self.rate,
            scale: self.scale,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.fcc_type.0)?;
        w.write_u32::<LittleEndian>(self.fcc_handler.0)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.priority)?;
        w.write_u16::<LittleEndian>(self.language)?;
        w.write_u32::<LittleEndian>(self.initial_frames)?;
        w.write_u32::<LittleEndian>(self.scale)?;
        w.write_u32::<LittleEndian>(self.rate)?;
        w.write_u32::<LittleEndian>(self.start)?;
        w.write_u32::<LittleEndian>(self.length)?;
        w.write_u32::<LittleEndian>(self.suggested_buffer_size)?;
        w.write_i32::<LittleEndian>(self.quality)?;
        w.write_u32::<LittleEndian>(self.sample_size)?;
        // rcFrame is stored as four 16-bit values
        for v in [
            self.frame.left,
            self.frame.top,
            self.frame.right,
            self.frame.bottom,
        ] {
            let v = i16::try_from(v).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "frame rectangle exceeds 16 bits")
            })?;
            w.write_i16::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            fcc_type: FourCC(r.read_u32::<LittleEndian>()?),
            fcc_handler: FourCC(r.read_u32::<LittleEndian>()?),
            flags: r.read_u32::<LittleEndian>()?,
            priority: r.read_u16::<LittleEndian>()?,
            language: r.read_u16::<LittleEndian>()?,
            initial_frames: r.read_u32::<LittleEndian>()?,
            scale: r.read_u32::<LittleEndian>()?,
            rate: r.read_u32::<LittleEndian>()?,
            start: r.read_u32::<LittleEndian>()?,
            length: r.read_u32::<LittleEndian>()?,
            suggested_buffer_size: r.read_u32::<LittleEndian>()?,
            quality: r.read_i32::<LittleEndian>()?,
            sample_size: r.read_u32::<LittleEndian>()?,
            frame: FrameRect {
                left: r.read_i16::<LittleEndian>()? as i32,
                top: r.read_i16::<LittleEndian>()? as i32,
                right: r.read_i16::<LittleEndian>()? as i32,
                bottom: r.read_i16::<LittleEndian>()? as i32,
            },
        })
    }
}

/// BITMAPINFOHEADER.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub clr_used: u32,
    pub clr_important: u32,
}

impl BitmapInfoHeader {
    pub const SIZE: usize = 40;

    pub fn put_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.size);
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.put_u16_le(self.planes);
        buf.put_u16_le(self.bit_count);
        buf.put_u32_le(self.compression);
        buf.put_u32_le(self.size_image);
        buf.put_i32_le(self.x_pels_per_meter);
        buf.put_i32_le(self.y_pels_per_meter);
        buf.put_u32_le(self.clr_used);
        buf.put_u32_le(self.clr_important);
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.put_into(&mut buf);
        w.write_all(&buf)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            size: r.read_u32::<LittleEndian>()?,
            width: r.read_i32::<LittleEndian>()?,
            height: r.read_i32::<LittleEndian>()?,
            planes: r.read_u16::<LittleEndian>()?,
            bit_count: r.read_u16::<LittleEndian>()?,
            compression: r.read_u32::<LittleEndian>()?,
            size_image: r.read_u32::<LittleEndian>()?,
            x_pels_per_meter: r.read_i32::<LittleEndian>()?,
            y_pels_per_meter: r.read_i32::<LittleEndian>()?,
            clr_used: r.read_u32::<LittleEndian>()?,
            clr_important: r.read_u32::<LittleEndian>()?,
        })
    }

    /// Palette entries that follow this header in a format block or DIB.
    pub fn palette_entries(&self) -> usize {
        if self.clr_used > 0 {
            self.clr_used as usize
        } else {
            PaletteTable::capacity_for(self.bit_count)
        }
    }
}

/// Format block (`strf`): info header, channel masks for bitfields rows,
/// then the palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatHeader {
    pub header: BitmapInfoHeader,
    pub masks: Option<ChannelMasks>,
    pub palette: PaletteTable,
    /// Size of the whole block, masks and palette bytes included.
    pub declared_size: u32,
}

impl FormatHeader {
    /// Marks the rows as bitfields pixels laid out by `masks`.
    pub fn with_channel_masks(mut self, masks: ChannelMasks) -> Self {
        if self.masks.is_none() {
            self.declared_size += CHANNEL_MASKS_SIZE as u32;
        }
        self.header.compression = BI_BITFIELDS;
        self.masks = Some(masks);
        self
    }

    /// `biCompression` for the uncompressed rows this block describes.
    pub fn row_compression(&self) -> u32 {
        if self.masks.is_some() {
            BI_BITFIELDS
        } else {
            0
        }
    }

    fn put_tail<B: BufMut>(&self, buf: &mut B) {
        for mask in self.masks.iter().flatten() {
            buf.put_u32_le(*mask);
        }
        self.palette.put_into(buf);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.declared_size as usize);
        self.header.put_into(&mut out);
        self.put_tail(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        let header = BitmapInfoHeader::read_from(&mut cursor)
            .map_err(|_| AviError::container("format block shorter than BITMAPINFOHEADER"))?;
        let mut start = (header.size as usize).max(BitmapInfoHeader::SIZE);
        cursor.set_position(start as u64);

        // Compressed streams keep the masks of their decoded rows after the header.
        let masks = if matches!(header.bit_count, 16 | 32)
            && header.compression != 0
            && bytes.len() >= start + CHANNEL_MASKS_SIZE
        {
            start += CHANNEL_MASKS_SIZE;
            Some([
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
            ])
        } else {
            None
        };

        let available = bytes.len().saturating_sub(start) / PALETTE_ENTRY_SIZE;
        let count = if header.bit_count < 24 {
            header.palette_entries().min(available)
        } else {
            0
        };
        let palette = PaletteTable::read_from(&mut cursor, count)?;
        let masks_len = if masks.is_some() { CHANNEL_MASKS_SIZE } else { 0 };
        Ok(Self {
            header,
            masks,
            declared_size: (BitmapInfoHeader::SIZE + masks_len + palette.byte_len()) as u32,
            palette,
        })
    }

    /// Uncompressed DIB block for one frame: this header, masks, palette, pixels.
    pub fn to_dib(&self, pixels: &[u8]) -> Vec<u8> {
        let mut header = self.header;
        header.size = BitmapInfoHeader::SIZE as u32;
        header.compression = self.row_compression();
        header.size_image = pixels.len() as u32;
        header.clr_used = self.palette.len() as u32;

        let mut out = Vec::with_capacity(self.declared_size as usize + pixels.len());
        header.put_into(&mut out);
        self.put_tail(&mut out);
        out.extend_from_slice(pixels);
        out
    }
}

/// Stream header for a new video stream.
pub fn build_container_header(descriptor: &VideoStreamDescriptor, handler: FourCC) -> StreamHeader {
    StreamHeader {
        fcc_type: FourCC::VIDS,
        fcc_handler: handler,
        flags: 0,
        priority: 0,
        language: 0,
        initial_frames: 0,
        scale: descriptor.scale,
        rate: descriptor.rate,
        start: descriptor.first_frame,
        length: 0,
        suggested_buffer_size: descriptor.frame_size,
        quality: -1,
        sample_size: 0,
        frame: FrameRect {
            left: 0,
            top: 0,
            right: descriptor.width as i32,
            bottom: descriptor.height as i32,
        },
    }
}

/// Format header for a stream. Depths below 24 bits carry the palette and
/// the declared size counts its bytes; deeper formats carry none.
pub fn build_format_header(descriptor: &VideoStreamDescriptor, palette: &PaletteTable) -> FormatHeader {
    let palette = if descriptor.bits_per_pixel < 24 {
        palette.clone()
    } else {
        PaletteTable::empty()
    };

    let header = BitmapInfoHeader {
        size: BitmapInfoHeader::SIZE as u32,
        width: descriptor.width as i32,
        height: descriptor.height as i32,
        planes: 1,
        bit_count: descriptor.bits_per_pixel,
        compression: 0,
        size_image: descriptor.frame_size,
        x_pels_per_meter: 0,
        y_pels_per_meter: 0,
        clr_used: palette.len() as u32,
        clr_important: palette.len() as u32,
    };

    FormatHeader {
        header,
        masks: None,
        declared_size: (BitmapInfoHeader::SIZE + palette.byte_len()) as u32,
        palette,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Rgb;

    fn descriptor(bits: u16) -> VideoStreamDescriptor {
        VideoStreamDescriptor::new(25.0, 16, 8, bits, 0).unwrap()
    }

    #[test]
    fn test_integral_rate() {
        let rs = rate_and_scale(24.0).unwrap();
        assert_eq!(rs, RateScale { rate: 24, scale: 1 });
    }

    #[test]
    fn test_fractional_rate() {
        let rs = rate_and_scale(29.97).unwrap();
        assert_eq!(rs, RateScale { rate: 2997, scale: 100 });
        assert!(rs.scale <= MAX_SCALE);
        assert!((rs.frames_per_second() - 29.97).abs() < 1e-9);

        assert_eq!(rate_and_scale(0.5).unwrap(), RateScale { rate: 5, scale: 10 });
    }

    #[test]
    fn test_rate_needing_huge_scale_fails() {
        assert!(matches!(
            rate_and_scale(1.0 / 3.0),
            Err(AviError::RateNotRepresentable(_))
        ));
        assert!(matches!(
            rate_and_scale(29.970_000_1),
            Err(AviError::RateNotRepresentable(_))
        ));
        assert!(rate_and_scale(f64::NAN).is_err());
        assert!(rate_and_scale(0.0).is_err());
        assert!(rate_and_scale(-30.0).is_err());
    }

    #[test]
    fn test_format_header_size_per_depth() {
        for bits in [1u16, 4, 8, 16, 24, 32] {
            let len = PaletteTable::capacity_for(bits);
            let palette = PaletteTable::from_bitmap_palette(&[Rgb::new(1, 2, 3)], len);
            let format = build_format_header(&descriptor(bits), &palette);

            let expected = if bits < 24 {
                BitmapInfoHeader::SIZE + len * PALETTE_ENTRY_SIZE
            } else {
                BitmapInfoHeader::SIZE
            };
            assert_eq!(format.declared_size as usize, expected, "bits={}", bits);
            assert_eq!(format.to_bytes().len(), expected, "bits={}", bits);
        }
    }

    #[test]
    fn test_deep_formats_drop_palette() {
        let palette = PaletteTable::from_bitmap_palette(&[Rgb::new(1, 2, 3)], 16);
        let format = build_format_header(&descriptor(24), &palette);
        assert!(format.palette.is_empty());
        assert_eq!(format.header.clr_used, 0);
    }

    #[test]
    fn test_format_header_bytes_round_trip() {
        let palette = PaletteTable::from_bitmap_palette(&[Rgb::new(200, 100, 50)], 16);
        let format = build_format_header(&descriptor(4), &palette);
        let parsed = FormatHeader::from_bytes(&format.to_bytes()).unwrap();
        assert_eq!(parsed, format);
        assert_eq!(parsed.header.planes, 1);
        assert_eq!(parsed.header.clr_used, 16);
    }

    #[test]
    fn test_format_block_matches_streamed_fields() {
        let palette = PaletteTable::from_bitmap_palette(&[Rgb::new(7, 8, 9)], 256);
        let format = build_format_header(&descriptor(8), &palette);

        let mut streamed = Vec::new();
        format.header.write_to(&mut streamed).unwrap();
        format.palette.write_to(&mut streamed).unwrap();
        assert_eq!(format.to_bytes(), streamed);

        let dib = format.to_dib(&[1, 2, 3, 4]);
        assert_eq!(dib.len(), streamed.len() + 4);
        assert_eq!(&dib[BitmapInfoHeader::SIZE..streamed.len()], &streamed[BitmapInfoHeader::SIZE..]);
        assert_eq!(&dib[streamed.len()..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bitfields_block_carries_masks() {
        let masks = [0xF800, 0x07E0, 0x001F];
        let format = build_format_header(&descriptor(16), &PaletteTable::empty()).with_channel_masks(masks);
        assert_eq!(format.header.compression, BI_BITFIELDS);
        assert_eq!(format.declared_size as usize, BitmapInfoHeader::SIZE + CHANNEL_MASKS_SIZE);

        let bytes = format.to_bytes();
        assert_eq!(bytes.len(), format.declared_size as usize);
        assert_eq!(&bytes[40..44], &0xF800u32.to_le_bytes());
        assert_eq!(FormatHeader::from_bytes(&bytes).unwrap(), format);

        let dib = format.to_dib(&[0xE0, 0x07, 0, 0]);
        let header = BitmapInfoHeader::read_from(&mut dib.as_slice()).unwrap();
        assert_eq!(header.compression, BI_BITFIELDS);
        assert_eq!(&dib[52..], &[0xE0, 0x07, 0, 0]);

        // a codec tag in the compression field keeps the masks readable
        let mut stored = format.clone();
        stored.header.compression = FourCC::LZ4.0;
        let parsed = FormatHeader::from_bytes(&stored.to_bytes()).unwrap();
        assert_eq!(parsed.masks, Some(masks));
        assert_eq!(parsed.row_compression(), BI_BITFIELDS);
    }

    #[test]
    fn test_container_header_fields() {
        let d = VideoStreamDescriptor::new(29.97, 320, 240, 24, 230_400).unwrap();
        let header = build_container_header(&d, FourCC::DIB);
        assert_eq!(header.fcc_type, FourCC::VIDS);
        assert_eq!(header.rate, 2997);
        assert_eq!(header.scale, 100);
        assert_eq!(header.quality, -1);
        assert_eq!(header.suggested_buffer_size, 230_400);
        assert_eq!(header.frame.right, 320);
        assert_eq!(header.frame.bottom, 240);

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), StreamHeader::SIZE);
        assert_eq!(&buf[0..4], b"vids");
        assert_eq!(StreamHeader::read_from(&mut buf.as_slice()).unwrap(), header);
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCC::LZ4.to_string(), "LZ4 ");
        assert_eq!(FourCC(0x6376_736d).to_string(), "msvc");
        assert!(FourCC::NONE.is_uncompressed());
        assert!(!FourCC::LZ4.is_uncompressed());
    }
}
