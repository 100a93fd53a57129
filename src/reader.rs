//! Frame decode sessions.
//!
//! A session asks the environment for a decompressed DIB block per frame and
//! rebuilds a standalone BMP file image from it, which the `image` crate then
//! decodes into an owned RGBA buffer.

use byteorder::{LittleEndian, WriteBytesExt};
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use std::io::Cursor;

use crate::environment::{FrameDecoderHandle, MediaEnvironment, StreamHandle};
use crate::error::{AviError, Result};
use crate::header::{BitmapInfoHeader, BI_BITFIELDS, CHANNEL_MASKS_SIZE};
use crate::palette::PALETTE_ENTRY_SIZE;
use crate::stream::VideoStreamDescriptor;

/// "BM"
pub const BMP_MAGIC: u16 = 0x4d42;
pub const FILE_HEADER_SIZE: usize = 14;

/// Rounds a reported bit count to one a decoder accepts. Zero lets the
/// decoder pick.
pub fn clamp_bit_count(bits: u16) -> u16 {
    match bits {
        0 => 0,
        1..=4 => 4,
        5..=8 => 8,
        9..=16 => 16,
        17..=24 => 24,
        _ => 32,
    }
}

/// Open decoder for one stream. Released by [`DecodeSession::close`] or on
/// drop, whichever comes first.
pub struct DecodeSession<'a, E: MediaEnvironment> {
    env: &'a mut E,
    decoder: Option<FrameDecoderHandle>,
    requested_bits: u16,
    first_frame: u32,
    frame_count: u32,
}

impl<'a, E: MediaEnvironment> DecodeSession<'a, E> {
    pub(crate) fn open(
        env: &'a mut E,
        stream: StreamHandle,
        descriptor: &VideoStreamDescriptor,
    ) -> Result<Self> {
        let bit_count = clamp_bit_count(descriptor.bits_per_pixel);
        if bit_count != descriptor.bits_per_pixel {
            warn!(
                "Stream reports {} bits per pixel, requesting {}",
                descriptor.bits_per_pixel, bit_count
            );
        }

        // Width and height stay zero; pinning them breaks interlaced sources.
        let request = BitmapInfoHeader {
            size: BitmapInfoHeader::SIZE as u32,
            width: 0,
            height: 0,
            planes: 1,
            bit_count,
            compression: 0,
            ..Default::default()
        };

        let decoder = env
            .get_frame_open(stream, &request)
            .ok_or(AviError::SessionOpenFailed { bit_count })?;
        debug!("Decode session opened for {} bpp", bit_count);

        Ok(Self {
            env,
            decoder: Some(decoder),
            requested_bits: bit_count,
            first_frame: descriptor.first_frame,
            frame_count: descriptor.frame_count,
        })
    }

    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    /// Bitmap file image (file header, info header, palette, pixels) of the
    /// frame at `index`.
    pub fn get_frame_file(&mut self, index: u32) -> Result<Vec<u8>> {
        if index > self.frame_count {
            return Err(AviError::FrameOutOfRange {
                index,
                count: self.frame_count,
            });
        }
        let decoder = self
            .decoder
            .ok_or_else(|| AviError::decode_failed(index, "decode session is closed"))?;

        let position = self
            .first_frame
            .checked_add(index)
            .ok_or_else(|| AviError::decode_failed(index, "frame position past the end of the stream"))?;
        let dib = self
            .env
            .get_frame(decoder, position)
            .map_err(|status| AviError::decode_failed(index, format!("status {:#010x}", status)))?;

        reconstruct_bitmap_file(&dib, index, self.requested_bits)
    }

    /// Decodes the frame at `index` into an owned image.
    pub fn get_frame(&mut self, index: u32) -> Result<RgbaImage> {
        let file = self.get_frame_file(index)?;
        let decoded = image::load_from_memory_with_format(&file, ImageFormat::Bmp)?;
        Ok(decoded.to_rgba8())
    }

    pub fn close(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.env.get_frame_close(decoder);
            debug!("Decode session closed");
        }
    }
}

impl<E: MediaEnvironment> Drop for DecodeSession<'_, E> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Rebuilds a BMP file from a DIB block: the block's header, its channel
/// masks for bitfields rows and, for indexed depths, its palette, followed
/// by the pixels that sit after all of those.
pub(crate) fn reconstruct_bitmap_file(dib: &[u8], index: u32, requested_bits: u16) -> Result<Vec<u8>> {
    let mut header = BitmapInfoHeader::read_from(&mut Cursor::new(dib))
        .map_err(|_| AviError::decode_failed(index, "block shorter than its header"))?;

    if header.size_image < 1 {
        return Err(AviError::decode_failed(index, "block reports no image data"));
    }
    if requested_bits != 0 && header.bit_count != requested_bits {
        return Err(AviError::decode_failed(
            index,
            format!(
                "decoded {} bits per pixel, requested {}",
                header.bit_count, requested_bits
            ),
        ));
    }

    let indexed = header.bit_count <= 8;
    let palette_entries = if indexed {
        header.palette_entries()
    } else {
        header.clr_used as usize
    };
    let header_len = (header.size as usize).max(BitmapInfoHeader::SIZE);
    let masks_len = if header.compression == BI_BITFIELDS {
        CHANNEL_MASKS_SIZE
    } else {
        0
    };
    let palette_start = header_len + masks_len;
    let pixel_start = palette_start + palette_entries * PALETTE_ENTRY_SIZE;
    let pixel_end = pixel_start + header.size_image as usize;
    if dib.len() < pixel_end {
        return Err(AviError::decode_failed(
            index,
            format!("block holds {} bytes, needs {}", dib.len(), pixel_end),
        ));
    }

    let masks = &dib[header_len..palette_start];
    let palette = if indexed { &dib[palette_start..pixel_start] } else { &[][..] };
    let pixels = &dib[pixel_start..pixel_end];

    header.size = BitmapInfoHeader::SIZE as u32;
    header.clr_used = (palette.len() / PALETTE_ENTRY_SIZE) as u32;
    header.clr_important = header.clr_important.min(header.clr_used);

    let offset = FILE_HEADER_SIZE + BitmapInfoHeader::SIZE + masks.len() + palette.len();
    let total = offset + pixels.len();

    let mut out = Vec::with_capacity(total);
    out.write_u16::<LittleEndian>(BMP_MAGIC)?;
    out.write_u32::<LittleEndian>(total as u32)?;
    out.write_u16::<LittleEndian>(0)?;
    out.write_u16::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(offset as u32)?;
    header.write_to(&mut out)?;
    out.extend_from_slice(masks);
    out.extend_from_slice(palette);
    out.extend_from_slice(pixels);
    Ok(out)
}
