use crate::error::{AviError, Result};
use crate::header::FourCC;
use bytes::{BufMut, Bytes, BytesMut};
use lz4_flex::block::get_maximum_output_size;

pub trait VideoEncoder {
    fn encode(&mut self, pixels: &[u8]) -> Result<Bytes>;
    fn encode_into(&mut self, pixels: &[u8], dst: &mut BytesMut) -> Result<()>;
}

pub trait VideoDecoder {
    /// Size `data` claims to decode to, read without decoding it.
    fn decoded_len(&self, data: &[u8]) -> Result<usize>;
    fn decode(&mut self, data: &[u8]) -> Result<Bytes>;
    fn decode_into(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<()>;
}

/// A compressor that can both encode and decode frames.
pub trait FrameCodec: VideoEncoder + VideoDecoder + Send {}

impl<T: VideoEncoder + VideoDecoder + Send> FrameCodec for T {}

/// Lossless LZ4 block codec. Every frame is independently decodable, so
/// every frame is a key frame.
#[derive(Debug, Default)]
pub struct Lz4Codec;

impl Lz4Codec {
    pub const HANDLER: FourCC = FourCC::LZ4;

    pub fn new() -> Self {
        Self
    }
}

impl VideoEncoder for Lz4Codec {
    fn encode(&mut self, pixels: &[u8]) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(pixels.len() + 8); // Heuristic
        self.encode_into(pixels, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_into(&mut self, pixels: &[u8], dst: &mut BytesMut) -> Result<()> {
        let max_len = get_maximum_output_size(pixels.len());

        // size header (4 bytes) + compressed data
        dst.reserve(4 + max_len);

        dst.put_u32_le(pixels.len() as u32);

        // Grow to the worst case, compress in place, then truncate
        let start_len = dst.len();
        dst.resize(start_len + max_len, 0);

        let compressed_size = lz4_flex::compress_into(pixels, &mut dst[start_len..])
            .map_err(|e| AviError::Codec(format!("Compression error: {}", e)))?;

        dst.truncate(start_len + compressed_size);
        Ok(())
    }
}

impl VideoDecoder for Lz4Codec {
    fn decoded_len(&self, data: &[u8]) -> Result<usize> {
        read_size_header(data)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Bytes> {
        let uncompressed_size = read_size_header(data)?;
        let mut dst = BytesMut::with_capacity(uncompressed_size);
        self.decode_into(data, &mut dst)?;
        Ok(dst.freeze())
    }

    fn decode_into(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<()> {
        let uncompressed_size = read_size_header(data)?;

        let start_len = dst.len();
        dst.resize(start_len + uncompressed_size, 0);

        let size = lz4_flex::decompress_into(&data[4..], &mut dst[start_len..])
            .map_err(|e| AviError::Codec(format!("Decompression error: {}", e)))?;

        if size != uncompressed_size {
            dst.truncate(start_len);
            return Err(AviError::Codec(format!(
                "Decompressed {} bytes, header announced {}",
                size, uncompressed_size
            )));
        }
        Ok(())
    }
}

fn read_size_header(data: &[u8]) -> Result<usize> {
    if data.len() < 4 {
        return Err(AviError::Codec("Data too short for header".to_string()));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize)
}
