use log::{info, warn};

use crate::environment::{MediaEnvironment, StreamHandle, AVIERR_OK};
use crate::error::{AviError, Result};
use crate::header::FourCC;
use crate::stream::StreamState;

/// `dwFlags` bit marking the options block as filled in.
pub const AVICOMPRESSF_VALID: u32 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Stream type the options apply to; zero lets the environment decide.
    pub fcc_type: FourCC,
    pub fcc_handler: FourCC,
    pub key_frame_every: u32,
    /// 0..=10000
    pub quality: u32,
    pub flags: u32,
    pub bytes_per_second: u32,
    pub interleave_every: u32,
    /// Codec-private parameter block.
    pub parameters: Vec<u8>,
}

impl CompressionOptions {
    pub const MAX_QUALITY: u32 = 10_000;

    /// Profile used when compression is requested without options.
    pub fn default_profile() -> Self {
        Self {
            fcc_type: FourCC::NONE,
            fcc_handler: FourCC::LZ4,
            key_frame_every: 25,
            quality: Self::MAX_QUALITY,
            flags: AVICOMPRESSF_VALID,
            bytes_per_second: 0,
            interleave_every: 0,
            parameters: vec![0; 4],
        }
    }

    /// Options that store frames as plain DIBs.
    pub fn uncompressed() -> Self {
        Self {
            fcc_type: FourCC::NONE,
            fcc_handler: FourCC::DIB,
            key_frame_every: 0,
            quality: Self::MAX_QUALITY,
            flags: AVICOMPRESSF_VALID,
            bytes_per_second: 0,
            interleave_every: 0,
            parameters: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: FourCC) -> Self {
        self.fcc_handler = handler;
        self
    }

    pub fn is_uncompressed(&self) -> bool {
        self.fcc_handler.is_uncompressed()
    }
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self::default_profile()
    }
}

/// What a new stream should do about compression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Uncompressed,
    /// Compress with [`CompressionOptions::default_profile`].
    Default,
    Options(CompressionOptions),
}

/// Compressed sibling of a raw stream and the options it was made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedStream {
    pub handle: StreamHandle,
    pub options: CompressionOptions,
}

/// Creates a compressed stream on top of `raw` and writes the stream's
/// format to it. There is no uncompressed fallback: any refusal is
/// [`AviError::CompressionUnavailable`].
pub fn negotiate<E: MediaEnvironment>(
    env: &mut E,
    raw: StreamHandle,
    state: &StreamState,
    options: Option<CompressionOptions>,
) -> Result<CompressedStream> {
    let options = options.unwrap_or_else(CompressionOptions::default_profile);
    if options.quality > CompressionOptions::MAX_QUALITY {
        warn!(
            "Compression quality {} above {}, passing it through",
            options.quality,
            CompressionOptions::MAX_QUALITY
        );
    }

    let handle = env
        .make_compressed_stream(raw, &options)
        .map_err(|status| AviError::CompressionUnavailable {
            handler: options.fcc_handler,
            status,
        })?;

    let format = state.format_header();
    let status = env.set_format(handle, 0, &format);
    if status != AVIERR_OK {
        return Err(AviError::CompressionUnavailable {
            handler: options.fcc_handler,
            status,
        });
    }

    info!(
        "Compressed stream ready: handler {}, key frame every {}, quality {}",
        options.fcc_handler, options.key_frame_every, options.quality
    );
    Ok(CompressedStream { handle, options })
}
