use thiserror::Error;

use crate::environment::Status;
use crate::header::FourCC;
use crate::pixel::PixelFormat;

#[derive(Error, Debug)]
pub enum AviError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("Frame rate {0} cannot be expressed as an integral rate/scale pair")]
    RateNotRepresentable(f64),

    #[error("Stream creation failed: status {status:#010x}")]
    CreateStreamFailed { status: Status },

    #[error("Stream format rejected: status {status:#010x}")]
    FormatRejected { status: Status },

    #[error("Stream info unavailable: status {status:#010x}")]
    StreamInfo { status: Status },

    #[error("Write rejected at frame {position}: status {status:#010x}")]
    WriteRejected { position: u32, status: Status },

    #[error("Compression unavailable for handler {handler}: status {status:#010x}")]
    CompressionUnavailable { handler: FourCC, status: Status },

    #[error("Could not open a decode session for {bit_count} bits per pixel")]
    SessionOpenFailed { bit_count: u16 },

    #[error("Decoding frame {index} failed: {reason}")]
    DecodeFailed { index: u32, reason: String },

    #[error("Export failed: status {status:#010x}")]
    ExportFailed { status: Status },

    #[error("Frame does not match stream format: {0}")]
    FrameMismatch(String),

    #[error("Invalid frame position: {index} (frame count {count})")]
    FrameOutOfRange { index: u32, count: u32 },

    #[error("Invalid frame buffer: {0}")]
    InvalidFrame(String),

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Container Error: {0}")]
    Container(String),
}

impl AviError {
    pub(crate) fn decode_failed(index: u32, reason: impl Into<String>) -> Self {
        Self::DecodeFailed {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn container(msg: impl Into<String>) -> Self {
        Self::Container(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AviError>;
