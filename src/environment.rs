//! Boundary to the multimedia environment that owns container files.
//!
//! Every call is synchronous. Calls that can be refused report a [`Status`];
//! zero means success and the AVIERR codes below describe refusals.

use bytes::Bytes;
use std::path::Path;

use crate::compression::CompressionOptions;
use crate::header::{BitmapInfoHeader, FormatHeader, StreamHeader};

/// Raw status code reported by the environment.
pub type Status = i32;

const fn avierr(code: u32) -> Status {
    (0x8004_4000 | code) as Status
}

pub const AVIERR_OK: Status = 0;
pub const AVIERR_UNSUPPORTED: Status = avierr(101);
pub const AVIERR_BADFORMAT: Status = avierr(102);
pub const AVIERR_MEMORY: Status = avierr(103);
pub const AVIERR_INTERNAL: Status = avierr(104);
pub const AVIERR_BADPARAM: Status = avierr(106);
pub const AVIERR_BADSIZE: Status = avierr(107);
pub const AVIERR_BADHANDLE: Status = avierr(108);
pub const AVIERR_FILEREAD: Status = avierr(109);
pub const AVIERR_FILEWRITE: Status = avierr(110);
pub const AVIERR_FILEOPEN: Status = avierr(111);
pub const AVIERR_NOCOMPRESSOR: Status = avierr(113);
pub const AVIERR_NODATA: Status = avierr(115);
pub const AVIERR_USERABORT: Status = avierr(198);

/// Key-frame flag for [`MediaEnvironment::write`].
pub const AVIIF_KEYFRAME: u32 = 0x10;

/// Container file opened or created by the environment's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) u32);

/// Raw or compressed stream inside a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub(crate) u32);

/// Open frame decompressor, released with `get_frame_close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDecoderHandle(pub(crate) u32);

pub trait MediaEnvironment {
    fn create_stream(&mut self, file: FileHandle, header: &StreamHeader) -> Result<StreamHandle, Status>;

    /// Wraps `source` in a stream that compresses everything written to it.
    fn make_compressed_stream(
        &mut self,
        source: StreamHandle,
        options: &CompressionOptions,
    ) -> Result<StreamHandle, Status>;

    fn set_format(&mut self, stream: StreamHandle, position: u32, format: &FormatHeader) -> Status;

    fn read_format(&self, stream: StreamHandle, position: u32) -> Result<FormatHeader, Status>;

    fn stream_info(&self, stream: StreamHandle) -> Result<StreamHeader, Status>;

    fn stream_start(&self, stream: StreamHandle) -> Result<u32, Status>;

    fn stream_length(&self, stream: StreamHandle) -> Result<u32, Status>;

    fn write(&mut self, stream: StreamHandle, position: u32, samples: u32, data: &[u8], flags: u32) -> Status;

    /// `None` when no decompressor can produce the requested format.
    fn get_frame_open(&mut self, stream: StreamHandle, request: &BitmapInfoHeader) -> Option<FrameDecoderHandle>;

    /// Decompressed DIB block (info header, palette, pixels) for an absolute
    /// stream position.
    fn get_frame(&mut self, decoder: FrameDecoderHandle, position: u32) -> Result<Bytes, Status>;

    fn get_frame_close(&mut self, decoder: FrameDecoderHandle);

    /// Writes `streams` into a new container file at `path`, one options
    /// entry per stream.
    fn save(&mut self, path: &Path, streams: &[StreamHandle], options: &[CompressionOptions]) -> Status;
}
