pub mod codec;
pub mod compression;
pub mod environment;
pub mod error;
pub mod exporter;
pub mod header;
pub mod memory;
pub mod palette;
pub mod pixel;
pub mod reader;
mod riff;
pub mod stream;
pub mod writer;

pub use codec::{FrameCodec, Lz4Codec, VideoDecoder, VideoEncoder};
pub use compression::{negotiate, CompressedStream, Compression, CompressionOptions};
pub use environment::{FileHandle, FrameDecoderHandle, MediaEnvironment, Status, StreamHandle};
pub use error::{AviError, Result};
pub use exporter::CompressionPrompt;
pub use header::{rate_and_scale, BitmapInfoHeader, FormatHeader, FourCC, RateScale, StreamHeader};
pub use memory::MemoryEnvironment;
pub use palette::{PaletteTable, Rgb};
pub use pixel::{FrameBuffer, PixelFormat};
pub use reader::DecodeSession;
pub use stream::{
    ContainerStream, PlaybackStream, ReadableFrameStream, RecordingStream, StreamParams, StreamState,
    VideoStreamDescriptor, WritableFrameStream, WritePhase,
};
