//! Video streams and the capabilities they expose.
//!
//! A stream is either being recorded ([`RecordingStream`]: append, read back,
//! export) or was opened from an existing container ([`PlaybackStream`]:
//! read, export). The capabilities are separate traits so each concrete
//! stream only offers what it can do.

use log::info;
use std::path::Path;

use crate::compression::{negotiate, Compression, CompressionOptions};
use crate::environment::{FileHandle, MediaEnvironment, StreamHandle};
use crate::error::{AviError, Result};
use crate::exporter::{self, CompressionPrompt};
use crate::header::{
    build_container_header, build_format_header, rate_and_scale, ChannelMasks, FormatHeader, FourCC,
};
use crate::palette::PaletteTable;
use crate::pixel::{FrameBuffer, PixelFormat};
use crate::reader::DecodeSession;
use crate::writer;

/// Geometry and timing of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStreamDescriptor {
    /// Frame-rate numerator.
    pub rate: u32,
    /// Frame-rate denominator.
    pub scale: u32,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u16,
    /// Bytes of one uncompressed frame.
    pub frame_size: u32,
    pub first_frame: u32,
    pub frame_count: u32,
}

impl VideoStreamDescriptor {
    pub fn new(
        frame_rate: f64,
        width: u32,
        height: u32,
        bits_per_pixel: u16,
        frame_size: u32,
    ) -> Result<Self> {
        let rs = rate_and_scale(frame_rate)?;
        Ok(Self {
            rate: rs.rate,
            scale: rs.scale,
            width,
            height,
            bits_per_pixel,
            frame_size,
            first_frame: 0,
            frame_count: 0,
        })
    }

    pub fn frame_rate(&self) -> f64 {
        self.rate as f64 / self.scale as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// No frame written yet; the format is taken from the first frame.
    Unformatted,
    /// Format header written; every further frame must match it.
    Formatted,
}

/// Everything that changes while a stream is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub descriptor: VideoStreamDescriptor,
    pub palette: PaletteTable,
    /// Set for 16-bit layouts other than 5-5-5.
    pub channel_masks: Option<ChannelMasks>,
    pub phase: WritePhase,
}

impl StreamState {
    pub fn new(descriptor: VideoStreamDescriptor, palette: PaletteTable) -> Self {
        Self {
            descriptor,
            palette,
            channel_masks: None,
            phase: WritePhase::Unformatted,
        }
    }

    pub fn format_header(&self) -> FormatHeader {
        let format = build_format_header(&self.descriptor, &self.palette);
        match self.channel_masks {
            Some(masks) => format.with_channel_masks(masks),
            None => format,
        }
    }
}

/// Parameters of a stream created before its first frame is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub frame_rate: f64,
    pub frame_size: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

pub trait ContainerStream {
    fn handle(&self) -> StreamHandle;

    fn descriptor(&self) -> &VideoStreamDescriptor;

    /// Options recorded by negotiation or the last export.
    fn compression(&self) -> Option<&CompressionOptions>;

    /// Writes this stream alone into a new container file.
    fn export<E: MediaEnvironment>(
        &mut self,
        env: &mut E,
        path: &Path,
        options: Option<CompressionOptions>,
    ) -> Result<()>;

    /// Like [`ContainerStream::export`], letting `prompt` pick the options.
    fn export_with_prompt<E: MediaEnvironment, P: CompressionPrompt + ?Sized>(
        &mut self,
        env: &mut E,
        path: &Path,
        prompt: &mut P,
    ) -> Result<()>;
}

pub trait WritableFrameStream {
    /// Appends one frame at index `frame_count`. The frame is borrowed for
    /// the duration of the call only.
    fn append_frame<E: MediaEnvironment>(&mut self, env: &mut E, frame: &FrameBuffer<'_>) -> Result<()>;

    fn frame_count(&self) -> u32;
}

pub trait ReadableFrameStream {
    /// Opens a decode session. The session borrows the environment, so only
    /// one can be open at a time.
    fn open_session<'a, E: MediaEnvironment>(&self, env: &'a mut E) -> Result<DecodeSession<'a, E>>;
}

#[derive(Debug)]
pub(crate) struct StreamCore {
    pub(crate) file: FileHandle,
    pub(crate) raw: StreamHandle,
    pub(crate) state: StreamState,
    pub(crate) compression: Option<CompressionOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTarget {
    Raw,
    Compressed(StreamHandle),
}

/// Stream being written, frame by frame.
#[derive(Debug)]
pub struct RecordingStream {
    core: StreamCore,
    target: WriteTarget,
}

impl RecordingStream {
    /// Creates an empty stream; the first appended frame fixes the format.
    pub fn create<E: MediaEnvironment>(
        env: &mut E,
        file: FileHandle,
        params: StreamParams,
        compression: Compression,
    ) -> Result<Self> {
        let bits = params.format.bits_per_pixel()?;
        let descriptor = VideoStreamDescriptor::new(
            params.frame_rate,
            params.width,
            params.height,
            bits,
            params.frame_size,
        )?;
        let palette = PaletteTable::from_bitmap_palette(&[], PaletteTable::capacity_for(bits));
        let mut state = StreamState::new(descriptor, palette);
        state.channel_masks = params.format.channel_masks();
        Self::create_with_state(env, file, state, compression)
    }

    /// Creates a stream shaped after `first_frame` and appends it.
    pub fn with_first_frame<E: MediaEnvironment>(
        env: &mut E,
        file: FileHandle,
        frame_rate: f64,
        first_frame: &FrameBuffer<'_>,
        compression: Compression,
    ) -> Result<Self> {
        let state = writer::seed_state(frame_rate, first_frame)?;
        let mut stream = Self::create_with_state(env, file, state, compression)?;
        stream.append_frame(env, first_frame)?;
        Ok(stream)
    }

    fn create_with_state<E: MediaEnvironment>(
        env: &mut E,
        file: FileHandle,
        state: StreamState,
        compression: Compression,
    ) -> Result<Self> {
        let header = build_container_header(&state.descriptor, FourCC::DIB);
        let raw = env
            .create_stream(file, &header)
            .map_err(|status| AviError::CreateStreamFailed { status })?;

        // Routing is fixed here for the lifetime of the stream.
        let (target, compression) = match compression {
            Compression::Uncompressed => (WriteTarget::Raw, None),
            Compression::Default => {
                let compressed = negotiate(env, raw, &state, None)?;
                (WriteTarget::Compressed(compressed.handle), Some(compressed.options))
            }
            Compression::Options(options) => {
                let compressed = negotiate(env, raw, &state, Some(options))?;
                (WriteTarget::Compressed(compressed.handle), Some(compressed.options))
            }
        };

        let d = &state.descriptor;
        info!(
            "Created video stream {}x{} {} bpp at {}/{} fps ({})",
            d.width,
            d.height,
            d.bits_per_pixel,
            d.rate,
            d.scale,
            compression
                .as_ref()
                .map(|o| o.fcc_handler.to_string())
                .unwrap_or_else(|| "uncompressed".to_string())
        );

        Ok(Self {
            core: StreamCore {
                file,
                raw,
                state,
                compression,
            },
            target,
        })
    }

    pub fn file(&self) -> FileHandle {
        self.core.file
    }

    pub fn state(&self) -> &StreamState {
        &self.core.state
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.target, WriteTarget::Compressed(_))
    }

    fn target_handle(&self) -> StreamHandle {
        match self.target {
            WriteTarget::Raw => self.core.raw,
            WriteTarget::Compressed(handle) => handle,
        }
    }
}

impl WritableFrameStream for RecordingStream {
    fn append_frame<E: MediaEnvironment>(&mut self, env: &mut E, frame: &FrameBuffer<'_>) -> Result<()> {
        let target = self.target_handle();
        self.core.state = writer::append_frame(env, target, &self.core.state, frame)?;
        Ok(())
    }

    fn frame_count(&self) -> u32 {
        self.core.state.descriptor.frame_count
    }
}

impl ReadableFrameStream for RecordingStream {
    fn open_session<'a, E: MediaEnvironment>(&self, env: &'a mut E) -> Result<DecodeSession<'a, E>> {
        DecodeSession::open(env, self.core.raw, &self.core.state.descriptor)
    }
}

impl ContainerStream for RecordingStream {
    fn handle(&self) -> StreamHandle {
        self.core.raw
    }

    fn descriptor(&self) -> &VideoStreamDescriptor {
        &self.core.state.descriptor
    }

    fn compression(&self) -> Option<&CompressionOptions> {
        self.core.compression.as_ref()
    }

    fn export<E: MediaEnvironment>(
        &mut self,
        env: &mut E,
        path: &Path,
        options: Option<CompressionOptions>,
    ) -> Result<()> {
        exporter::export(env, &mut self.core, path, options)
    }

    fn export_with_prompt<E: MediaEnvironment, P: CompressionPrompt + ?Sized>(
        &mut self,
        env: &mut E,
        path: &Path,
        prompt: &mut P,
    ) -> Result<()> {
        exporter::export_with_prompt(env, &mut self.core, path, prompt)
    }
}

/// Stream opened from an existing container; read-only.
#[derive(Debug)]
pub struct PlaybackStream {
    core: StreamCore,
}

impl PlaybackStream {
    /// Derives the descriptor and palette from the stream's headers.
    pub fn open<E: MediaEnvironment>(env: &mut E, file: FileHandle, stream: StreamHandle) -> Result<Self> {
        let info = env
            .stream_info(stream)
            .map_err(|status| AviError::StreamInfo { status })?;
        let format = env
            .read_format(stream, 0)
            .map_err(|status| AviError::StreamInfo { status })?;
        let first_frame = env
            .stream_start(stream)
            .map_err(|status| AviError::StreamInfo { status })?;
        let frame_count = env
            .stream_length(stream)
            .map_err(|status| AviError::StreamInfo { status })?;

        let bits = format.header.bit_count;
        let (width, height) = if info.frame.right > info.frame.left && info.frame.bottom > info.frame.top {
            (
                (info.frame.right - info.frame.left) as u32,
                (info.frame.bottom - info.frame.top) as u32,
            )
        } else {
            (
                format.header.width.unsigned_abs(),
                format.header.height.unsigned_abs(),
            )
        };
        let palette = if bits < 24 {
            PaletteTable::from_existing_table(&format.palette, PaletteTable::capacity_for(bits))
        } else {
            PaletteTable::empty()
        };

        let descriptor = VideoStreamDescriptor {
            rate: info.rate,
            scale: info.scale.max(1),
            width,
            height,
            bits_per_pixel: bits,
            frame_size: format.header.size_image,
            first_frame,
            frame_count,
        };
        info!(
            "Opened video stream {}x{} {} bpp, {} frames from {}",
            width, height, bits, frame_count, first_frame
        );

        Ok(Self {
            core: StreamCore {
                file,
                raw: stream,
                state: StreamState {
                    descriptor,
                    palette,
                    channel_masks: format.masks,
                    phase: WritePhase::Formatted,
                },
                compression: None,
            },
        })
    }

    pub fn file(&self) -> FileHandle {
        self.core.file
    }

    pub fn palette(&self) -> &PaletteTable {
        &self.core.state.palette
    }

    pub fn frame_count(&self) -> u32 {
        self.core.state.descriptor.frame_count
    }
}

impl ReadableFrameStream for PlaybackStream {
    fn open_session<'a, E: MediaEnvironment>(&self, env: &'a mut E) -> Result<DecodeSession<'a, E>> {
        DecodeSession::open(env, self.core.raw, &self.core.state.descriptor)
    }
}

impl ContainerStream for PlaybackStream {
    fn handle(&self) -> StreamHandle {
        self.core.raw
    }

    fn descriptor(&self) -> &VideoStreamDescriptor {
        &self.core.state.descriptor
    }

    fn compression(&self) -> Option<&CompressionOptions> {
        self.core.compression.as_ref()
    }

    fn export<E: MediaEnvironment>(
        &mut self,
        env: &mut E,
        path: &Path,
        options: Option<CompressionOptions>,
    ) -> Result<()> {
        exporter::export(env, &mut self.core, path, options)
    }

    fn export_with_prompt<E: MediaEnvironment, P: CompressionPrompt + ?Sized>(
        &mut self,
        env: &mut E,
        path: &Path,
        prompt: &mut P,
    ) -> Result<()> {
        exporter::export_with_prompt(env, &mut self.core, path, prompt)
    }
}
