use bytes::{Bytes, BytesMut};
use log::{debug, info, log_enabled, warn, Level};
use std::collections::HashMap;
use std::path::Path;

use crate::codec::{FrameCodec, Lz4Codec};
use crate::compression::CompressionOptions;
use crate::environment::*;
use crate::header::{BitmapInfoHeader, FormatHeader, FourCC, StreamHeader, BI_BITFIELDS};
use crate::palette::PaletteTable;
use crate::pixel::{decoded_depth, dib_stride, repack_rows};
use crate::riff::{self, AviStream};

/// Builds a fresh codec instance for one stream or decoder.
pub type CodecFactory = fn() -> Box<dyn FrameCodec>;

fn lz4_factory() -> Box<dyn FrameCodec> {
    Box::new(Lz4Codec::new())
}

const DECODABLE_BIT_COUNTS: [u16; 6] = [0, 4, 8, 16, 24, 32];

struct StreamRecord {
    header: StreamHeader,
    /// Uncompressed format of the frames; `compression` is zero or bitfields.
    format: Option<FormatHeader>,
    chunks: Vec<Bytes>,
    /// Codec the chunks are stored with, `None` for plain DIB rows.
    codec: Option<FourCC>,
}

enum StreamEntry {
    Raw(StreamRecord),
    /// Writes are encoded and stored on `source`.
    Compressed {
        source: StreamHandle,
        codec: Box<dyn FrameCodec>,
        buffer: BytesMut,
    },
}

struct DecoderState {
    stream: StreamHandle,
    codec: Option<Box<dyn FrameCodec>>,
    /// Depth frames are repacked to, `None` to serve them as stored.
    output_bits: Option<u16>,
    buffer: BytesMut,
}

pub struct MemoryEnvironment {
    next_id: u32,
    files: HashMap<FileHandle, Vec<StreamHandle>>,
    streams: HashMap<StreamHandle, StreamEntry>,
    decoders: HashMap<FrameDecoderHandle, DecoderState>,
    codecs: HashMap<FourCC, CodecFactory>,
}

impl Default for MemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnvironment {
    /// Environment with the LZ4 codec registered.
    pub fn new() -> Self {
        let mut env = Self {
            next_id: 1,
            files: HashMap::new(),
            streams: HashMap::new(),
            decoders: HashMap::new(),
            codecs: HashMap::new(),
        };
        env.register_codec(Lz4Codec::HANDLER, lz4_factory);
        env
    }

    /// Makes `handler` available for compressed streams, decoding and export.
    pub fn register_codec(&mut self, handler: FourCC, factory: CodecFactory) {
        self.codecs.insert(handler, factory);
    }

    pub fn create_file(&mut self) -> FileHandle {
        let file = FileHandle(self.allocate_id());
        self.files.insert(file, Vec::new());
        file
    }

    /// Raw streams of `file`, in creation order.
    pub fn streams(&self, file: FileHandle) -> &[StreamHandle] {
        self.files.get(&file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Loads every video stream of the AVI file at `path`.
    pub fn open_file(&mut self, path: &Path) -> crate::Result<FileHandle> {
        let bytes = std::fs::read(path)?;
        let parsed = riff::read_avi(&bytes)?;

        let file = self.create_file();
        for stream in parsed {
            let handle = StreamHandle(self.allocate_id());
            let record = Self::record_from_disk(stream);
            debug!(
                "Loaded stream {:?}: {} frames, codec {}",
                handle,
                record.chunks.len(),
                record.codec.unwrap_or(FourCC::DIB)
            );
            self.streams.insert(handle, StreamEntry::Raw(record));
            if let Some(list) = self.files.get_mut(&file) {
                list.push(handle);
            }
        }

        info!(
            "Opened {} with {} stream(s)",
            path.display(),
            self.streams(file).len()
        );
        Ok(file)
    }

    /// Decoders that have been opened and not closed yet.
    pub fn open_decoders(&self) -> usize {
        self.decoders.len()
    }

    #[cfg(test)]
    pub(crate) fn force_format(&mut self, stream: StreamHandle, format: FormatHeader) {
        if let Some(raw) = self.resolve(stream) {
            if let Some(StreamEntry::Raw(record)) = self.streams.get_mut(&raw) {
                record.format = Some(format);
            }
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record_from_disk(stream: AviStream) -> StreamRecord {
        let mut format = stream.format;
        let codec = match format.header.compression {
            0 | BI_BITFIELDS => None,
            fcc if FourCC(fcc).is_uncompressed() => None,
            fcc => Some(FourCC(fcc)),
        };
        format.header.compression = format.row_compression();
        let header = &mut format.header;
        header.size_image = (dib_stride(header.width.unsigned_abs(), header.bit_count)
            * header.height.unsigned_abs() as usize) as u32;

        let mut stream_header = stream.header;
        stream_header.length = stream.chunks.len() as u32;
        StreamRecord {
            header: stream_header,
            format: Some(format),
            chunks: stream.chunks,
            codec,
        }
    }

    /// Raw stream behind `stream`, which may be a compressed wrapper.
    fn resolve(&self, stream: StreamHandle) -> Option<StreamHandle> {
        match self.streams.get(&stream)? {
            StreamEntry::Raw(_) => Some(stream),
            StreamEntry::Compressed { source, .. } => Some(*source),
        }
    }

    fn record(&self, stream: StreamHandle) -> Result<&StreamRecord, Status> {
        let raw = self.resolve(stream).ok_or(AVIERR_BADHANDLE)?;
        match self.streams.get(&raw) {
            Some(StreamEntry::Raw(record)) => Ok(record),
            _ => Err(AVIERR_BADHANDLE),
        }
    }

    fn record_mut(&mut self, stream: StreamHandle) -> Result<&mut StreamRecord, Status> {
        let raw = self.resolve(stream).ok_or(AVIERR_BADHANDLE)?;
        match self.streams.get_mut(&raw) {
            Some(StreamEntry::Raw(record)) => Ok(record),
            _ => Err(AVIERR_BADHANDLE),
        }
    }

    fn instantiate(&self, handler: FourCC) -> Result<Box<dyn FrameCodec>, Status> {
        self.codecs
            .get(&handler)
            .map(|factory| factory())
            .ok_or(AVIERR_NOCOMPRESSOR)
    }

    fn encode(&mut self, stream: StreamHandle, data: &[u8]) -> crate::Result<Bytes> {
        match self.streams.get_mut(&stream) {
            Some(StreamEntry::Compressed { codec, buffer, .. }) => {
                buffer.clear();
                codec.encode_into(data, buffer)?;
                Ok(buffer.split().freeze())
            }
            _ => Err(crate::AviError::Codec(format!("{:?} does not compress", stream))),
        }
    }

    /// Stream as it should appear on disk when saved with `options`.
    fn disk_stream(&self, stream: StreamHandle, options: &CompressionOptions) -> Result<AviStream, Status> {
        let record = self.record(stream)?;
        let format = record.format.as_ref().ok_or(AVIERR_NODATA)?;

        let wanted = if options.is_uncompressed() {
            None
        } else {
            Some(options.fcc_handler)
        };

        let frame_size = format.header.size_image as usize;
        let chunks = if wanted == record.codec {
            record.chunks.clone()
        } else {
            let mut decoder = record.codec.map(|h| self.instantiate(h)).transpose()?;
            let mut encoder = wanted.map(|h| self.instantiate(h)).transpose()?;
            record
                .chunks
                .iter()
                .map(|chunk| {
                    transcode(chunk, frame_size, &mut decoder, &mut encoder).map_err(|e| {
                        warn!("Transcoding {:?} failed: {}", stream, e);
                        AVIERR_BADFORMAT
                    })
                })
                .collect::<Result<Vec<_>, Status>>()?
        };

        let mut disk_format = format.clone();
        disk_format.header.compression = wanted.map_or(format.row_compression(), |h| h.0);

        let mut header = record.header.clone();
        header.fcc_handler = wanted.unwrap_or(FourCC::DIB);
        header.length = chunks.len() as u32;
        let largest = chunks.iter().map(Bytes::len).max().unwrap_or(0) as u32;
        header.suggested_buffer_size = header.suggested_buffer_size.max(largest);

        Ok(AviStream {
            header,
            format: disk_format,
            chunks,
        })
    }
}

fn transcode(
    chunk: &Bytes,
    frame_size: usize,
    decoder: &mut Option<Box<dyn FrameCodec>>,
    encoder: &mut Option<Box<dyn FrameCodec>>,
) -> crate::Result<Bytes> {
    let pixels = match decoder {
        Some(decoder) => {
            check_decoded_len(&**decoder, chunk, frame_size)?;
            decoder.decode(chunk)?
        }
        None => chunk.clone(),
    };
    match encoder {
        Some(encoder) => encoder.encode(&pixels),
        None => Ok(pixels),
    }
}

/// Refuses a chunk whose announced size is not one frame, before anything
/// is allocated for it.
fn check_decoded_len(codec: &dyn FrameCodec, chunk: &[u8], frame_size: usize) -> crate::Result<()> {
    let announced = codec.decoded_len(chunk)?;
    if announced != frame_size {
        return Err(crate::AviError::Codec(format!(
            "chunk announces {} bytes, frames hold {}",
            announced, frame_size
        )));
    }
    Ok(())
}

/// Format of frames repacked from `format` to `bits` per pixel.
fn repacked_format(format: &FormatHeader, bits: u16) -> FormatHeader {
    let palette = PaletteTable::from_existing_table(&format.palette, PaletteTable::capacity_for(bits));
    let mut header = format.header;
    header.bit_count = bits;
    header.clr_used = palette.len() as u32;
    header.clr_important = palette.len() as u32;
    FormatHeader {
        header,
        masks: None,
        declared_size: (BitmapInfoHeader::SIZE + palette.byte_len()) as u32,
        palette,
    }
}

impl MediaEnvironment for MemoryEnvironment {
    fn create_stream(&mut self, file: FileHandle, header: &StreamHeader) -> Result<StreamHandle, Status> {
        if !self.files.contains_key(&file) {
            return Err(AVIERR_BADHANDLE);
        }
        if header.fcc_type != FourCC::VIDS {
            return Err(AVIERR_UNSUPPORTED);
        }

        let handle = StreamHandle(self.allocate_id());
        let mut header = header.clone();
        header.length = 0;
        self.streams.insert(
            handle,
            StreamEntry::Raw(StreamRecord {
                header,
                format: None,
                chunks: Vec::new(),
                codec: None,
            }),
        );
        if let Some(list) = self.files.get_mut(&file) {
            list.push(handle);
        }
        Ok(handle)
    }

    fn make_compressed_stream(
        &mut self,
        source: StreamHandle,
        options: &CompressionOptions,
    ) -> Result<StreamHandle, Status> {
        if options.is_uncompressed() {
            return Err(AVIERR_BADPARAM);
        }
        let handler = options.fcc_handler;
        let codec = self.instantiate(handler)?;

        let record = match self.streams.get_mut(&source) {
            Some(StreamEntry::Raw(record)) => record,
            _ => return Err(AVIERR_BADHANDLE),
        };
        if !record.chunks.is_empty() {
            return Err(AVIERR_UNSUPPORTED);
        }
        record.codec = Some(handler);
        record.header.fcc_handler = handler;

        let handle = StreamHandle(self.allocate_id());
        self.streams.insert(
            handle,
            StreamEntry::Compressed {
                source,
                codec,
                buffer: BytesMut::with_capacity(8192),
            },
        );
        Ok(handle)
    }

    fn set_format(&mut self, stream: StreamHandle, position: u32, format: &FormatHeader) -> Status {
        if format.header.compression != format.row_compression() {
            return AVIERR_BADFORMAT;
        }
        let record = match self.record_mut(stream) {
            Ok(record) => record,
            Err(status) => return status,
        };
        if position as usize > record.chunks.len() {
            return AVIERR_BADPARAM;
        }
        if !record.chunks.is_empty() {
            return if record.format.as_ref() == Some(format) {
                AVIERR_OK
            } else {
                AVIERR_BADFORMAT
            };
        }

        let frame = &mut record.header.frame;
        frame.right = frame.left + format.header.width.abs();
        frame.bottom = frame.top + format.header.height.abs();
        record.header.suggested_buffer_size = format.header.size_image;
        record.format = Some(format.clone());
        AVIERR_OK
    }

    fn read_format(&self, stream: StreamHandle, _position: u32) -> Result<FormatHeader, Status> {
        self.record(stream)?.format.clone().ok_or(AVIERR_NODATA)
    }

    fn stream_info(&self, stream: StreamHandle) -> Result<StreamHeader, Status> {
        let record = self.record(stream)?;
        let mut header = record.header.clone();
        header.length = record.chunks.len() as u32;
        Ok(header)
    }

    fn stream_start(&self, stream: StreamHandle) -> Result<u32, Status> {
        Ok(self.record(stream)?.header.start)
    }

    fn stream_length(&self, stream: StreamHandle) -> Result<u32, Status> {
        Ok(self.record(stream)?.chunks.len() as u32)
    }

    fn write(&mut self, stream: StreamHandle, position: u32, samples: u32, data: &[u8], _flags: u32) -> Status {
        if samples != 1 {
            return AVIERR_BADPARAM;
        }
        let raw = match self.resolve(stream) {
            Some(raw) => raw,
            None => return AVIERR_BADHANDLE,
        };
        let compressed = raw != stream;

        {
            let record = match self.record(raw) {
                Ok(record) => record,
                Err(status) => return status,
            };
            let format = match &record.format {
                Some(format) => format,
                None => return AVIERR_BADFORMAT,
            };
            if data.len() != format.header.size_image as usize {
                return AVIERR_BADSIZE;
            }
            if !compressed && record.codec.is_some() {
                return AVIERR_UNSUPPORTED;
            }
            let length = record.chunks.len() as u32;
            match position.checked_sub(record.header.start) {
                Some(offset) if offset <= length => {}
                _ => return AVIERR_BADPARAM,
            }
        }

        let chunk = if compressed {
            match self.encode(stream, data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Encoding frame {} failed: {}", position, e);
                    return AVIERR_INTERNAL;
                }
            }
        } else {
            Bytes::copy_from_slice(data)
        };

        if compressed && log_enabled!(Level::Debug) {
            debug!(
                "Compressed frame: {} -> {} bytes ({:.2}%)",
                data.len(),
                chunk.len(),
                (chunk.len() as f64 / data.len().max(1) as f64) * 100.0
            );
        }

        let record = match self.record_mut(raw) {
            Ok(record) => record,
            Err(status) => return status,
        };
        let slot = (position - record.header.start) as usize;
        if slot == record.chunks.len() {
            record.chunks.push(chunk);
        } else {
            record.chunks[slot] = chunk;
        }
        AVIERR_OK
    }

    fn get_frame_open(&mut self, stream: StreamHandle, request: &BitmapInfoHeader) -> Option<FrameDecoderHandle> {
        if !DECODABLE_BIT_COUNTS.contains(&request.bit_count) {
            return None;
        }
        let raw = self.resolve(stream)?;
        let record = self.record(raw).ok()?;
        let format = record.format.as_ref()?;

        // Frames keep their stored size; 1, 48 and 64 bpp are repacked.
        let stored = format.header.bit_count;
        let output_bits = match request.bit_count {
            0 => None,
            bits if bits == stored => None,
            bits if decoded_depth(stored) == Some(bits) => Some(bits),
            bits => {
                warn!("No decoder from {} to {} bits per pixel", stored, bits);
                return None;
            }
        };
        if (request.width != 0 && request.width != format.header.width)
            || (request.height != 0 && request.height != format.header.height)
        {
            return None;
        }

        let codec = match record.codec {
            Some(handler) => match self.instantiate(handler) {
                Ok(codec) => Some(codec),
                Err(_) => {
                    warn!("No decoder registered for {}", handler);
                    return None;
                }
            },
            None => None,
        };

        let handle = FrameDecoderHandle(self.allocate_id());
        self.decoders.insert(
            handle,
            DecoderState {
                stream: raw,
                codec,
                output_bits,
                buffer: BytesMut::new(),
            },
        );
        Some(handle)
    }

    fn get_frame(&mut self, decoder: FrameDecoderHandle, position: u32) -> Result<Bytes, Status> {
        let state = self.decoders.get_mut(&decoder).ok_or(AVIERR_BADHANDLE)?;
        let record = match self.streams.get(&state.stream) {
            Some(StreamEntry::Raw(record)) => record,
            _ => return Err(AVIERR_BADHANDLE),
        };
        let format = record.format.as_ref().ok_or(AVIERR_NODATA)?;
        let chunk = position
            .checked_sub(record.header.start)
            .and_then(|slot| record.chunks.get(slot as usize))
            .ok_or(AVIERR_NODATA)?;

        let pixels: &[u8] = match state.codec.as_mut() {
            Some(codec) => {
                state.buffer.clear();
                check_decoded_len(&**codec, chunk, format.header.size_image as usize)
                    .and_then(|_| codec.decode_into(chunk, &mut state.buffer))
                    .map_err(|e| {
                        warn!("Decoding frame {} failed: {}", position, e);
                        AVIERR_BADFORMAT
                    })?;
                if state.buffer.len() != format.header.size_image as usize {
                    return Err(AVIERR_BADFORMAT);
                }
                &state.buffer[..]
            }
            None => &chunk[..],
        };

        let dib = match state.output_bits {
            Some(bits) => {
                let rows = repack_rows(
                    pixels,
                    format.header.width.unsigned_abs(),
                    format.header.height.unsigned_abs(),
                    format.header.bit_count,
                )
                .ok_or(AVIERR_BADFORMAT)?;
                repacked_format(format, bits).to_dib(&rows)
            }
            None => format.to_dib(pixels),
        };
        Ok(Bytes::from(dib))
    }

    fn get_frame_close(&mut self, decoder: FrameDecoderHandle) {
        self.decoders.remove(&decoder);
    }

    fn save(&mut self, path: &Path, streams: &[StreamHandle], options: &[CompressionOptions]) -> Status {
        if streams.is_empty() || streams.len() != options.len() {
            return AVIERR_BADPARAM;
        }

        let mut disk = Vec::with_capacity(streams.len());
        for (stream, options) in streams.iter().zip(options) {
            match self.disk_stream(*stream, options) {
                Ok(s) => disk.push(s),
                Err(status) => return status,
            }
        }

        let bytes = match riff::write_avi(&disk) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Building AVI for {} failed: {}", path.display(), e);
                return AVIERR_INTERNAL;
            }
        };
        if let Err(e) = std::fs::write(path, &bytes) {
            warn!("Writing {} failed: {}", path.display(), e);
            return AVIERR_FILEWRITE;
        }

        info!(
            "Saved {} stream(s), {} bytes to {}",
            disk.len(),
            bytes.len(),
            path.display()
        );
        AVIERR_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::build_container_header;
    use crate::header::build_format_header;
    use crate::palette::Rgb;
    use crate::stream::VideoStreamDescriptor;

    fn setup(env: &mut MemoryEnvironment) -> (StreamHandle, FormatHeader) {
        let file = env.create_file();
        let descriptor = VideoStreamDescriptor::new(25.0, 2, 2, 24, 16).unwrap();
        let stream = env
            .create_stream(file, &build_container_header(&descriptor, FourCC::DIB))
            .unwrap();
        (stream, build_format_header(&descriptor, &PaletteTable::empty()))
    }

    #[test]
    fn test_write_requires_format_and_exact_size() {
        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);

        assert_eq!(env.write(stream, 0, 1, &[0; 16], AVIIF_KEYFRAME), AVIERR_BADFORMAT);
        assert_eq!(env.set_format(stream, 0, &format), AVIERR_OK);
        assert_eq!(env.write(stream, 0, 1, &[0; 15], AVIIF_KEYFRAME), AVIERR_BADSIZE);
        assert_eq!(env.write(stream, 0, 2, &[0; 16], AVIIF_KEYFRAME), AVIERR_BADPARAM);
        assert_eq!(env.write(stream, 0, 1, &[0; 16], AVIIF_KEYFRAME), AVIERR_OK);
    }

    #[test]
    fn test_writes_are_sequential() {
        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);
        env.set_format(stream, 0, &format);

        assert_eq!(env.write(stream, 1, 1, &[0; 16], 0), AVIERR_BADPARAM);
        assert_eq!(env.write(stream, 0, 1, &[0; 16], 0), AVIERR_OK);
        assert_eq!(env.write(stream, 1, 1, &[1; 16], 0), AVIERR_OK);
        // rewriting an existing slot replaces it
        assert_eq!(env.write(stream, 1, 1, &[2; 16], 0), AVIERR_OK);
        assert_eq!(env.stream_length(stream), Ok(2));
    }

    #[test]
    fn test_format_is_fixed_once_frames_exist() {
        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);
        env.set_format(stream, 0, &format);
        env.write(stream, 0, 1, &[0; 16], 0);

        assert_eq!(env.set_format(stream, 0, &format), AVIERR_OK);
        let mut other = format.clone();
        other.header.width = 4;
        assert_eq!(env.set_format(stream, 0, &other), AVIERR_BADFORMAT);

        // bitfields rows need their masks
        let mut bare = format.clone();
        bare.header.compression = BI_BITFIELDS;
        assert_eq!(env.set_format(stream, 0, &bare), AVIERR_BADFORMAT);
    }

    #[test]
    fn test_unknown_handles() {
        let mut env = MemoryEnvironment::new();
        let (_, format) = setup(&mut env);
        let ghost = StreamHandle(999);

        assert_eq!(env.set_format(ghost, 0, &format), AVIERR_BADHANDLE);
        assert_eq!(env.stream_length(ghost), Err(AVIERR_BADHANDLE));
        assert_eq!(env.get_frame(FrameDecoderHandle(999), 0), Err(AVIERR_BADHANDLE));
        let header = build_container_header(
            &VideoStreamDescriptor::new(25.0, 2, 2, 24, 16).unwrap(),
            FourCC::DIB,
        );
        assert_eq!(env.create_stream(FileHandle(999), &header), Err(AVIERR_BADHANDLE));
    }

    #[test]
    fn test_compressed_writes_land_on_source() {
        let mut env = MemoryEnvironment::new();
        let (raw, format) = setup(&mut env);
        let compressed = env
            .make_compressed_stream(raw, &CompressionOptions::default_profile())
            .unwrap();
        assert_eq!(env.set_format(compressed, 0, &format), AVIERR_OK);

        assert_eq!(env.write(compressed, 0, 1, &[5; 16], AVIIF_KEYFRAME), AVIERR_OK);
        assert_eq!(env.write(raw, 1, 1, &[5; 16], AVIIF_KEYFRAME), AVIERR_UNSUPPORTED);
        assert_eq!(env.stream_length(raw), Ok(1));
        assert_eq!(env.stream_info(raw).unwrap().fcc_handler, FourCC::LZ4);

        let decoder = env.get_frame_open(raw, &BitmapInfoHeader::default()).unwrap();
        let dib = env.get_frame(decoder, 0).unwrap();
        assert_eq!(&dib[BitmapInfoHeader::SIZE..], &[5u8; 16][..]);
        env.get_frame_close(decoder);
        assert_eq!(env.open_decoders(), 0);
    }

    #[test]
    fn test_compressed_stream_rejections() {
        let mut env = MemoryEnvironment::new();
        let (raw, format) = setup(&mut env);

        assert_eq!(
            env.make_compressed_stream(raw, &CompressionOptions::uncompressed()).err(),
            Some(AVIERR_BADPARAM)
        );
        env.set_format(raw, 0, &format);
        env.write(raw, 0, 1, &[0; 16], 0);
        assert_eq!(
            env.make_compressed_stream(raw, &CompressionOptions::default_profile()).err(),
            Some(AVIERR_UNSUPPORTED)
        );
    }

    #[test]
    fn test_decoder_refuses_other_depths() {
        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);
        let request = BitmapInfoHeader {
            bit_count: 32,
            ..Default::default()
        };
        // no format yet
        assert!(env.get_frame_open(stream, &BitmapInfoHeader::default()).is_none());

        env.set_format(stream, 0, &format);
        assert!(env.get_frame_open(stream, &request).is_none());
        let odd = BitmapInfoHeader {
            bit_count: 12,
            ..Default::default()
        };
        assert!(env.get_frame_open(stream, &odd).is_none());
    }

    #[test]
    fn test_decoder_serves_one_bit_rows_as_nibbles() {
        let mut env = MemoryEnvironment::new();
        let file = env.create_file();
        let descriptor = VideoStreamDescriptor::new(25.0, 8, 1, 1, 4).unwrap();
        let stream = env
            .create_stream(file, &build_container_header(&descriptor, FourCC::DIB))
            .unwrap();
        let palette = PaletteTable::from_bitmap_palette(&[Rgb::new(1, 2, 3), Rgb::new(4, 5, 6)], 2);
        env.set_format(stream, 0, &build_format_header(&descriptor, &palette));
        env.write(stream, 0, 1, &[0b1000_0001, 0, 0, 0], AVIIF_KEYFRAME);

        let eight = BitmapInfoHeader {
            bit_count: 8,
            ..Default::default()
        };
        assert!(env.get_frame_open(stream, &eight).is_none());

        let four = BitmapInfoHeader {
            bit_count: 4,
            ..Default::default()
        };
        let decoder = env.get_frame_open(stream, &four).unwrap();
        let dib = env.get_frame(decoder, 0).unwrap();
        let header = BitmapInfoHeader::read_from(&mut &dib[..]).unwrap();
        assert_eq!((header.bit_count, header.clr_used, header.size_image), (4, 16, 4));
        let pixels = BitmapInfoHeader::SIZE + 16 * 4;
        // second palette entry survives the widening, the rest is black
        assert_eq!(&dib[44..48], &[6, 5, 4, 0]);
        assert_eq!(&dib[48..52], &[0, 0, 0, 0]);
        assert_eq!(&dib[pixels..], &[0x10, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_decoder_serves_deep_rows_as_32_bit() {
        let mut env = MemoryEnvironment::new();
        let file = env.create_file();
        let descriptor = VideoStreamDescriptor::new(25.0, 1, 1, 64, 8).unwrap();
        let stream = env
            .create_stream(file, &build_container_header(&descriptor, FourCC::DIB))
            .unwrap();
        env.set_format(stream, 0, &build_format_header(&descriptor, &PaletteTable::empty()));
        env.write(stream, 0, 1, &[0, 0x11, 0, 0x22, 0, 0x33, 0, 0x44], AVIIF_KEYFRAME);

        let request = BitmapInfoHeader {
            bit_count: 32,
            ..Default::default()
        };
        let decoder = env.get_frame_open(stream, &request).unwrap();
        let dib = env.get_frame(decoder, 0).unwrap();
        let header = BitmapInfoHeader::read_from(&mut &dib[..]).unwrap();
        assert_eq!((header.bit_count, header.size_image), (32, 4));
        assert_eq!(&dib[BitmapInfoHeader::SIZE..], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_announced_size_is_checked_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = MemoryEnvironment::new();
        let (raw, format) = setup(&mut env);
        let compressed = env
            .make_compressed_stream(raw, &CompressionOptions::default_profile())
            .unwrap();
        env.set_format(compressed, 0, &format);
        env.write(compressed, 0, 1, &[5; 16], AVIIF_KEYFRAME);

        // a chunk claiming 4 GiB of pixels behind a two-byte payload
        if let Some(StreamEntry::Raw(record)) = env.streams.get_mut(&raw) {
            record.chunks[0] = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x10, 0x00]);
        }

        let decoder = env.get_frame_open(raw, &BitmapInfoHeader::default()).unwrap();
        assert_eq!(env.get_frame(decoder, 0), Err(AVIERR_BADFORMAT));
        assert_eq!(env.decoders[&decoder].buffer.capacity(), 0);

        let path = dir.path().join("bad.avi");
        assert_eq!(
            env.save(&path, &[raw], &[CompressionOptions::uncompressed()]),
            AVIERR_BADFORMAT
        );
        assert!(!path.exists());
    }

    #[test]
    fn test_save_and_reopen_transcodes() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");

        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);
        env.set_format(stream, 0, &format);
        for n in 0..3u8 {
            env.write(stream, n as u32, 1, &[n; 16], AVIIF_KEYFRAME);
        }
        let options = [CompressionOptions::default_profile()];
        assert_eq!(env.save(&path, &[stream], &options), AVIERR_OK);

        let file = env.open_file(&path).unwrap();
        let loaded = env.streams(file)[0];
        assert_eq!(env.stream_info(loaded).unwrap().fcc_handler, FourCC::LZ4);
        assert_eq!(env.read_format(loaded, 0).unwrap(), format);

        let decoder = env.get_frame_open(loaded, &BitmapInfoHeader::default()).unwrap();
        let dib = env.get_frame(decoder, 2).unwrap();
        assert_eq!(&dib[BitmapInfoHeader::SIZE..], &[2u8; 16][..]);
        assert_eq!(env.get_frame(decoder, 3), Err(AVIERR_NODATA));
    }

    #[test]
    fn test_save_rejects_unknown_codec() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = MemoryEnvironment::new();
        let (stream, format) = setup(&mut env);
        env.set_format(stream, 0, &format);
        env.write(stream, 0, 1, &[0; 16], 0);

        let options = [CompressionOptions::default_profile().with_handler(FourCC::from_bytes(*b"XVID"))];
        let path = dir.path().join("x.avi");
        assert_eq!(env.save(&path, &[stream], &options), AVIERR_NOCOMPRESSOR);
        assert!(!path.exists());
        assert_eq!(env.save(&path, &[stream], &[]), AVIERR_BADPARAM);
    }
}
