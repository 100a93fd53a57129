//! RIFF/AVI file serialization.
//!
//! Layout written:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih
//!     LIST 'strl' (per stream)
//!       strh
//!       strf
//!   LIST 'movi'
//!     NNdb | NNdc (per frame)
//!   idx1
//! ```
//!
//! Every chunk is `id (4 bytes) + size (u32 LE) + payload`, padded to an
//! even length.

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;

use crate::environment::AVIIF_KEYFRAME;
use crate::error::{AviError, Result};
use crate::header::{FormatHeader, StreamHeader};

pub(crate) const AVIF_HASINDEX: u32 = 0x10;
const AVI_MAIN_HEADER_SIZE: usize = 56;

/// One stream as it appears in the file. `format` is the on-disk `strf`
/// block, so its compression field names the codec of `chunks`.
#[derive(Debug, Clone)]
pub(crate) struct AviStream {
    pub header: StreamHeader,
    pub format: FormatHeader,
    pub chunks: Vec<Bytes>,
}

impl AviStream {
    fn is_compressed(&self) -> bool {
        self.format.header.compression != 0
    }
}

/// Chunk: id + size (u32 LE) + payload, padded to an even length.
pub(crate) fn write_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len() + 1);
    out.extend_from_slice(id);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// LIST chunk: 'LIST' + size + kind + children concatenated.
pub(crate) fn write_list(kind: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(12 + children_len);
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&((4 + children_len) as u32).to_le_bytes());
    out.extend_from_slice(kind);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

fn chunk_id(stream_index: usize, compressed: bool) -> [u8; 4] {
    let digits = format!("{:02}", stream_index % 100);
    let digits = digits.as_bytes();
    let suffix = if compressed { b"dc" } else { b"db" };
    [digits[0], digits[1], suffix[0], suffix[1]]
}

fn write_main_header(streams: &[AviStream]) -> Result<Vec<u8>> {
    let first = streams
        .first()
        .ok_or_else(|| AviError::container("no streams to write"))?;

    let rate = first.header.rate.max(1) as u64;
    let scale = first.header.scale as u64;
    let max_chunk = streams
        .iter()
        .flat_map(|s| s.chunks.iter().map(|c| c.len()))
        .max()
        .unwrap_or(0) as u64;

    let mut content = Vec::with_capacity(AVI_MAIN_HEADER_SIZE);
    content.write_u32::<LittleEndian>((1_000_000 * scale / rate) as u32)?;
    content.write_u32::<LittleEndian>((max_chunk * rate / scale.max(1)).min(u32::MAX as u64) as u32)?;
    content.write_u32::<LittleEndian>(0)?; // padding granularity
    content.write_u32::<LittleEndian>(AVIF_HASINDEX)?;
    content.write_u32::<LittleEndian>(first.chunks.len() as u32)?;
    content.write_u32::<LittleEndian>(0)?; // initial frames
    content.write_u32::<LittleEndian>(streams.len() as u32)?;
    content.write_u32::<LittleEndian>(max_chunk as u32)?;
    content.write_i32::<LittleEndian>(first.header.frame.right - first.header.frame.left)?;
    content.write_i32::<LittleEndian>(first.header.frame.bottom - first.header.frame.top)?;
    for _ in 0..4 {
        content.write_u32::<LittleEndian>(0)?;
    }
    Ok(write_chunk(b"avih", &content))
}

/// Serializes `streams` into a complete AVI file.
pub(crate) fn write_avi(streams: &[AviStream]) -> Result<Vec<u8>> {
    let avih = write_main_header(streams)?;

    let mut strls = Vec::with_capacity(streams.len());
    for stream in streams {
        let mut strh = Vec::with_capacity(StreamHeader::SIZE);
        stream.header.write_to(&mut strh)?;
        let strh = write_chunk(b"strh", &strh);
        let strf = write_chunk(b"strf", &stream.format.to_bytes());
        strls.push(write_list(b"strl", &[strh.as_slice(), strf.as_slice()]));
    }
    let mut hdrl_children: Vec<&[u8]> = vec![avih.as_slice()];
    hdrl_children.extend(strls.iter().map(|s| s.as_slice()));
    let hdrl = write_list(b"hdrl", &hdrl_children);

    // Offsets in idx1 count from the 'movi' kind tag.
    let mut frames = Vec::new();
    let mut index = Vec::new();
    let mut offset = 4u64;
    for (n, stream) in streams.iter().enumerate() {
        let id = chunk_id(n, stream.is_compressed());
        for chunk in &stream.chunks {
            let encoded = write_chunk(&id, chunk);
            index.extend_from_slice(&id);
            index.write_u32::<LittleEndian>(AVIIF_KEYFRAME)?;
            index.write_u32::<LittleEndian>(offset as u32)?;
            index.write_u32::<LittleEndian>(chunk.len() as u32)?;
            offset += encoded.len() as u64;
            frames.push(encoded);
        }
    }
    let frame_refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
    let movi = write_list(b"movi", &frame_refs);
    let idx1 = write_chunk(b"idx1", &index);

    let body_len = 4 + hdrl.len() + movi.len() + idx1.len();
    if body_len > u32::MAX as usize {
        return Err(AviError::container("file exceeds the 4 GiB RIFF limit"));
    }

    let mut out = Vec::with_capacity(8 + body_len);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(body_len as u32)?;
    out.extend_from_slice(b"AVI ");
    out.extend_from_slice(&hdrl);
    out.extend_from_slice(&movi);
    out.extend_from_slice(&idx1);
    Ok(out)
}

/// Calls `f` with the id and payload of every chunk in `data`.
fn for_each_chunk<'a, F>(data: &'a [u8], mut f: F) -> Result<()>
where
    F: FnMut([u8; 4], &'a [u8]) -> Result<()>,
{
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let id = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
        let size = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]) as usize;
        let start = pos + 8;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                AviError::container(format!(
                    "chunk {} at {} overruns its parent",
                    String::from_utf8_lossy(&id),
                    pos
                ))
            })?;
        f(id, &data[start..end])?;
        pos = end + (size & 1);
    }
    Ok(())
}

/// Splits a LIST payload into its kind tag and children.
fn list_kind(payload: &[u8]) -> Result<([u8; 4], &[u8])> {
    if payload.len() < 4 {
        return Err(AviError::container("LIST chunk without a kind"));
    }
    Ok(([payload[0], payload[1], payload[2], payload[3]], &payload[4..]))
}

fn parse_strl(data: &[u8]) -> Result<AviStream> {
    let mut header = None;
    let mut format = None;
    for_each_chunk(data, |id, payload| {
        match &id {
            b"strh" => header = Some(StreamHeader::read_from(&mut &payload[..])?),
            b"strf" => format = Some(FormatHeader::from_bytes(payload)?),
            _ => {}
        }
        Ok(())
    })?;

    match (header, format) {
        (Some(header), Some(format)) => Ok(AviStream {
            header,
            format,
            chunks: Vec::new(),
        }),
        _ => Err(AviError::container("stream list without strh/strf")),
    }
}

fn stream_number(id: &[u8; 4]) -> Option<usize> {
    if id[0].is_ascii_digit() && id[1].is_ascii_digit() {
        Some(((id[0] - b'0') * 10 + (id[1] - b'0')) as usize)
    } else {
        None
    }
}

fn parse_movi(data: &[u8], streams: &mut [AviStream]) -> Result<()> {
    for_each_chunk(data, |id, payload| {
        if &id == b"LIST" {
            // 'rec ' groups interleaved chunks
            let (_, children) = list_kind(payload)?;
            return parse_movi(children, streams);
        }
        let is_video = &id[2..] == b"db" || &id[2..] == b"dc";
        if let (true, Some(n)) = (is_video, stream_number(&id)) {
            let stream = streams
                .get_mut(n)
                .ok_or_else(|| AviError::container(format!("frame for unknown stream {}", n)))?;
            stream.chunks.push(Bytes::copy_from_slice(payload));
        }
        Ok(())
    })
}

/// Parses an AVI file into its streams and their frame chunks.
pub(crate) fn read_avi(bytes: &[u8]) -> Result<Vec<AviStream>> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"AVI " {
        return Err(AviError::container("not a RIFF AVI file"));
    }
    let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let end = (8 + declared).min(bytes.len());

    let mut streams = Vec::new();
    for_each_chunk(&bytes[12..end], |id, payload| {
        if &id != b"LIST" {
            return Ok(());
        }
        let (kind, children) = list_kind(payload)?;
        match &kind {
            b"hdrl" => for_each_chunk(children, |id, payload| {
                if &id == b"LIST" {
                    let (kind, children) = list_kind(payload)?;
                    if &kind == b"strl" {
                        streams.push(parse_strl(children)?);
                    }
                }
                Ok(())
            }),
            b"movi" => parse_movi(children, &mut streams),
            _ => Ok(()),
        }
    })?;

    if streams.is_empty() {
        return Err(AviError::container("AVI file declares no streams"));
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{build_container_header, build_format_header, FourCC};
    use crate::palette::PaletteTable;
    use crate::stream::VideoStreamDescriptor;

    fn read_u32(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn sample_stream(frames: usize) -> AviStream {
        let mut descriptor = VideoStreamDescriptor::new(25.0, 2, 1, 24, 8).unwrap();
        descriptor.frame_count = frames as u32;
        let mut header = build_container_header(&descriptor, FourCC::DIB);
        header.length = frames as u32;
        AviStream {
            header,
            format: build_format_header(&descriptor, &PaletteTable::empty()),
            chunks: (0..frames).map(|n| Bytes::from(vec![n as u8; 8])).collect(),
        }
    }

    #[test]
    fn test_write_chunk_pads_odd_payload() {
        let c = write_chunk(b"test", &[1, 2, 3]);
        assert_eq!(c.len(), 12); // 8 header + 3 payload + 1 pad
        assert_eq!(&c[0..4], b"test");
        assert_eq!(read_u32(&c, 4), 3);
        assert_eq!(c[11], 0);
    }

    #[test]
    fn test_write_list_size_counts_kind() {
        let child = write_chunk(b"ch_1", &[0xAA, 0xBB]);
        let list = write_list(b"kind", &[child.as_slice()]);
        assert_eq!(&list[0..4], b"LIST");
        assert_eq!(read_u32(&list, 4) as usize, 4 + child.len());
        assert_eq!(&list[8..12], b"kind");
    }

    #[test]
    fn test_chunk_ids() {
        assert_eq!(&chunk_id(0, false), b"00db");
        assert_eq!(&chunk_id(1, true), b"01dc");
        assert_eq!(stream_number(b"12dc"), Some(12));
        assert_eq!(stream_number(b"ix00"), None);
    }

    #[test]
    fn test_file_layout() {
        let file = write_avi(&[sample_stream(3)]).unwrap();
        assert_eq!(&file[0..4], b"RIFF");
        assert_eq!(read_u32(&file, 4) as usize, file.len() - 8);
        assert_eq!(&file[8..12], b"AVI ");
        assert_eq!(&file[12..16], b"LIST");
        assert_eq!(&file[20..24], b"hdrl");
        assert_eq!(&file[24..28], b"avih");
        // microseconds per frame at 25 fps
        assert_eq!(read_u32(&file, 32), 40_000);
        let tail = &file[file.len() - (8 + 3 * 16)..];
        assert_eq!(&tail[0..4], b"idx1");
        assert_eq!(read_u32(tail, 4), 48);
        assert_eq!(&tail[8..12], b"00db");
    }

    #[test]
    fn test_read_back_streams() {
        let written = sample_stream(4);
        let file = write_avi(&[written.clone()]).unwrap();
        let streams = read_avi(&file).unwrap();

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].header, written.header);
        assert_eq!(streams[0].format, written.format);
        assert_eq!(streams[0].chunks, written.chunks);
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let written = sample_stream(1);
        let mut file = write_avi(&[written]).unwrap();
        let junk = write_chunk(b"JUNK", &[0u8; 5]);
        file.extend_from_slice(&junk);
        let size = (file.len() - 8) as u32;
        file[4..8].copy_from_slice(&size.to_le_bytes());

        assert_eq!(read_avi(&file).unwrap()[0].chunks.len(), 1);
    }

    #[test]
    fn test_rejects_non_avi() {
        assert!(matches!(read_avi(b"RIFF\0\0\0\0WAVE"), Err(AviError::Container(_))));
        let mut file = write_avi(&[sample_stream(2)]).unwrap();
        file.truncate(file.len() - 40);
        assert!(read_avi(&file).is_err());
    }
}
