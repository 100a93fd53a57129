use log::{debug, log_enabled, Level};

use crate::environment::{MediaEnvironment, StreamHandle, AVIERR_OK, AVIIF_KEYFRAME};
use crate::error::{AviError, Result};
use crate::palette::PaletteTable;
use crate::pixel::{dib_stride, row_bytes, FrameBuffer, PixelFormat};
use crate::stream::{StreamState, VideoStreamDescriptor, WritePhase};

/// Frame rows in container order: bottom row first, DIB stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFrame {
    pub pixels: Vec<u8>,
    pub stride: usize,
    pub bits_per_pixel: u16,
}

/// Turns a top-down frame into bottom-up DIB rows (a 180° rotation plus a
/// horizontal mirror) padded to a 4-byte stride.
pub fn normalize_orientation(frame: &FrameBuffer<'_>) -> Result<NormalizedFrame> {
    let bits = frame.validate()?;
    // DIB rows have no 16-bit grayscale layout.
    if frame.format == PixelFormat::Gray16 {
        return Err(AviError::UnsupportedFormat(frame.format));
    }
    let row = row_bytes(frame.width, bits);
    let stride = dib_stride(frame.width, bits);
    let height = frame.height as usize;

    let mut pixels = vec![0u8; stride * height];
    for (y, dst) in pixels.chunks_exact_mut(stride).enumerate() {
        let src_start = (height - 1 - y) * frame.stride;
        dst[..row].copy_from_slice(&frame.data[src_start..src_start + row]);
    }

    Ok(NormalizedFrame {
        pixels,
        stride,
        bits_per_pixel: bits,
    })
}

/// State for a stream whose format comes from `frame`.
pub(crate) fn seed_state(frame_rate: f64, frame: &FrameBuffer<'_>) -> Result<StreamState> {
    let normalized = normalize_orientation(frame)?;
    let descriptor = VideoStreamDescriptor::new(
        frame_rate,
        frame.width,
        frame.height,
        normalized.bits_per_pixel,
        normalized.pixels.len() as u32,
    )?;
    let palette = PaletteTable::from_bitmap_palette(
        frame.palette,
        PaletteTable::capacity_for(normalized.bits_per_pixel),
    );
    let mut state = StreamState::new(descriptor, palette);
    state.channel_masks = frame.format.channel_masks();
    Ok(state)
}

/// Writes `frame` at index `frame_count` of `target` and returns the state
/// after the write. On error nothing in `state` has advanced.
pub(crate) fn append_frame<E: MediaEnvironment>(
    env: &mut E,
    target: StreamHandle,
    state: &StreamState,
    frame: &FrameBuffer<'_>,
) -> Result<StreamState> {
    // Orientation first: it fixes the stride the format is measured with.
    let normalized = normalize_orientation(frame)?;
    let mut next = state.clone();

    match state.phase {
        WritePhase::Unformatted => {
            let d = &mut next.descriptor;
            d.width = frame.width;
            d.height = frame.height;
            d.bits_per_pixel = normalized.bits_per_pixel;
            d.frame_size = normalized.pixels.len() as u32;
            next.palette = PaletteTable::from_bitmap_palette(
                frame.palette,
                PaletteTable::capacity_for(normalized.bits_per_pixel),
            );
            next.channel_masks = frame.format.channel_masks();

            let format = next.format_header();
            let status = env.set_format(target, state.descriptor.frame_count, &format);
            if status != AVIERR_OK {
                return Err(AviError::FormatRejected { status });
            }
            next.phase = WritePhase::Formatted;
        }
        WritePhase::Formatted => check_matches(state, frame, &normalized)?,
    }

    let position = state.descriptor.frame_count;
    let status = env.write(target, position, 1, &normalized.pixels, AVIIF_KEYFRAME);
    if status != AVIERR_OK {
        return Err(AviError::WriteRejected { position, status });
    }
    next.descriptor.frame_count += 1;

    if log_enabled!(Level::Debug) {
        debug!(
            "Wrote frame {} ({} bytes, stride {})",
            position,
            normalized.pixels.len(),
            normalized.stride
        );
    }
    Ok(next)
}

fn check_matches(state: &StreamState, frame: &FrameBuffer<'_>, normalized: &NormalizedFrame) -> Result<()> {
    let descriptor = &state.descriptor;
    if frame.format.channel_masks() != state.channel_masks {
        return Err(AviError::FrameMismatch(format!(
            "{:?} frame does not match the stream's 16-bit layout",
            frame.format
        )));
    }
    if normalized.bits_per_pixel != descriptor.bits_per_pixel {
        return Err(AviError::FrameMismatch(format!(
            "{} bits per pixel, stream has {}",
            normalized.bits_per_pixel, descriptor.bits_per_pixel
        )));
    }
    if frame.width != descriptor.width || frame.height != descriptor.height {
        return Err(AviError::FrameMismatch(format!(
            "{}x{} frame, stream is {}x{}",
            frame.width, frame.height, descriptor.width, descriptor.height
        )));
    }
    if normalized.pixels.len() != descriptor.frame_size as usize {
        return Err(AviError::FrameMismatch(format!(
            "{} bytes per frame, stream has {}",
            normalized.pixels.len(),
            descriptor.frame_size
        )));
    }
    Ok(())
}
