use avistream::pixel::dib_stride;
use avistream::{
    Compression, ContainerStream, FrameBuffer, MemoryEnvironment, PixelFormat, PlaybackStream,
    ReadableFrameStream, RecordingStream, WritableFrameStream,
};
use std::path::PathBuf;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAMES: u32 = 90;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("clip.avi"));

    let mut env = MemoryEnvironment::new();
    let file = env.create_file();
    let stride = dib_stride(WIDTH, 24);
    let mut data = vec![0u8; stride * HEIGHT as usize];

    let mut stream: Option<RecordingStream> = None;
    for n in 0..FRAMES {
        // Diagonal bands that scroll one pixel per frame
        for (y, row) in data.chunks_mut(stride).enumerate() {
            for (x, px) in row[..WIDTH as usize * 3].chunks_mut(3).enumerate() {
                let v = ((x + y + n as usize) % 256) as u8;
                px.copy_from_slice(&[v, 255 - v, (n * 2) as u8]);
            }
        }
        let frame = FrameBuffer::new(&data, WIDTH, HEIGHT, PixelFormat::Rgb24)?;

        match stream.as_mut() {
            Some(s) => s.append_frame(&mut env, &frame)?,
            None => {
                stream = Some(RecordingStream::with_first_frame(
                    &mut env,
                    file,
                    29.97,
                    &frame,
                    Compression::Default,
                )?)
            }
        }
    }

    let mut stream = stream.ok_or("no frames recorded")?;
    stream.export(&mut env, &path, None)?;
    println!("Wrote {} frames to {}", stream.frame_count(), path.display());

    // Read the file back and dump the middle frame
    let loaded = env.open_file(&path)?;
    let handle = *env.streams(loaded).first().ok_or("file has no streams")?;
    let playback = PlaybackStream::open(&mut env, loaded, handle)?;
    let mut session = playback.open_session(&mut env)?;
    let image = session.get_frame(playback.frame_count() / 2)?;

    let png = path.with_extension("png");
    image.save(&png)?;
    println!("Saved frame {} as {}", playback.frame_count() / 2, png.display());

    Ok(())
}
