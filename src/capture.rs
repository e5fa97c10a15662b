//! Frame sampling: turns an uploaded clip into the inline data URLs the
//! chat-vision API accepts.

use std::path::Path;
use std::sync::Once;

use base64::Engine;
use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, format, media, rescale, software, Rescale};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::ImageBuffer;

/// Upper bound on frames attached to a single model request.
pub const MAX_FRAMES: usize = 16;

const JPEG_QUALITY: u8 = 90;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        ffmpeg::init().unwrap();
    });
}

/// Clip duration in seconds.
pub fn probe_duration(input_path: &Path) -> anyhow::Result<f64> {
    let input = format::input(&input_path)?;
    let duration = input.duration();
    if duration <= 0 {
        anyhow::bail!("clip has no duration metadata");
    }
    Ok(duration as f64 * f64::from(rescale::TIME_BASE))
}

/// Inline an already-encoded image as a data URL.
pub fn image_data_url(bytes: &[u8], mime: &str) -> String {
    use base64::prelude::BASE64_STANDARD;
    format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
}

/// Decode the clip and sample frames every `interval_ms` inside the window,
/// JPEG-encoded as `data:image/jpeg;base64,` URLs. Capped at [`MAX_FRAMES`].
pub fn sample_frames(
    input_path: &Path,
    start_ms: u32,
    duration_ms: u32,
    interval_ms: u32,
) -> anyhow::Result<Vec<String>> {
    use base64::prelude::BASE64_STANDARD;

    let mut input = format::input(&input_path)?;

    let start_sec = i64::from(start_ms / 1000);
    let start_pos = start_sec.rescale((1, 1), rescale::TIME_BASE);
    input.seek(start_pos, ..start_pos)?;

    let video_stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?;
    let video_stream_index = video_stream.index();
    let time_base = video_stream.time_base();

    let mut decoder = codec::context::Context::from_parameters(video_stream.parameters())?
        .decoder()
        .video()?;

    let mut scaler = software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        software::scaling::Flags::BILINEAR,
    )?;

    let start_pts = i64::from(start_ms).rescale((1, 1000), time_base);
    let end_pts = i64::from(start_ms + duration_ms).rescale((1, 1000), time_base);
    let interval = i64::from(interval_ms.max(1)).rescale((1, 1000), time_base);
    let mut next_pts = start_pts;

    let mut base64_frames = Vec::new();
    // Returns true once the frame cap is reached.
    let mut receive_and_process_decoded_frames =
        |decoder: &mut ffmpeg::decoder::Video| -> anyhow::Result<bool> {
            let mut decoded = Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                if base64_frames.len() >= MAX_FRAMES {
                    return Ok(true);
                }
                match decoded.timestamp() {
                    Some(pts) => {
                        if pts < next_pts {
                            continue;
                        }
                        if pts > end_pts {
                            break;
                        }
                        next_pts += interval;
                    }
                    None => return Err(anyhow::anyhow!("decoded frame has no timestamp")),
                }

                let mut rgb_frame = Video::empty();
                scaler.run(&decoded, &mut rgb_frame)?;
                let image_buffer = ImageBuffer::<image::Rgb<u8>, _>::from_raw(
                    rgb_frame.width(),
                    rgb_frame.height(),
                    rgb_frame.data(0).to_vec(),
                )
                .ok_or(anyhow::anyhow!("failed to create image buffer"))?;

                let mut jpeg_data = Vec::new();
                let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, JPEG_QUALITY);
                encoder.encode(
                    &image_buffer,
                    image_buffer.width(),
                    image_buffer.height(),
                    image::ExtendedColorType::Rgb8,
                )?;

                base64_frames
                    .push("data:image/jpeg;base64,".to_owned() + &BASE64_STANDARD.encode(jpeg_data));
            }
            Ok(false)
        };

    for (stream, packet) in input.packets() {
        if stream.index() == video_stream_index {
            decoder.send_packet(&packet)?;
            if receive_and_process_decoded_frames(&mut decoder)? {
                break;
            }
        }
    }
    decoder.send_eof()?;
    receive_and_process_decoded_frames(&mut decoder)?;

    if base64_frames.is_empty() {
        anyhow::bail!("no frames decoded inside the capture window");
    }
    Ok(base64_frames)
}

/// Probe the clip and spread roughly `target` frames across the whole of it.
pub fn frames_for_clip(input_path: &Path, target: usize) -> anyhow::Result<Vec<String>> {
    let duration_secs = probe_duration(input_path)?;
    let interval_ms = interval_for_duration(duration_secs, target);
    sample_frames(input_path, 0, (duration_secs * 1000.0) as u32, interval_ms)
}

/// Sampling interval that spreads roughly `target` frames across a clip.
pub fn interval_for_duration(duration_secs: f64, target: usize) -> u32 {
    let target = target.clamp(1, MAX_FRAMES) as f64;
    let millis = (duration_secs.max(0.0) * 1000.0 / target).round() as u32;
    millis.max(250)
}
