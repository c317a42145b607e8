//! Video file decoding via ffmpeg-next (libavformat + libavcodec).
//!
//! Frames are decoded lazily and scaled straight to 8-bit grayscale, so a
//! long recording never sits in memory.

use crate::source::SourceError;
use candor_core::frame::Frame;
use candor_core::sampling::{FrameSource, FrameSourceError};
use std::path::Path;

pub struct VideoSource {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    width: u32,
    height: u32,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

impl VideoSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }
        ffmpeg_next::init().map_err(ffmpeg_err)?;

        let ictx = ffmpeg_next::format::input(path).map_err(ffmpeg_err)?;

        let (video_stream_index, decoder, fps) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| SourceError::Decode(format!("{}: no video stream", path.display())))?;
            let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                .map_err(ffmpeg_err)?;
            let rate = stream.rate();
            let fps = if rate.denominator() != 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            };
            (stream.index(), codec_ctx.decoder().video().map_err(ffmpeg_err)?, fps)
        };

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::GRAY8,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(ffmpeg_err)?;

        tracing::info!(path = %path.display(), width, height, fps, "opened video");

        Ok(Self {
            ictx,
            decoder,
            scaler,
            video_stream_index,
            width,
            height,
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut gray = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(&decoded, &mut gray)
            .map_err(|e| FrameSourceError::Read(format!("scale: {e}")))?;

        let pixels = extract_gray_pixels(&gray, self.width, self.height);
        let frame = Frame::from_gray(pixels, self.width, self.height, self.frame_index)?;
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.done {
            return Ok(None);
        }
        if let Some(frame) = self.try_receive()? {
            return Ok(Some(frame));
        }
        if self.flushing {
            self.done = true;
            return Ok(None);
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(frame) = self.try_receive()? {
                    return Ok(Some(frame));
                }
                self.done = true;
                return Ok(None);
            };

            if stream.index() != self.video_stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                tracing::debug!(error = %e, "dropping undecodable packet");
                continue;
            }
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
        }
    }
}

fn ffmpeg_err(e: ffmpeg_next::Error) -> SourceError {
    SourceError::Decode(e.to_string())
}

/// Copy the luma plane, dropping per-row padding (stride > width).
fn extract_gray_pixels(frame: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = frame.stride(0);
    let data = frame.data(0);
    let w = width as usize;

    let mut pixels = Vec::with_capacity(w * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + w]);
    }
    pixels
}
