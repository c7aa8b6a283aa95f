// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! FFmpeg as an opaque subprocess: probing clip metadata, generating
//! thumbnails, and transcoding to MPEG-TS.
//!
//! Everything is behind capability traits so the pipeline can be tested
//! without the binaries installed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base::{bail, err, Error, ErrorKind, ResultExt as _};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Container/codec-derived display parameters for an uploaded clip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoMetadata {
    pub width: i32,
    pub height: i32,
    pub mime: String,
    pub extension: String,
}

/// A generated (plaintext) thumbnail image.
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub mime: String,
}

#[derive(Clone, Debug)]
pub struct TranscodeParams {
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub video_bitrate_kbps: u32,
    pub frame_rate: u32,
    pub keyframe_interval: u32,
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Extracts dimensions and codec/container classification from a raw
    /// uploaded clip. A width or height of zero is fatal.
    async fn probe(&self, video: &[u8]) -> Result<VideoMetadata, Error>;
}

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Produces a single-frame thumbnail of the clip. Callers treat failure
    /// as recoverable: the clip is stored without a thumbnail.
    async fn thumbnail(&self, video: &[u8], meta: &VideoMetadata) -> Result<Thumbnail, Error>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcodes `input` into an MPEG-TS file at `output` with the given
    /// parameters, audio disabled.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> Result<(), Error>;
}

/// Maps a probed codec and container onto `(mime, extension)`.
///
/// H.264/H.265 clips are served as MP4 and VP8/VP9/AV1 as WebM regardless of
/// the upload container; otherwise the container name decides, defaulting to
/// MP4.
fn classify(container: &str, codec: &str) -> (&'static str, &'static str) {
    match codec {
        "h264" | "h265" | "hevc" => return ("video/mp4", "mp4"),
        "vp8" | "vp9" | "av1" => return ("video/webm", "webm"),
        _ => {}
    }
    // ffprobe reports comma-separated format aliases, e.g.
    // "mov,mp4,m4a,3gp,3g2,mj2".
    for name in container.split(',') {
        match name {
            "webm" => return ("video/webm", "webm"),
            "matroska" => return ("video/x-matroska", "mkv"),
            "avi" => return ("video/x-msvideo", "avi"),
            "mov" | "mp4" => return ("video/mp4", "mp4"),
            _ => {}
        }
    }
    ("video/mp4", "mp4")
}

/// Subprocess-backed implementation of all three capabilities.
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Ffmpeg {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    format_name: String,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
}

impl Ffmpeg {
    /// Writes `video` to a scratch file and returns the tempdir handle
    /// (whose drop removes everything) plus the file path.
    async fn scratch(&self, video: &[u8]) -> Result<(tempfile::TempDir, PathBuf), Error> {
        let dir = tempfile::Builder::new()
            .prefix("cryospy-ffmpeg")
            .tempdir()
            .err_kind(ErrorKind::Internal)?;
        let path = dir.path().join("source");
        tokio::fs::write(&path, video)
            .await
            .err_kind(ErrorKind::Internal)?;
        Ok((dir, path))
    }
}

#[async_trait]
impl MediaProbe for Ffmpeg {
    async fn probe(&self, video: &[u8]) -> Result<VideoMetadata, Error> {
        let (_dir, path) = self.scratch(video).await?;
        let out = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| err!(Internal, msg("unable to spawn ffprobe"), source(e)))?;
        if !out.status.success() {
            bail!(
                InvalidArgument,
                msg(
                    "ffprobe rejected upload: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                )
            );
        }
        let probe: ProbeOutput = serde_json::from_slice(&out.stdout)
            .map_err(|e| err!(Internal, msg("unparseable ffprobe output"), source(e)))?;
        let stream = probe
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| err!(InvalidArgument, msg("upload has no video stream")))?;
        if stream.width <= 0 || stream.height <= 0 {
            bail!(InvalidArgument, msg("upload has no video dimensions"));
        }
        let (mime, extension) = classify(&probe.format.format_name, &stream.codec_name);
        debug!(
            codec = %stream.codec_name,
            container = %probe.format.format_name,
            mime,
            "probed upload"
        );
        Ok(VideoMetadata {
            width: stream.width,
            height: stream.height,
            mime: mime.to_owned(),
            extension: extension.to_owned(),
        })
    }
}

/// Thumbnails are emitted at a fixed width with ffmpeg rounding the height
/// to an even value (`scale=320:-2`).
const THUMBNAIL_WIDTH: i32 = 320;

#[async_trait]
impl ThumbnailGenerator for Ffmpeg {
    async fn thumbnail(&self, video: &[u8], meta: &VideoMetadata) -> Result<Thumbnail, Error> {
        let (dir, path) = self.scratch(video).await?;
        let out_path = dir.path().join("thumbnail.jpg");
        let out = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-i"])
            .arg(&path)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={THUMBNAIL_WIDTH}:-2"))
            .arg(&out_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| err!(Internal, msg("unable to spawn ffmpeg"), source(e)))?;
        if !out.status.success() {
            bail!(
                Internal,
                msg(
                    "thumbnail generation failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                )
            );
        }
        let data = tokio::fs::read(&out_path)
            .await
            .err_kind(ErrorKind::Internal)?;
        let height = (THUMBNAIL_WIDTH * meta.height / meta.width + 1) & !1;
        Ok(Thumbnail {
            data,
            width: THUMBNAIL_WIDTH,
            height,
            mime: "image/jpeg".to_owned(),
        })
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> Result<(), Error> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-i"])
            .arg(input)
            .arg("-an")
            .args(["-c:v", &params.video_codec])
            .args(["-b:v", &format!("{}k", params.video_bitrate_kbps)])
            .args(["-r", &params.frame_rate.to_string()])
            .args(["-g", &params.keyframe_interval.to_string()])
            .args(["-s", &format!("{}x{}", params.width, params.height)])
            .args(["-f", "mpegts"])
            .arg(output)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| err!(Internal, msg("unable to spawn ffmpeg"), source(e)))?;
        let mut stderr = Vec::new();
        if let Some(mut pipe) = child.stderr.take() {
            use tokio::io::AsyncReadExt as _;
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| err!(Internal, msg("ffmpeg did not exit"), source(e)))?;
        if !status.success() {
            bail!(
                Unavailable,
                msg("transcode failed: {}", String::from_utf8_lossy(&stderr).trim())
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify("mov,mp4,m4a,3gp,3g2,mj2", "h264"), ("video/mp4", "mp4"));
        assert_eq!(classify("matroska,webm", "hevc"), ("video/mp4", "mp4"));
        assert_eq!(classify("matroska,webm", "vp9"), ("video/webm", "webm"));
        assert_eq!(classify("matroska,webm", "av1"), ("video/webm", "webm"));
        // Unrecognized codec falls back to the container...
        assert_eq!(classify("avi", "mjpeg"), ("video/x-msvideo", "avi"));
        assert_eq!(classify("matroska", "ffv1"), ("video/x-matroska", "mkv"));
        // ...and an unrecognized container defaults to mp4.
        assert_eq!(classify("yuv4mpegpipe", "rawvideo"), ("video/mp4", "mp4"));
    }
}
