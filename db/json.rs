// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! JSON types stored in database columns.

use base::{bail, Error};
use serde::{Deserialize, Serialize};

/// Resolutions a client may be told to downscale to; the empty string means
/// "keep the capture resolution".
pub const DOWNSCALE_RESOLUTIONS: [&str; 8] = [
    "",
    "360p",
    "480p",
    "640x480",
    "720p",
    "800x600",
    "1024x768",
    "1080p",
];

/// Codecs the edge capture pipeline understands.
pub const CAPTURE_CODECS: [&str; 3] = ["MJPG", "YUYV", "H264"];

/// Encoders the edge may be told to produce clips with.
pub const OUTPUT_CODECS: [&str; 5] = ["libx264", "libopenh264", "libx265", "libvpx-vp9", "ffv1"];

/// Container formats the edge may be told to produce clips in.
pub const OUTPUT_FORMATS: [&str; 5] = ["mp4", "avi", "mkv", "webm", "mov"];

/// Bitrates the edge may be told to encode at.
pub const VIDEO_BITRATES: [&str; 6] = ["500k", "1000k", "1500k", "4000k", "8000k", "15000k"];

pub const MIN_CLIP_DURATION_SECONDS: u32 = 30;
pub const MAX_CLIP_DURATION_SECONDS: u32 = 1800;

/// Per-client capture/encode settings, stored in the `client.config` column
/// as JSON and returned to the edge via `GET /api/client/settings`.
///
/// The motion-detection tunables and frame rate are free-form numerics
/// validated on the edge.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Storage quota in whole megabytes; zero or negative means unlimited.
    #[serde(default)]
    pub storage_limit_megabytes: i64,

    #[serde(default = "default_clip_duration")]
    pub clip_duration_seconds: u32,

    /// Upload only clips in which motion was detected.
    #[serde(default)]
    pub motion_only: bool,

    #[serde(default)]
    pub grayscale: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub downscale_resolution: String,

    #[serde(default = "default_capture_codec")]
    pub capture_codec: String,

    #[serde(default = "default_output_codec")]
    pub output_codec: String,

    #[serde(default = "default_output_format")]
    pub output_format: String,

    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    #[serde(default = "default_capture_frame_rate")]
    pub capture_frame_rate: f64,

    /// Fraction of changed pixels at which a frame counts as motion.
    #[serde(default = "default_motion_min_changed_fraction")]
    pub motion_min_changed_fraction: f64,

    /// Per-pixel luma delta below which a pixel does not count as changed.
    #[serde(default = "default_motion_pixel_threshold")]
    pub motion_pixel_threshold: f64,
}

fn default_clip_duration() -> u32 {
    60
}
fn default_capture_codec() -> String {
    "MJPG".to_owned()
}
fn default_output_codec() -> String {
    "libx264".to_owned()
}
fn default_output_format() -> String {
    "mp4".to_owned()
}
fn default_video_bitrate() -> String {
    "1000k".to_owned()
}
fn default_capture_frame_rate() -> f64 {
    15.0
}
fn default_motion_min_changed_fraction() -> f64 {
    0.01
}
fn default_motion_pixel_threshold() -> f64 {
    25.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config is valid")
    }
}

impl ClientConfig {
    /// Checks every enumerated field against its allow-list and the clip
    /// duration against its range.
    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_CLIP_DURATION_SECONDS..=MAX_CLIP_DURATION_SECONDS)
            .contains(&self.clip_duration_seconds)
        {
            bail!(
                InvalidArgument,
                msg(
                    "clip_duration_seconds must be within [{MIN_CLIP_DURATION_SECONDS}, \
                     {MAX_CLIP_DURATION_SECONDS}], got {}",
                    self.clip_duration_seconds
                )
            );
        }
        if !DOWNSCALE_RESOLUTIONS.contains(&self.downscale_resolution.as_str()) {
            bail!(
                InvalidArgument,
                msg("unrecognized downscale_resolution {:?}", self.downscale_resolution)
            );
        }
        if !CAPTURE_CODECS.contains(&self.capture_codec.as_str()) {
            bail!(
                InvalidArgument,
                msg("unrecognized capture_codec {:?}", self.capture_codec)
            );
        }
        if !OUTPUT_CODECS.contains(&self.output_codec.as_str()) {
            bail!(
                InvalidArgument,
                msg("unrecognized output_codec {:?}", self.output_codec)
            );
        }
        if !OUTPUT_FORMATS.contains(&self.output_format.as_str()) {
            bail!(
                InvalidArgument,
                msg("unrecognized output_format {:?}", self.output_format)
            );
        }
        if !VIDEO_BITRATES.contains(&self.video_bitrate.as_str()) {
            bail!(
                InvalidArgument,
                msg("unrecognized video_bitrate {:?}", self.video_bitrate)
            );
        }
        Ok(())
    }
}

impl rusqlite::types::FromSql for ClientConfig {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        serde_json::from_str(value.as_str()?)
            .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

impl rusqlite::types::ToSql for ClientConfig {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(serde_json::to_string(self)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?
            .into())
    }
}
