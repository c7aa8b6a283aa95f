// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Serde types for the web APIs.

use db::clients::Client;
use db::clips::ClipInfo;
use db::json::ClientConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientCreateRequest {
    pub id: String,
    #[serde(default)]
    pub settings: ClientConfig,
}

#[derive(Debug, Deserialize)]
pub struct ClientUpdateRequest {
    pub settings: ClientConfig,
}

/// The one-time response carrying a new client's secret.
#[derive(Debug, Serialize)]
pub struct ClientCreateResponse {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct ClientView {
    pub id: String,
    pub disabled: bool,
    pub created_at: String,
    pub updated_at: String,
    pub settings: ClientConfig,
}

impl From<&Client> for ClientView {
    fn from(c: &Client) -> Self {
        ClientView {
            id: c.id.clone(),
            disabled: c.disabled,
            created_at: c.created_at.to_string(),
            updated_at: c.updated_at.to_string(),
            settings: c.config.clone(),
        }
    }
}

/// The recognized settings subset the edge must obey, served by
/// `GET /api/client/settings`.
#[derive(Debug, Serialize)]
pub struct CaptureSettingsResponse {
    pub id: String,
    pub storage_limit_megabytes: i64,
    pub clip_duration_seconds: u32,
    pub motion_only: bool,
    pub grayscale: bool,
    pub downscale_resolution: String,
}

impl From<&Client> for CaptureSettingsResponse {
    fn from(c: &Client) -> Self {
        CaptureSettingsResponse {
            id: c.id.clone(),
            storage_limit_megabytes: c.config.storage_limit_megabytes,
            clip_duration_seconds: c.config.clip_duration_seconds,
            motion_only: c.config.motion_only,
            grayscale: c.config.grayscale,
            downscale_resolution: c.config.downscale_resolution.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub clip_id: Uuid,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ClipView {
    pub id: Uuid,
    pub client_id: String,
    pub title: String,
    pub timestamp: String,
    pub duration_seconds: f64,
    pub has_motion: bool,
    pub width: i32,
    pub height: i32,
    pub mime: String,
    pub size_bytes: i64,
    pub has_thumbnail: bool,
}

impl From<&ClipInfo> for ClipView {
    fn from(c: &ClipInfo) -> Self {
        ClipView {
            id: c.id,
            client_id: c.client_id.clone(),
            title: c.title.clone(),
            timestamp: c.start.to_string(),
            duration_seconds: c.duration_seconds(),
            has_motion: c.has_motion,
            width: c.video_width,
            height: c.video_height,
            mime: c.video_mime.clone(),
            size_bytes: c.video_bytes,
            has_thumbnail: c.has_thumbnail,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClipListResponse {
    pub clips: Vec<ClipView>,
    pub total_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsView {
    pub entries: usize,
    pub current_size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub utilization_percent: f64,
}

impl From<crate::cache::CacheStats> for CacheStatsView {
    fn from(s: crate::cache::CacheStats) -> Self {
        CacheStatsView {
            entries: s.entries,
            current_size: s.current_size,
            max_size: s.max_size,
            hits: s.hits,
            misses: s.misses,
            evictions: s.evictions,
            utilization_percent: s.utilization_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_settings_shape() {
        let cfg = ClientConfig::default();
        let v = serde_json::to_value(CaptureSettingsResponse {
            id: "cam1".to_owned(),
            storage_limit_megabytes: cfg.storage_limit_megabytes,
            clip_duration_seconds: cfg.clip_duration_seconds,
            motion_only: cfg.motion_only,
            grayscale: cfg.grayscale,
            downscale_resolution: cfg.downscale_resolution.clone(),
        })
        .unwrap();
        let keys: Vec<&str> = v.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "id",
                "storage_limit_megabytes",
                "clip_duration_seconds",
                "motion_only",
                "grayscale",
                "downscale_resolution"
            ]
        );
    }
}
