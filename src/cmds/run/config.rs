// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Runtime configuration file (`/etc/cryospy.toml`).

use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

fn default_database_path() -> PathBuf {
    "/var/lib/cryospy/cryospy.db".into()
}

fn default_web_addr() -> IpAddr {
    "0.0.0.0".parse().expect("valid address")
}

fn default_web_port() -> u16 {
    8080
}

fn default_capture_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_max_upload_bytes() -> u64 {
    100 << 20
}

/// Top-level configuration file object.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Address both surfaces bind to.
    #[serde(default = "default_web_addr")]
    pub web_addr: IpAddr,

    /// Port of the operator surface.
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Port of the capture surface.
    #[serde(default = "default_capture_port")]
    pub capture_port: u16,

    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// `tracing` filter directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log file path; stderr when unset. Rotation is external.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Largest accepted upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Reverse proxies whose `X-Forwarded-For` is trusted, per surface.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub storage_notifications: StorageNotificationConfig,

    #[serde(default)]
    pub motion_notifications: MotionNotificationConfig,

    #[serde(default)]
    pub auth_events: AuthEventConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    #[serde(default)]
    pub web: Vec<IpAddr>,

    #[serde(default)]
    pub capture: Vec<IpAddr>,
}

/// The transport itself is an external collaborator; these settings describe
/// where notifications should go once one is wired in, and the bundled
/// log-backed mailer records them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub server: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub recipients: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty smtp config is valid")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    /// How many upcoming clips each playlist covers.
    #[serde(default = "default_look_ahead")]
    pub look_ahead: usize,

    #[serde(default = "default_stream_width")]
    pub width: u32,

    #[serde(default = "default_stream_height")]
    pub height: u32,

    /// kbit/s.
    #[serde(default = "default_stream_bitrate")]
    pub video_bitrate: u32,

    #[serde(default = "default_stream_codec")]
    pub video_codec: String,

    #[serde(default = "default_stream_frame_rate")]
    pub frame_rate: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty cache config is valid")
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_max_size_bytes() -> usize {
    256 << 20
}
fn default_look_ahead() -> usize {
    5
}
fn default_stream_width() -> u32 {
    854
}
fn default_stream_height() -> u32 {
    480
}
fn default_stream_bitrate() -> u32 {
    1000
}
fn default_stream_codec() -> String {
    "libx264".to_owned()
}
fn default_stream_frame_rate() -> u32 {
    25
}

impl Default for StreamingConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty streaming config is valid")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageNotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Percent-full threshold for capacity warnings.
    #[serde(default = "default_warn_percent")]
    pub warn_percent: i64,

    #[serde(default = "default_storage_min_interval")]
    pub min_interval_secs: u64,
}

fn default_warn_percent() -> i64 {
    80
}
fn default_storage_min_interval() -> u64 {
    3600
}

impl Default for StorageNotificationConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty storage notification config is valid")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionNotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_motion_min_interval")]
    pub min_interval_secs: u64,
}

fn default_motion_min_interval() -> u64 {
    300
}

impl Default for MotionNotificationConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty motion notification config is valid")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthEventConfig {
    /// Failure count at which an alert is sent; zero disables alerts.
    #[serde(default = "default_notify_threshold")]
    pub notify_threshold: usize,

    /// Failure count at which the client is disabled; zero disables
    /// auto-disable.
    #[serde(default = "default_auto_disable_threshold")]
    pub auto_disable_threshold: usize,

    /// Sliding window over which failures are counted.
    #[serde(default = "default_auth_window")]
    pub window_secs: u64,

    #[serde(default = "default_auth_min_interval")]
    pub min_interval_secs: u64,
}

fn default_notify_threshold() -> usize {
    3
}
fn default_auto_disable_threshold() -> usize {
    10
}
fn default_auth_window() -> u64 {
    3600
}
fn default_auth_min_interval() -> u64 {
    900
}

impl Default for AuthEventConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty auth event config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let c: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(c.web_port, 8080);
        assert_eq!(c.capture_port, 8081);
        assert_eq!(c.max_upload_bytes, 100 << 20);
        assert!(c.log_path.is_none());
        assert!(c.streaming.cache.enabled);
        assert_eq!(c.streaming.cache.max_size_bytes, 256 << 20);
        assert_eq!(c.streaming.look_ahead, 5);
        assert!(!c.smtp.enabled);
        assert_eq!(c.auth_events.auto_disable_threshold, 10);
    }

    #[test]
    fn full_config_parses() {
        let c: ConfigFile = toml::from_str(
            r#"
            web_addr = "127.0.0.1"
            web_port = 9000
            capture_port = 9001
            database_path = "/tmp/test.db"
            log_level = "debug"
            max_upload_bytes = 1048576

            [trusted_proxies]
            web = ["10.0.0.1"]
            capture = ["10.0.0.1", "10.0.0.2"]

            [streaming]
            look_ahead = 8
            width = 1280
            height = 720
            video_bitrate = 4000
            video_codec = "libx265"
            frame_rate = 30

            [streaming.cache]
            enabled = false

            [smtp]
            enabled = true
            server = "mail.example.com"
            from = "cryospy@example.com"
            recipients = ["operator@example.com"]

            [storage_notifications]
            enabled = true
            warn_percent = 90

            [motion_notifications]
            enabled = true
            min_interval_secs = 60

            [auth_events]
            notify_threshold = 5
            auto_disable_threshold = 20
            window_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(c.web_port, 9000);
        assert_eq!(c.trusted_proxies.capture.len(), 2);
        assert!(!c.streaming.cache.enabled);
        assert_eq!(c.streaming.cache.max_size_bytes, 256 << 20);
        assert_eq!(c.streaming.video_codec, "libx265");
        assert_eq!(c.smtp.recipients, ["operator@example.com"]);
        assert_eq!(c.smtp.port, 587);
        assert_eq!(c.storage_notifications.warn_percent, 90);
        assert_eq!(c.auth_events.window_secs, 600);
        // Unset keys keep their defaults.
        assert_eq!(c.auth_events.min_interval_secs, 900);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        toml::from_str::<ConfigFile>("no_such_key = 1").unwrap_err();
    }
}
