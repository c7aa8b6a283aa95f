// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The `run` subcommand: construct the component graph and serve both HTTP
//! surfaces until shutdown.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base::clock::RealClocks;
use base::{err, Error, ErrorKind, ResultExt as _};
use bpaf::Bpaf;
use db::authfail::{FailureTracker, FailureTrackerConfig};
use db::storage::{MotionNotifier, NopNotifier, StorageManager, StorageNotifier};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use self::config::ConfigFile;
use crate::cache::SegmentCache;
use crate::clipmaker::ClipMaker;
use crate::ffmpeg::Ffmpeg;
use crate::normalize::{NormalizeSettings, Normalizer};
use crate::notify::{AuthEmailNotifier, AuthNotifier, LogMailer, Mailer, MotionEmailNotifier, StorageEmailNotifier};
use crate::playlist::PlaylistGenerator;
use crate::reader::ClipReader;
use crate::web::{Service, Surface, TrustedProxies};

/// Runs the server.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    /// Path to the TOML configuration file.
    #[bpaf(long, argument("PATH"), fallback("/etc/cryospy.toml".into()), debug_fallback)]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let raw = match std::fs::read_to_string(&args.config) {
        Ok(raw) => Some(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(err!(
                Internal,
                msg("unable to read {}", args.config.display()),
                source(e)
            ))
        }
    };
    let config: ConfigFile = toml::from_str(raw.as_deref().unwrap_or("")).map_err(|e| {
        err!(
            InvalidArgument,
            msg("unable to parse {}", args.config.display()),
            source(e)
        )
    })?;
    base::tracing_setup::install(&config.log_level, config.log_path.as_deref())
        .map_err(|e| err!(Internal, msg("unable to set up logging"), source(e)))?;
    if raw.is_none() {
        warn!(path = %args.config.display(), "no config file; using defaults");
    }
    if config.smtp.enabled {
        // The SMTP transport is an external collaborator; until one is wired
        // in, notifications land in the log with their intended recipients.
        warn!(
            server = %config.smtp.server,
            port = config.smtp.port,
            from = %config.smtp.from,
            "smtp transport not built in; notifications are written to the log"
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .err_kind(ErrorKind::Internal)?;
    rt.block_on(run_async(config))?;
    Ok(0)
}

fn build_service(config: &ConfigFile, db: Arc<db::Database>) -> Arc<Service> {
    let clocks = RealClocks;
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(config.smtp.recipients.clone()));

    let storage_notifier: Arc<dyn StorageNotifier> = if config.storage_notifications.enabled {
        Arc::new(StorageEmailNotifier::new(
            mailer.clone(),
            clocks,
            config.storage_notifications.warn_percent,
            Duration::from_secs(config.storage_notifications.min_interval_secs),
        ))
    } else {
        Arc::new(NopNotifier)
    };
    let motion_notifier: Arc<dyn MotionNotifier> = if config.motion_notifications.enabled {
        Arc::new(MotionEmailNotifier::new(
            mailer.clone(),
            clocks,
            Duration::from_secs(config.motion_notifications.min_interval_secs),
        ))
    } else {
        Arc::new(NopNotifier)
    };
    let auth_notifier: Arc<dyn AuthNotifier> = Arc::new(AuthEmailNotifier::new(
        mailer,
        clocks,
        config.auth_events.notify_threshold,
        Duration::from_secs(config.auth_events.min_interval_secs),
    ));

    let storage = Arc::new(StorageManager::new(
        db.clone(),
        storage_notifier,
        motion_notifier,
    ));
    let ffmpeg = Arc::new(Ffmpeg::default());
    let cache = config
        .streaming
        .cache
        .enabled
        .then(|| Arc::new(SegmentCache::new(config.streaming.cache.max_size_bytes)));
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let normalizer = Arc::new(Normalizer::new(
        ffmpeg.clone(),
        cache.clone(),
        NormalizeSettings {
            width: config.streaming.width,
            height: config.streaming.height,
            video_codec: config.streaming.video_codec.clone(),
            video_bitrate_kbps: config.streaming.video_bitrate,
            frame_rate: config.streaming.frame_rate,
        },
        parallelism,
    ));

    Arc::new(Service::new(
        db.clone(),
        ClipMaker::new(db.clone(), storage, ffmpeg.clone(), ffmpeg),
        ClipReader::new(db.clone()),
        normalizer,
        PlaylistGenerator::new(db, config.streaming.look_ahead, true),
        FailureTracker::new(FailureTrackerConfig {
            auto_disable_threshold: config.auth_events.auto_disable_threshold,
            window: Duration::from_secs(config.auth_events.window_secs),
        }),
        auth_notifier,
        cache,
        config.max_upload_bytes,
        TrustedProxies {
            operator: config.trusted_proxies.web.clone(),
            capture: config.trusted_proxies.capture.clone(),
        },
    ))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

fn spawn_connection(
    svc: Arc<Service>,
    surface: Surface,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    graceful: &GracefulShutdown,
) {
    let io = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |req| svc.clone().serve(surface, peer, req));
    let conn = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .into_owned();
    let conn = graceful.watch(conn);
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(%peer, err = %e, "connection closed with error");
        }
    });
}

async fn run_async(config: ConfigFile) -> Result<(), Error> {
    let conn = db::open_conn(&config.database_path)?;
    info!(
        path = %config.database_path.display(),
        sqlite = rusqlite::version(),
        "database opened"
    );
    let db = Arc::new(db::Database::new(RealClocks, conn)?);
    let svc = build_service(&config, db);

    let operator_addr = SocketAddr::new(config.web_addr, config.web_port);
    let capture_addr = SocketAddr::new(config.web_addr, config.capture_port);
    let operator = TcpListener::bind(operator_addr)
        .await
        .map_err(|e| err!(Unavailable, msg("unable to bind {operator_addr}"), source(e)))?;
    let capture = TcpListener::bind(capture_addr)
        .await
        .map_err(|e| err!(Unavailable, msg("unable to bind {capture_addr}"), source(e)))?;
    info!(operator = %operator_addr, capture = %capture_addr, "listening");

    let graceful = GracefulShutdown::new();
    let mut shutdown = std::pin::pin!(shutdown_signal());
    loop {
        tokio::select! {
            r = operator.accept() => match r {
                Ok((stream, peer)) => {
                    spawn_connection(svc.clone(), Surface::Operator, stream, peer, &graceful)
                }
                Err(e) => warn!(err = %e, "operator accept failed"),
            },
            r = capture.accept() => match r {
                Ok((stream, peer)) => {
                    spawn_connection(svc.clone(), Surface::Capture, stream, peer, &graceful)
                }
                Err(e) => warn!(err = %e, "capture accept failed"),
            },
            _ = &mut shutdown => {
                info!("shutdown signal received; draining connections");
                break;
            }
        }
    }
    drop((operator, capture));
    graceful.shutdown().await;
    info!("exiting");
    Ok(())
}
