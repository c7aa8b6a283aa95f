// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Logic for setting up a `tracing` subscriber according to our preferences.

use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Builds the filter, preferring `RUST_LOG` from the environment over the
/// configured default directives.
fn filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Installs the global subscriber, writing to `log_file` if given and to
/// stderr otherwise. Call once, before any logging. External rotation
/// (e.g. `logrotate` with a restart) is assumed for the file case.
pub fn install(default_directives: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let registry = tracing_subscriber::registry();
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(filter(default_directives));
            registry.with(fmt_layer).init();
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_filter(filter(default_directives));
            registry.with(fmt_layer).init();
        }
    }
    Ok(())
}

/// Installs a subscriber that cooperates with `cargo test`'s output capture.
/// Unlike `install`, this may be called more than once.
pub fn install_for_tests() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_filter(filter("debug"));
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}
