// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use base::Error;
use bpaf::Bpaf;

mod cache;
mod clipmaker;
mod cmds;
mod ffmpeg;
mod json;
mod normalize;
mod notify;
mod playlist;
mod reader;
mod web;

/// CryoSpy: a self-hosted video surveillance recorder.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(env!("CARGO_PKG_VERSION")))]
enum Args {
    // See docstrings of `cmds::*::Args` structs for a description of the
    // respective subcommands.
    Init(#[bpaf(external(cmds::init::args))] cmds::init::Args),
    Run(#[bpaf(external(cmds::run::args))] cmds::run::Args),
}

impl Args {
    fn run(self) -> Result<i32, Error> {
        match self {
            Args::Init(a) => cmds::init::run(a),
            Args::Run(a) => cmds::run::run(a),
        }
    }
}

fn main() {
    // Get the program name from the OS (e.g. if invoked as
    // `target/debug/cryospy`: `cryospy`), falling back to the crate name if
    // conversion to a path/UTF-8 string fails.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };

    match args.run() {
        // The subcommands install the tracing subscriber, so a failure here
        // may predate logging; print directly.
        Err(e) => {
            eprintln!("exiting due to error: {}", e.chain());
            std::process::exit(1);
        }
        Ok(rv) => std::process::exit(rv),
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn bpaf_invariants() {
        super::args().check_invariants(false);
    }
}
