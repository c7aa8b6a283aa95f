// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use base::{bail, err, Error};
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

/// Creates and initializes the database file.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    /// Path of the SQLite database file to create.
    #[bpaf(long, argument("PATH"), fallback("/var/lib/cryospy/cryospy.db".into()), debug_fallback)]
    database_path: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    base::tracing_setup::install("info", None)
        .map_err(|e| err!(Internal, msg("unable to set up logging"), source(e)))?;
    if args.database_path.exists() {
        bail!(
            AlreadyExists,
            msg(
                "{} already exists; refusing to reinitialize",
                args.database_path.display()
            )
        );
    }
    let mut conn = db::open_conn(&args.database_path)?;
    db::init(&mut conn)?;
    info!(
        path = %args.database_path.display(),
        sqlite = rusqlite::version(),
        "database initialized"
    );
    Ok(0)
}
