//! Enumerate every entry under one or more prefixes in a hardhat
//! database, printing `[key] -> [value]` one line per entry.

use std::env::set_var;
use std::io::Write;

use anyhow::{Context, Result};
use clap::{arg, command, ArgAction};
use hardhat::Hardhat;
use log::info;

fn main() -> Result<()> {
    let matches = command!()
        .arg(arg!(<db> "Database file to read"))
        .arg(arg!(<prefix> ... "One or more key prefixes to dump recursively"))
        .arg(
            arg!(-v --verbose "Print more debug information, or set `RUST_LOG=debug`")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("verbose") {
        set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let db_path = matches.get_one::<String>("db").unwrap();
    let prefixes: Vec<&String> = matches.get_many::<String>("prefix").unwrap().collect();

    let db = Hardhat::open(db_path).with_context(|| format!("{db_path}: could not open"))?;
    db.precache(true);
    info!("{db_path}: opened, {} entries", db.len());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for prefix in prefixes {
        for (key, value) in db.iter(prefix.as_bytes(), true) {
            out.write_all(b"[")?;
            out.write_all(key)?;
            out.write_all("] \u{2192} [".as_bytes())?;
            out.write_all(value)?;
            out.write_all(b"]\n")?;
        }
    }

    Ok(())
}
