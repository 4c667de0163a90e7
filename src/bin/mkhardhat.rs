//! Build a hardhat database from one or more text files in cdb-style
//! input format:
//!
//!     +keylen,datalen:key->value
//!
//! repeated for each entry, with the file ending in a blank line. Keys
//! and values are binary safe; only the length prefixes and the `->`
//! separator are textual.

use std::env::set_var;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use anyhow::{anyhow, bail, Context, Result};
use clap::{arg, command, ArgAction};
use hardhat::HardhatBuilder;
use log::{error, warn};

/// Bad input lines are reported and skipped (exit 1); a create/I/O/OOM
/// failure on the database itself aborts immediately (exit 2).
fn main() {
    let matches = command!()
        .arg(arg!(<output> "Database file to create"))
        .arg(arg!(<input> ... "One or more cdb-format input files"))
        .arg(
            arg!(-v --verbose "Print more debug information, or set `RUST_LOG=debug`")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("verbose") {
        set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let output = matches.get_one::<String>("output").unwrap();
    let inputs: Vec<&String> = matches.get_many::<String>("input").unwrap().collect();

    let mut builder = match HardhatBuilder::new(output) {
        Ok(b) => b,
        Err(e) => {
            error!("{output}: {e}");
            std::process::exit(2);
        }
    };

    let mut errors = false;
    for path in inputs {
        match load_file(&mut builder, path) {
            Ok(bad_lines) => errors |= bad_lines,
            Err(e) => {
                error!("{path}: {e}");
                errors = true;
            }
        }
    }

    if let Err(e) = builder.parents(b"") {
        error!("{e}");
        std::process::exit(2);
    }
    if let Err(e) = builder.finish() {
        error!("{e}");
        std::process::exit(2);
    }

    std::process::exit(errors as i32);
}

/// Load one input file, adding every well-formed entry to `builder`.
/// Returns whether any line was rejected; a fatal error on `add` (I/O,
/// out of memory) is not returned at all — it exits the process
/// directly with code 2, since the database is unusable from that point
/// on regardless of which file triggered it.
fn load_file(builder: &mut HardhatBuilder, path: &str) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("{path}: could not open"))?;
    let mut reader = BufReader::new(file);
    let mut line_num = 0u32;
    let mut bad_lines = false;

    loop {
        line_num += 1;

        let Some(marker) = read_byte(&mut reader)? else {
            break;
        };
        if marker == b'\n' {
            break;
        }
        if marker != b'+' {
            warn!("{path}:{line_num}: unexpected character in input");
            bad_lines = true;
            break;
        }

        let line = match read_entry(&mut reader, u16::MAX as u64) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{path}:{line_num}: {e}");
                bad_lines = true;
                break;
            }
        };

        if let Err(e) = builder.add(&line.0, &line.1) {
            if e.is_fatal() {
                error!("{path}:{line_num}: {e}");
                std::process::exit(2);
            }
            warn!("{path}:{line_num}: {e}");
            bad_lines = true;
        }
    }

    Ok(bad_lines)
}

/// Parse one `+keylen,datalen:key->value\n` entry. The leading `+` has
/// already been consumed by the caller.
fn read_entry<R: BufRead>(reader: &mut R, max_keylen: u64) -> Result<(Vec<u8>, Vec<u8>)> {
    let keylen = read_number(reader, b',')?;
    if keylen > max_keylen {
        bail!("key too large ({keylen} > {max_keylen})");
    }
    let datalen = read_number(reader, b':')?;

    let mut key = vec![0u8; keylen as usize];
    reader
        .read_exact(&mut key)
        .context("unexpected end of file")?;

    expect_byte(reader, b'-')?;
    expect_byte(reader, b'>')?;

    let mut value = vec![0u8; datalen as usize];
    reader
        .read_exact(&mut value)
        .context("unexpected end of file")?;

    expect_byte(reader, b'\n')?;

    Ok((key, value))
}

fn read_byte<R: BufRead>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

fn expect_byte<R: BufRead>(reader: &mut R, expect: u8) -> Result<()> {
    match read_byte(reader)? {
        Some(b) if b == expect => Ok(()),
        Some(_) => bail!("unexpected character in input"),
        None => bail!("unexpected end of file"),
    }
}

/// Read an ASCII decimal number terminated by `end`, rejecting leading
/// zeroes (other than a bare `0`), so a truncated or corrupted length
/// field is caught early rather than silently misread.
fn read_number<R: BufRead>(reader: &mut R, end: u8) -> Result<u64> {
    let mut n: u64 = 0;
    let mut first = true;

    loop {
        let byte = read_byte(reader)?.ok_or_else(|| anyhow!("unexpected end of file"))?;
        if byte == end {
            if first {
                bail!("unexpected character in input");
            }
            return Ok(n);
        }
        if !byte.is_ascii_digit() {
            bail!("unexpected character in input");
        }
        if byte == b'0' && n == 0 && !first {
            bail!("unexpected character in input");
        }
        n = n * 10 + (byte - b'0') as u64;
        if n > i32::MAX as u64 {
            bail!("invalid field size");
        }
        first = false;
    }
}
