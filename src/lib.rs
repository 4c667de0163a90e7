//! A read-mostly, append-only, on-disk key/value store keyed by
//! slash-separated paths.
//!
//! A database is built once with [`HardhatBuilder`] and, once sealed,
//! opened any number of times with [`Hardhat::open`] for lookups and
//! prefix iteration. Keys behave like filesystem paths: `a/b` and
//! `a//b/.` normalise to the same key, and a [`Cursor`] can walk either
//! the immediate children of a prefix or its whole descendant subtree.

mod builder;
mod error;
mod hash;
mod layout;
mod openhash;
mod path;
mod reader;

pub use builder::HardhatBuilder;
pub use error::{HardhatError, Result};
pub use path::{normalise, path_cmp};
pub use reader::{Cursor, Hardhat};
