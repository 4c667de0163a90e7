//! Building a new hardhat database from scratch.
//!
//! A [`HardhatBuilder`] writes records as they're added, keeping only
//! hashes and offsets in memory for later index construction — not a
//! full second copy of the file. [`HardhatBuilder::finish`] sorts the
//! collected entries twice (once for the directory, once for the hash
//! table), derives the prefix table, and rewrites the superblock with
//! real section boundaries and a checksum.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use zerocopy::AsBytes;

use crate::error::{HardhatError, Result};
use crate::hash::hash_for_version;
use crate::layout::{pad_amount, HashEntry, Superblock, BYTEORDER_MARK, DEFAULT_ALIGNMENT,
    DEFAULT_BLOCKSIZE, MAGIC, SUPERBLOCK_SIZE};
use crate::openhash::OpenHash;
use crate::path::{normalise, path_cmp};

/// Every database this builder writes uses the newest on-disk format
/// (prefix table, per-file alignment/blocksize, seeded hash). There is
/// no reason to ever emit an older version.
const FORMAT_VERSION: u32 = 3;

/// Incrementally builds a hardhat database.
///
/// Keys are normalised and deduplicated on [`add`](Self::add) — the
/// first value written for a given normalised key wins, later ones are
/// silently dropped. Call [`finish`](Self::finish) exactly once to
/// write the indexes and seal the file; any operation after that, or
/// after a fatal I/O error, returns [`HardhatError::InvalidState`].
pub struct HardhatBuilder {
    writer: BufWriter<File>,
    offset: u64,
    alignment: u8,
    blocksize: u8,
    hashseed: u32,
    started: bool,
    finished: bool,
    fatal: bool,
    dedup: OpenHash,
    offsets: Vec<u64>,
    keys: Vec<Vec<u8>>,
}

impl HardhatBuilder {
    /// Create `path`, truncating it if it already exists, and reserve
    /// space for the superblock.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create(path.as_ref())
    }

    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let placeholder = Superblock::zeroed();
        writer.write_all(placeholder.as_bytes())?;
        writer.flush()?;

        Ok(HardhatBuilder {
            writer,
            offset: SUPERBLOCK_SIZE as u64,
            alignment: DEFAULT_ALIGNMENT,
            blocksize: DEFAULT_BLOCKSIZE,
            hashseed: rand::thread_rng().next_u32(),
            started: false,
            finished: false,
            fatal: false,
            dedup: OpenHash::new(),
            offsets: Vec::new(),
            keys: Vec::new(),
        })
    }

    /// Current data alignment in bytes (a power of two).
    pub fn alignment(&self) -> u32 {
        1u32 << self.alignment
    }

    /// Current block size in bytes (a power of two).
    pub fn blocksize(&self) -> u32 {
        1u32 << self.blocksize
    }

    /// Set the data alignment. Must be a power of two, and can only be
    /// changed before the first [`add`](Self::add) call.
    pub fn set_alignment(&mut self, alignment: u32) -> Result<()> {
        self.check_live()?;
        if self.started {
            return Err(HardhatError::InvalidArgument(
                "can't change alignment after output has started".into(),
            ));
        }
        if alignment == 0 || alignment & (alignment - 1) != 0 {
            return Err(HardhatError::InvalidArgument(
                "data alignment must be a power of 2".into(),
            ));
        }
        self.alignment = alignment.trailing_zeros() as u8;
        Ok(())
    }

    /// Set the block size hint used to avoid straddling reads. Must be a
    /// power of two, and can only be changed before the first
    /// [`add`](Self::add) call.
    pub fn set_blocksize(&mut self, blocksize: u32) -> Result<()> {
        self.check_live()?;
        if self.started {
            return Err(HardhatError::InvalidArgument(
                "can't change blocksize after output has started".into(),
            ));
        }
        if blocksize == 0 || blocksize & (blocksize - 1) != 0 {
            return Err(HardhatError::InvalidArgument(
                "block size must be a power of 2".into(),
            ));
        }
        self.blocksize = blocksize.trailing_zeros() as u8;
        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        if self.finished || self.fatal {
            return Err(HardhatError::InvalidState);
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: HardhatError) -> Result<T> {
        if err.is_fatal() {
            self.fatal = true;
        }
        Err(err)
    }

    /// Add one key/value pair. `key` is normalised before storage; if an
    /// equivalent key (after normalisation) was already added, this
    /// value is discarded and the earlier one wins.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_live()?;

        let normalised = normalise(key);
        if normalised.len() > u16::MAX as usize {
            return Err(HardhatError::InvalidArgument("key too long".into()));
        }
        if value.len() > i32::MAX as usize {
            return Err(HardhatError::InvalidArgument("value too long".into()));
        }

        let hash = hash_for_version(FORMAT_VERSION, &normalised, self.hashseed);
        for candidate in self.dedup.lookup(hash) {
            if self.keys[candidate as usize] == normalised {
                return Ok(());
            }
        }

        self.started = true;

        let datalen = value.len() as u64;
        if let Err(e) = self.pad(6 + datalen, 4) {
            return self.fail(e);
        }

        let record_offset = self.offset;
        if let Err(e) = self.write_raw(&(value.len() as u32).to_ne_bytes()) {
            return self.fail(e);
        }
        if let Err(e) = self.write_raw(&(normalised.len() as u16).to_ne_bytes()) {
            return self.fail(e);
        }
        if let Err(e) = self.write_raw(&normalised) {
            return self.fail(e);
        }

        if let Err(e) = self.pad(datalen, self.alignment()) {
            return self.fail(e);
        }
        if let Err(e) = self.write_raw(value) {
            return self.fail(e);
        }

        let recnum = self.offsets.len() as u32;
        self.offsets.push(record_offset);
        self.keys.push(normalised);
        self.dedup.insert(hash, recnum);

        Ok(())
    }

    /// Add a parent entry (with `value` as its payload) for every
    /// ancestor directory of every key added so far that doesn't
    /// already have an entry of its own. Duplicate parents are silently
    /// absorbed by the same first-write-wins rule as [`add`](Self::add).
    ///
    /// Walks `self.keys` by live index rather than over a fixed
    /// snapshot: each `add` below can itself append a fresh parent
    /// record, and that new record must be walked in turn so a
    /// multi-level key like `"a/b/c"` backfills the whole chain
    /// (`"a/b"`, then `"a"`) in a single call, not just its immediate
    /// parent.
    pub fn parents(&mut self, value: &[u8]) -> Result<()> {
        self.check_live()?;

        let mut i = 0;
        while i < self.keys.len() {
            let key = self.keys[i].clone();
            if let Some(pos) = key.iter().rposition(|&b| b == b'/') {
                self.add(&key[..pos], value)?;
            }
            i += 1;
        }
        Ok(())
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Insert zero bytes so that, after writing `length` more bytes, the
    /// write position neither straddles a block boundary needlessly nor
    /// sits unaligned.
    fn pad(&mut self, length: u64, alignment: u32) -> Result<()> {
        let amount = pad_amount(self.offset, length, alignment as u64, self.blocksize());
        if amount == 0 {
            return Ok(());
        }
        let zeros = vec![0u8; amount as usize];
        self.write_raw(&zeros)
    }

    /// Sort the collected entries, write the directory, hash, and prefix
    /// tables, and seal the file with a finished superblock.
    pub fn finish(mut self) -> Result<()> {
        self.check_live()?;

        let num = self.offsets.len() as u32;
        let data_end = self.offset;

        let mut entries: Vec<HashEntry> = self.dedup.entries().collect();
        debug_assert_eq!(entries.len(), num as usize);

        entries.sort_by(|a, b| path_cmp(&self.keys[a.data as usize], &self.keys[b.data as usize]));
        let ordered_keys: Vec<Vec<u8>> = entries
            .iter()
            .map(|e| self.keys[e.data as usize].clone())
            .collect();
        let ordered_offsets: Vec<u64> = entries
            .iter()
            .map(|e| self.offsets[e.data as usize])
            .collect();

        if let Err(e) = self.pad(num as u64 * 8, 8) {
            return self.fail(e);
        }
        let directory_start = self.offset;
        for (i, entry) in entries.iter_mut().enumerate() {
            if let Err(e) = self.write_raw(&ordered_offsets[i].to_ne_bytes()) {
                return self.fail(e);
            }
            entry.data = i as u32;
        }
        let directory_end = self.offset;

        entries.sort_by(|a, b| {
            a.hash
                .cmp(&b.hash)
                .then_with(|| ordered_keys[a.data as usize].cmp(&ordered_keys[b.data as usize]))
        });

        if let Err(e) = self.pad(num as u64 * 8, 8) {
            return self.fail(e);
        }
        let hash_start = self.offset;
        for entry in &entries {
            if let Err(e) = self.write_raw(entry.as_bytes()) {
                return self.fail(e);
            }
        }
        let hash_end = self.offset;

        let mut prefixes: Vec<HashEntry> = Vec::new();
        let mut prev: &[u8] = b"";
        for (i, key) in ordered_keys.iter().enumerate() {
            let mut endlen = common_parents(prev, key);
            while let Some(rel) = key[endlen..].iter().position(|&b| b == b'/') {
                endlen += rel + 1;
                let prefix = &key[..endlen];
                let hash = hash_for_version(FORMAT_VERSION, prefix, self.hashseed);
                prefixes.push(HashEntry {
                    hash,
                    data: i as u32,
                });
            }
            prev = key;
        }
        let pfxnum = prefixes.len() as u32;

        prefixes.sort_by(|a, b| {
            a.hash
                .cmp(&b.hash)
                .then_with(|| ordered_keys[a.data as usize].cmp(&ordered_keys[b.data as usize]))
        });

        if let Err(e) = self.pad(pfxnum as u64 * 8, 8) {
            return self.fail(e);
        }
        let prefix_start = self.offset;
        for entry in &prefixes {
            if let Err(e) = self.write_raw(entry.as_bytes()) {
                return self.fail(e);
            }
        }
        let prefix_end = self.offset;

        let mut sb = Superblock::zeroed();
        sb.magic = MAGIC;
        sb.byteorder = BYTEORDER_MARK;
        sb.version = FORMAT_VERSION;
        sb.entries = num;
        sb.prefixes = pfxnum;
        sb.filesize = self.offset;
        sb.data_start = SUPERBLOCK_SIZE as u64;
        sb.data_end = data_end;
        sb.directory_start = directory_start;
        sb.directory_end = directory_end;
        sb.hash_start = hash_start;
        sb.hash_end = hash_end;
        sb.prefix_start = prefix_start;
        sb.prefix_end = prefix_end;
        sb.hashseed = self.hashseed;
        sb.alignment = self.alignment;
        sb.blocksize = self.blocksize;

        let checksummed_len = std::mem::size_of::<Superblock>() - 4;
        sb.checksum = hash_for_version(FORMAT_VERSION, &sb.as_bytes()[..checksummed_len], self.hashseed);

        if let Err(e) = self.writer.seek(SeekFrom::Start(0)) {
            return self.fail(HardhatError::Io(e));
        }
        if let Err(e) = self.writer.write_all(sb.as_bytes()) {
            return self.fail(HardhatError::Io(e));
        }
        if let Err(e) = self.writer.flush() {
            return self.fail(HardhatError::Io(e));
        }
        if let Err(e) = self.writer.get_ref().sync_all() {
            return self.fail(HardhatError::Io(e));
        }

        self.finished = true;
        Ok(())
    }
}

/// Longest shared prefix of `a` and `b`, ending exactly on a `/`
/// boundary (or zero, if they share no complete path component).
fn common_parents(a: &[u8], b: &[u8]) -> usize {
    let mut shared = 0;
    let len = a.len().min(b.len());
    for i in 0..len {
        if a[i] != b[i] {
            break;
        }
        if a[i] == b'/' {
            shared = i + 1;
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Hardhat;

    #[test]
    fn common_parents_stops_at_slash_boundary() {
        assert_eq!(common_parents(b"a/bc", b"a/bd"), 2);
        assert_eq!(common_parents(b"ab", b"ac"), 0);
        assert_eq!(common_parents(b"", b"a/b"), 0);
        assert_eq!(common_parents(b"a/b/c", b"a/b/c"), 4);
    }

    #[test]
    fn build_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        builder.add(b"foo", b"bar").unwrap();
        builder.add(b"foo/baz", b"qux").unwrap();
        builder.add(b"foo/baz", b"ignored-duplicate").unwrap();
        builder.finish().unwrap();

        let db = Hardhat::open(&path).unwrap();
        assert_eq!(db.get(b"foo").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(db.get(b"foo/baz").unwrap(), Some(b"qux".to_vec()));
        assert_eq!(db.get(b"nope").unwrap(), None);
    }

    #[test]
    fn parents_fills_in_missing_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        builder.add(b"a/b/c", b"leaf").unwrap();
        builder.parents(b"").unwrap();
        builder.finish().unwrap();

        let db = Hardhat::open(&path).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"".to_vec()));
        assert_eq!(db.get(b"a/b").unwrap(), Some(b"".to_vec()));
        assert_eq!(db.get(b"a/b/c").unwrap(), Some(b"leaf".to_vec()));
    }

    #[test]
    fn rejects_further_writes_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        builder.add(b"k", b"v").unwrap();
        // finish() consumes the builder, so there is nothing left to
        // misuse afterward.
        builder.finish().unwrap();
    }

    #[test]
    fn alignment_cannot_change_after_first_add() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        builder.add(b"k", b"v").unwrap();
        assert!(builder.set_alignment(16).is_err());
    }

    #[test]
    fn alignment_must_be_a_power_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        assert!(builder.set_alignment(3).is_err());
        assert!(builder.set_alignment(4).is_ok());
    }

    #[test]
    fn rejects_oversize_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        let huge_key = vec![b'a'; u16::MAX as usize + 1];
        assert!(matches!(
            builder.add(&huge_key, b"v"),
            Err(HardhatError::InvalidArgument(_))
        ));
    }

    #[test]
    fn accepts_key_at_the_max_length_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");

        let mut builder = HardhatBuilder::new(&path).unwrap();
        let max_key = vec![b'a'; u16::MAX as usize];
        assert!(builder.add(&max_key, b"v").is_ok());
    }
}
