//! Opening and querying a finished hardhat database.
//!
//! [`Hardhat::open`] memory-maps the file once, validates every section
//! boundary, and hands back an immutable handle. After that nothing in
//! this module touches the filesystem again: exact lookups and prefix
//! iteration read straight out of the mapping.

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use log::{debug, warn};
use memmap2::{Advice, Mmap};
use zerocopy::LayoutVerified;

use crate::error::{HardhatError, Result};
use crate::hash::hash_for_version;
use crate::layout::{pad_amount, Endian, Superblock, SuperblockView, MAGIC, SUPERBLOCK_SIZE};
use crate::path::normalise;

const CURSOR_NONE: u32 = u32::MAX;
const RECORD_HEADER_LEN: u64 = 6;
const HASH_ENTRY_LEN: u64 = 8;
const DIRECTORY_ENTRY_LEN: u64 = 8;

/// An opened, memory-mapped hardhat database.
///
/// Opening does all the validation work up front; every subsequent
/// lookup or iteration is a handful of bounds-checked memory reads, no
/// further syscalls. `Hardhat` is `Send + Sync` (the underlying
/// `memmap2::Mmap` is immutable and privately mapped) so a single opened
/// database can be shared across threads; hand each thread its own
/// [`Cursor`].
pub struct Hardhat {
    mmap: Mmap,
    endian: Endian,
    version: u32,
    hashseed: u32,
    entries: u32,
    prefixes: u32,
    data_start: u64,
    data_end: u64,
    hash_start: u64,
    directory_start: u64,
    prefix_start: u64,
    alignment: u8,
    blocksize: u8,
}

impl Hardhat {
    /// Memory-map `path` and validate it as a hardhat database.
    ///
    /// Every structural rule in the format is checked before this
    /// returns: magic, byte order, version, checksum, section bounds,
    /// alignment, and non-overlap. A file that fails any of them is
    /// rejected as a whole with [`HardhatError::Protocol`] rather than
    /// opened partially.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_impl(path.as_ref())
    }

    fn open_impl(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let filesize = file.metadata()?.len();
        if filesize < SUPERBLOCK_SIZE as u64 {
            return Err(HardhatError::Protocol("file shorter than a superblock"));
        }

        // Safety: the file is opened read-only and the mapping is never
        // written through; concurrent external truncation of the file
        // is the only way to violate this, which is the same caveat
        // every mmap-based reader carries.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap[..8] != MAGIC {
            return Err(HardhatError::Protocol("bad magic"));
        }

        let sb: &Superblock =
            LayoutVerified::<_, Superblock>::new(&mmap[..SUPERBLOCK_SIZE])
                .ok_or(HardhatError::Protocol("superblock misaligned"))?
                .into_ref();

        let endian = Endian::detect(sb.byteorder)
            .ok_or(HardhatError::Protocol("unrecognised byte order mark"))?;
        let view = SuperblockView::new(sb, endian);

        let version = view.version();
        if !(1..=4).contains(&version) {
            return Err(HardhatError::Protocol("unsupported format version"));
        }

        if view.filesize() != filesize {
            return Err(HardhatError::Protocol("filesize field doesn't match file length"));
        }

        let checksum_len = std::mem::size_of::<Superblock>() - 4;
        let checksum = hash_for_version(version, &mmap[..checksum_len], view.hashseed());
        if checksum != view.checksum() {
            return Err(HardhatError::Protocol("superblock checksum mismatch"));
        }

        let (data_start, data_end) = view.data_range();
        let (hash_start, hash_end) = view.hash_range();
        let (directory_start, directory_end) = view.directory_range();
        let (prefix_start, prefix_end) = view.prefix_range();
        let entries = view.entries();
        let prefixes = view.prefixes();

        let sections = [
            ("data", data_start, data_end, 4u64),
            ("hash", hash_start, hash_end, 4u64),
            ("directory", directory_start, directory_end, 8u64),
            ("prefix", prefix_start, prefix_end, 4u64),
        ];
        for (name, start, end, align) in sections {
            if name == "prefix" && version < 3 {
                continue;
            }
            if start < SUPERBLOCK_SIZE as u64 {
                warn!("hardhat: {name} section starts inside the superblock");
                return Err(HardhatError::Protocol("section starts inside the superblock"));
            }
            if end < start {
                return Err(HardhatError::Protocol("section end precedes its start"));
            }
            if end > filesize {
                return Err(HardhatError::Protocol("section extends past end of file"));
            }
            if start % align != 0 {
                return Err(HardhatError::Protocol("section start is misaligned"));
            }
        }

        if directory_end - directory_start < entries as u64 * DIRECTORY_ENTRY_LEN {
            return Err(HardhatError::Protocol("directory too short for entry count"));
        }
        if hash_end - hash_start < entries as u64 * HASH_ENTRY_LEN {
            return Err(HardhatError::Protocol("entry hash table too short for entry count"));
        }
        if version >= 3 && prefix_end - prefix_start < prefixes as u64 * HASH_ENTRY_LEN {
            return Err(HardhatError::Protocol("prefix hash table too short for prefix count"));
        }

        let mut bounds = vec![
            (data_start, data_end),
            (hash_start, hash_end),
            (directory_start, directory_end),
        ];
        if version >= 3 {
            bounds.push((prefix_start, prefix_end));
        }
        bounds.sort_by_key(|&(start, _)| start);
        for pair in bounds.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(HardhatError::Protocol("sections overlap"));
            }
        }

        debug!(
            "hardhat: opened {} entries, {} prefixes, version {}",
            entries,
            prefixes,
            version
        );

        Ok(Hardhat {
            mmap,
            endian,
            version,
            hashseed: view.hashseed(),
            entries,
            prefixes,
            data_start,
            data_end,
            hash_start,
            directory_start,
            prefix_start,
            alignment: view.alignment(),
            blocksize: view.blocksize(),
        })
    }

    /// Number of entries stored in the database.
    pub fn len(&self) -> u32 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Data alignment used by this database, in bytes (a power of two).
    pub fn alignment(&self) -> u32 {
        1u32 << self.alignment
    }

    /// Block size hint used by this database, in bytes (a power of two).
    pub fn blocksize(&self) -> u32 {
        1u32 << self.blocksize
    }

    /// Advise the OS to prefetch pages of the mapping. `data = true`
    /// brings in the whole file; otherwise only the index sections
    /// (hash, directory, prefix tables) are prefetched, which is enough
    /// to serve lookups and shallow listings without touching the
    /// (typically much larger) data section.
    ///
    /// Best-effort only: a failure to advise is not surfaced.
    pub fn precache(&self, data: bool) {
        if data {
            let _ = self.mmap.advise(Advice::WillNeed);
        } else {
            let _ = self.advise_range(self.hash_start, self.directory_start, Advice::WillNeed);
            let _ = self.advise_range(self.directory_start, self.data_start, Advice::WillNeed);
            if self.version >= 3 {
                let _ = self.advise_range(self.prefix_start, self.mmap.len() as u64, Advice::WillNeed);
            }
        }
    }

    fn advise_range(&self, start: u64, end: u64, advice: Advice) -> std::io::Result<()> {
        let start = start as usize;
        let len = (end.saturating_sub(start as u64)) as usize;
        self.mmap.advise_range(advice, start, len)
    }

    fn u16_at(&self, off: u64) -> u16 {
        let off = off as usize;
        self.endian
            .fix_u16(u16::from_ne_bytes([self.mmap[off], self.mmap[off + 1]]))
    }

    fn u32_at(&self, off: u64) -> u32 {
        let off = off as usize;
        let b = &self.mmap[off..off + 4];
        self.endian
            .fix_u32(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_at(&self, off: u64) -> u64 {
        let off = off as usize;
        let b = &self.mmap[off..off + 8];
        self.endian.fix_u64(u64::from_ne_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn directory_offset(&self, idx: u32) -> Option<u64> {
        if idx >= self.entries {
            return None;
        }
        Some(self.u64_at(self.directory_start + idx as u64 * DIRECTORY_ENTRY_LEN))
    }

    /// Resolve a directory index to its stored `(key, value)`, with full
    /// bounds validation. Returns `None` if anything about the record
    /// looks malformed rather than panicking — a corrupted file should
    /// fail lookups cleanly, not crash the reader.
    fn record(&self, idx: u32) -> Option<(&[u8], &[u8])> {
        let off = self.directory_offset(idx)?;
        if off < self.data_start || off % 4 != 0 {
            return None;
        }
        let header_end = off.checked_add(RECORD_HEADER_LEN)?;
        if header_end > self.data_end {
            return None;
        }

        let valuelen = self.u32_at(off) as u64;
        let keylen = self.u16_at(off + 4) as u64;

        let key_end = header_end.checked_add(keylen)?;
        if key_end > self.data_end {
            return None;
        }
        let key = &self.mmap[header_end as usize..key_end as usize];

        let pad = pad_amount(key_end, valuelen, self.alignment() as u64, self.blocksize() as u64);
        let value_start = key_end.checked_add(pad)?;
        let value_end = value_start.checked_add(valuelen)?;
        if value_end > self.data_end {
            return None;
        }
        let value = &self.mmap[value_start as usize..value_end as usize];

        Some((key, value))
    }

    /// Just the key bytes at a directory slot, bounds-checked the same
    /// way as [`record`](Self::record) but without resolving the value
    /// payload — used by the search routines below, which only need to
    /// compare keys.
    fn key_at(&self, idx: u32) -> Option<&[u8]> {
        let off = self.directory_offset(idx)?;
        if off < self.data_start || off % 4 != 0 {
            return None;
        }
        let header_end = off.checked_add(RECORD_HEADER_LEN)?;
        if header_end > self.data_end {
            return None;
        }
        let keylen = self.u16_at(off + 4) as u64;
        let key_end = header_end.checked_add(keylen)?;
        if key_end > self.data_end {
            return None;
        }
        Some(&self.mmap[header_end as usize..key_end as usize])
    }

    fn hash_slot(&self, table_start: u64, idx: u32) -> (u32, u32) {
        let off = table_start + idx as u64 * HASH_ENTRY_LEN;
        (self.u32_at(off), self.u32_at(off + 4))
    }

    /// Exact-match lookup: normalises `key` and searches the entry hash
    /// table for a slot whose referenced key is byte-for-byte equal.
    ///
    /// The search is a bounded interpolation search: ten probes placed
    /// by linear interpolation between the known hash values at the
    /// window's edges, then plain bisection for the rest — this bounds
    /// worst-case behaviour against adversarial hash distributions while
    /// still being close to O(1) on well-distributed ones.
    pub fn lookup(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        let normalised = normalise(key);
        self.lookup_normalised(&normalised)
    }

    fn lookup_normalised(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        if self.entries == 0 {
            return None;
        }
        let hash = hash_for_version(self.version, key, self.hashseed);

        let mut lower = 0u32;
        let mut upper = self.entries;
        let mut lower_hash = 0u32;
        let mut upper_hash = u32::MAX;
        let mut tries = 0u32;

        loop {
            let hp = interpolate(lower, upper, lower_hash, upper_hash, hash, tries);
            tries += 1;
            let (he_hash, he_data) = self.hash_slot(self.hash_start, hp);

            if he_hash == hash {
                if self.version < 3 {
                    return self.scan_for_exact_key(hp, hash, key);
                }
                match self.compare_candidate(he_data, key) {
                    None => return None,
                    Some(Ordering::Equal) => return self.record(he_data),
                    Some(Ordering::Less) => {
                        lower = hp + 1;
                        lower_hash = he_hash;
                    }
                    Some(Ordering::Greater) => {
                        upper = hp;
                        upper_hash = he_hash;
                    }
                }
            } else if he_hash < hash {
                lower = hp + 1;
                lower_hash = he_hash;
            } else {
                upper = hp;
                upper_hash = he_hash;
            }

            if lower == upper || (lower_hash == upper_hash && lower_hash != hash) {
                return None;
            }
        }
    }

    /// Compare the key stored at directory index `data` against `key`
    /// the same way the build-time sort ordered the hash table: shorter
    /// keys first when one is a byte-prefix of the other, otherwise
    /// plain unsigned byte comparison. This is *not* `path_cmp` — the
    /// hash table's tie-break is plain lexicographic order (matching the
    /// order the builder's `finish` sorts it in), distinct from the
    /// path order used for the directory itself.
    fn compare_candidate(&self, data: u32, key: &[u8]) -> Option<Ordering> {
        let candidate = self.key_at(data)?;
        Some(lexicographic_cmp(candidate, key))
    }

    /// Pre-version-3 fallback: hash slots for those versions carry no
    /// guaranteed secondary sort, so scan outward from the probe while
    /// the hash still matches, comparing keys directly.
    fn scan_for_exact_key(&self, hp: u32, hash: u32, key: &[u8]) -> Option<(&[u8], &[u8])> {
        for u in hp..self.entries {
            let (he_hash, he_data) = self.hash_slot(self.hash_start, u);
            if he_hash != hash {
                break;
            }
            if self.key_at(he_data) == Some(key) {
                return self.record(he_data);
            }
        }
        for u in (0..hp).rev() {
            let (he_hash, he_data) = self.hash_slot(self.hash_start, u);
            if he_hash != hash {
                break;
            }
            if self.key_at(he_data) == Some(key) {
                return self.record(he_data);
            }
        }
        None
    }

    /// Locate the directory index at which `prefix`'s run of descendants
    /// begins, or [`CURSOR_NONE`] if there is none.
    fn find_prefix_start(&self, prefix: &[u8]) -> u32 {
        if prefix.is_empty() {
            if self.entries == 0 {
                return CURSOR_NONE;
            }
            return match self.key_at(0) {
                Some(k) if !k.is_empty() => 0,
                Some(_) if self.entries > 1 => 1,
                _ => CURSOR_NONE,
            };
        }

        if self.prefixes == 0 || self.version < 3 {
            return CURSOR_NONE;
        }

        let hash = hash_for_version(self.version, prefix, self.hashseed);
        let mut lower = 0u32;
        let mut upper = self.prefixes;
        let mut lower_hash = 0u32;
        let mut upper_hash = u32::MAX;
        let mut tries = 0u32;

        loop {
            let hp = interpolate(lower, upper, lower_hash, upper_hash, hash, tries);
            tries += 1;
            let (he_hash, he_data) = self.hash_slot(self.prefix_start, hp);

            if he_hash == hash {
                let Some(candidate) = self.key_at(he_data) else {
                    return CURSOR_NONE;
                };
                match prefix_relation(candidate, prefix) {
                    PrefixRelation::DescendantOf => {
                        if self.is_first_under_prefix(he_data, prefix) {
                            return he_data;
                        }
                        // Not the first slot under this prefix hash
                        // bucket; fall through to the linear scan below,
                        // which walks every same-hash slot.
                        return self.scan_prefix_slots(hp, hash, prefix);
                    }
                    PrefixRelation::Less => {
                        lower = hp + 1;
                        lower_hash = he_hash;
                    }
                    PrefixRelation::Greater => {
                        upper = hp;
                        upper_hash = he_hash;
                    }
                }
            } else if he_hash < hash {
                lower = hp + 1;
                lower_hash = he_hash;
            } else {
                upper = hp;
                upper_hash = he_hash;
            }

            if lower == upper || (lower_hash == upper_hash && lower_hash != hash) {
                return CURSOR_NONE;
            }
        }
    }

    fn is_first_under_prefix(&self, data: u32, prefix: &[u8]) -> bool {
        if data == 0 {
            return true;
        }
        match self.key_at(data - 1) {
            Some(prev) => prefix_relation(prev, prefix) != PrefixRelation::DescendantOf,
            None => true,
        }
    }

    fn scan_prefix_slots(&self, hp: u32, hash: u32, prefix: &[u8]) -> u32 {
        for u in hp..self.prefixes {
            let (he_hash, he_data) = self.hash_slot(self.prefix_start, u);
            if he_hash != hash {
                break;
            }
            if self.key_at(he_data).map(|k| prefix_relation(k, prefix)) == Some(PrefixRelation::DescendantOf)
                && self.is_first_under_prefix(he_data, prefix)
            {
                return he_data;
            }
        }
        for u in (0..hp).rev() {
            let (he_hash, he_data) = self.hash_slot(self.prefix_start, u);
            if he_hash != hash {
                break;
            }
            if self.key_at(he_data).map(|k| prefix_relation(k, prefix)) == Some(PrefixRelation::DescendantOf)
                && self.is_first_under_prefix(he_data, prefix)
            {
                return he_data;
            }
        }
        CURSOR_NONE
    }

    /// Open a cursor over every key equal to or under `prefix`.
    /// `recursive` controls whether [`Cursor::fetch`]/the `Iterator` impl
    /// yields only immediate children or every descendant.
    pub fn cursor<'a>(&'a self, prefix: &[u8], recursive: bool) -> Cursor<'a> {
        let mut normalised = normalise(prefix);
        if !normalised.is_empty() {
            normalised.push(b'/');
        }
        Cursor {
            db: self,
            prefix: normalised,
            recursive,
            started: false,
            cur: CURSOR_NONE,
        }
    }

    /// Convenience: normalise and look up `key`, returning an owned copy
    /// of its value if present.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key).map(|(_, v)| v.to_vec()))
    }
}

/// Plain unsigned byte comparison with length as the final tie-break
/// (the shorter of two otherwise-equal strings sorts first). This is
/// the order the builder's hash-table tie-break sort uses.
fn lexicographic_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let len = a.len().min(b.len());
    match a[..len].cmp(&b[..len]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefixRelation {
    /// `key` begins with `prefix`'s bytes: it is `prefix` itself under
    /// the descendant-hash convention (prefix stored with its trailing
    /// slash), i.e. `key` is a descendant of `prefix`.
    DescendantOf,
    Less,
    Greater,
}

/// Compare a descendant's key against a (slash-terminated) prefix query.
/// Descendant keys are only ever generated from a common prefix, so
/// comparing their leading bytes against the query is enough to recover
/// the prefix's relative order without separately materialising it.
fn prefix_relation(key: &[u8], prefix: &[u8]) -> PrefixRelation {
    if key.len() < prefix.len() {
        return match key.cmp(&prefix[..key.len()]) {
            Ordering::Greater => PrefixRelation::Greater,
            _ => PrefixRelation::Less,
        };
    }
    match key[..prefix.len()].cmp(prefix) {
        Ordering::Equal => PrefixRelation::DescendantOf,
        Ordering::Less => PrefixRelation::Less,
        Ordering::Greater => PrefixRelation::Greater,
    }
}

/// One step of the bounded interpolation search shared by exact lookup
/// and prefix positioning: linear interpolation between the window's
/// known hash values for the first ten probes, then bisection. Bounds
/// worst-case behaviour on adversarial hash distributions while staying
/// close to O(1) on well-distributed ones.
fn interpolate(lower: u32, upper: u32, lower_hash: u32, upper_hash: u32, hash: u32, tries: u32) -> u32 {
    if tries < 10 {
        let span = (upper - lower) as u64;
        let numerator = (hash.wrapping_sub(lower_hash)) as u64 * span;
        let denominator = (upper_hash.wrapping_sub(lower_hash)) as u64 + 1;
        lower + (numerator / denominator) as u32
    } else {
        lower + (upper - lower) / 2
    }
}

/// A live position into one prefix's run of matching entries.
///
/// Borrows from the [`Hardhat`] it was created from; every key/value
/// pair it yields is a slice straight into the mapping, so it cannot
/// outlive the database it came from. Not `Sync`: drive one cursor from
/// one thread at a time, though distinct cursors over the same database
/// may run on separate threads freely.
pub struct Cursor<'a> {
    db: &'a Hardhat,
    prefix: Vec<u8>,
    recursive: bool,
    started: bool,
    cur: u32,
}

impl<'a> Cursor<'a> {
    /// Advance to the next matching entry and return whether one was
    /// found. On success, `self.current()` returns the entry; on
    /// exhaustion it returns `None` and every subsequent call keeps
    /// returning `false`.
    pub fn fetch(&mut self) -> bool {
        let next = if self.started {
            if self.cur == CURSOR_NONE {
                CURSOR_NONE
            } else {
                self.cur.wrapping_add(1)
            }
        } else {
            self.db.find_prefix_start(&self.prefix)
        };

        let next = if next != CURSOR_NONE && next < self.db.entries {
            match self.db.key_at(next) {
                Some(key) if key_matches(key, &self.prefix, self.recursive) => next,
                _ => CURSOR_NONE,
            }
        } else {
            CURSOR_NONE
        };

        self.cur = next;
        self.started = next != CURSOR_NONE;
        self.started
    }

    /// The entry the cursor is currently positioned at, if any.
    pub fn current(&self) -> Option<(&'a [u8], &'a [u8])> {
        if self.cur == CURSOR_NONE {
            return None;
        }
        self.db.record(self.cur)
    }
}

/// `key` matches the cursor's run if it starts with `prefix` (which
/// already carries a trailing slash when non-empty) and, in
/// non-recursive mode, doesn't go on to contain a further slash.
fn key_matches(key: &[u8], prefix: &[u8], recursive: bool) -> bool {
    if key.len() < prefix.len() || &key[..prefix.len()] != prefix {
        return false;
    }
    if recursive {
        return true;
    }
    !key[prefix.len()..].contains(&b'/')
}

impl<'a> Iterator for Cursor<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.fetch() {
            self.current()
        } else {
            None
        }
    }
}

impl Hardhat {
    /// Iterate every entry whose key is `prefix` or (when `recursive`)
    /// a descendant of it, in path order. `recursive = false` yields
    /// only immediate children.
    pub fn iter<'a>(&'a self, prefix: &[u8], recursive: bool) -> Cursor<'a> {
        self.cursor(prefix, recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HardhatBuilder;

    fn build(pairs: &[(&[u8], &[u8])]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hh");
        let mut builder = HardhatBuilder::new(&path).unwrap();
        for (k, v) in pairs {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap();
        (dir, path)
    }

    #[test]
    fn simple_round_trip() {
        let (_dir, path) = build(&[(b"foo", b"data")]);
        let db = Hardhat::open(&path).unwrap();
        assert_eq!(db.get(b"foo").unwrap(), Some(b"data".to_vec()));
        assert_eq!(db.get(b"bar").unwrap(), None);
    }

    #[test]
    fn normalisation_first_write_wins() {
        let (_dir, path) = build(&[(b"a//b/./c", b"x"), (b"a/b/c", b"y")]);
        let db = Hardhat::open(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(b"a/b/c").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn shallow_vs_recursive_listing() {
        let (_dir, path) = build(&[
            (b"x", b"1"),
            (b"x/a", b"2"),
            (b"x/b", b"3"),
            (b"x/a/1", b"4"),
            (b"x/a/2", b"5"),
        ]);
        let db = Hardhat::open(&path).unwrap();

        let shallow: Vec<Vec<u8>> = db.iter(b"x", false).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(shallow, vec![b"x/a".to_vec(), b"x/b".to_vec()]);

        // Directory order groups by depth first: both depth-1 children
        // sort before either depth-2 grandchild, regardless of which
        // parent they hang off.
        let deep: Vec<Vec<u8>> = db.iter(b"x", true).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(
            deep,
            vec![
                b"x/a".to_vec(),
                b"x/b".to_vec(),
                b"x/a/1".to_vec(),
                b"x/a/2".to_vec(),
            ]
        );
    }

    #[test]
    fn empty_prefix_suppresses_the_empty_key() {
        let (_dir, path) = build(&[(b"", b"root"), (b"a", b"1"), (b"b", b"2")]);
        let db = Hardhat::open(&path).unwrap();
        let listed: Vec<Vec<u8>> = db.iter(b"", false).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(listed, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn recursive_iteration_from_ancestor_yields_entry_once() {
        let (_dir, path) = build(&[(b"a/b/c", b"leaf"), (b"a/b/d", b"other")]);
        let db = Hardhat::open(&path).unwrap();
        let matches: Vec<Vec<u8>> = db.iter(b"a", true).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(matches.iter().filter(|k| k.as_slice() == b"a/b/c").count(), 1);
    }

    #[test]
    fn bit_flip_in_superblock_is_rejected() {
        let (_dir, path) = build(&[(b"foo", b"bar")]);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[100] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(Hardhat::open(&path).is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let (_dir, path) = build(&[(b"foo", b"bar")]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 16]).unwrap();
        assert!(Hardhat::open(&path).is_err());
    }

    #[test]
    fn foreign_endian_round_trip() {
        let (_dir, path) = build(&[(b"foo", b"bar"), (b"foo/baz", b"qux")]);
        let native = std::fs::read(&path).unwrap();
        let swapped = byte_swap_database(&native);

        let swapped_path = path.with_extension("swapped");
        std::fs::write(&swapped_path, &swapped).unwrap();

        let db = Hardhat::open(&swapped_path).unwrap();
        assert_eq!(db.get(b"foo").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(db.get(b"foo/baz").unwrap(), Some(b"qux".to_vec()));
    }

    /// Byte-swap every multi-byte integer field in a hardhat file: the
    /// superblock's fixed fields, every directory offset, every
    /// hash-table slot, and every record header. Simulates what a
    /// foreign-endian machine's writer would have produced, so opening
    /// the result exercises [`Endian::Swapped`] end to end.
    fn byte_swap_database(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();

        macro_rules! swap_u16_field {
            ($off:expr) => {{
                let b: [u8; 2] = out[$off..$off + 2].try_into().unwrap();
                out[$off..$off + 2].copy_from_slice(&u16::from_ne_bytes(b).swap_bytes().to_ne_bytes());
            }};
        }
        macro_rules! swap_u32_field {
            ($off:expr) => {{
                let b: [u8; 4] = out[$off..$off + 4].try_into().unwrap();
                out[$off..$off + 4].copy_from_slice(&u32::from_ne_bytes(b).swap_bytes().to_ne_bytes());
            }};
        }
        macro_rules! swap_u64_field {
            ($off:expr) => {{
                let b: [u8; 8] = out[$off..$off + 8].try_into().unwrap();
                out[$off..$off + 8].copy_from_slice(&u64::from_ne_bytes(b).swap_bytes().to_ne_bytes());
            }};
        }

        // Section ranges and the record walk below need the unswapped
        // values, so read them from the original bytes before mutating.
        let sb = LayoutVerified::<_, Superblock>::new(&bytes[..SUPERBLOCK_SIZE])
            .unwrap()
            .into_ref();
        let view = SuperblockView::new(sb, Endian::Native);
        let (data_start, data_end) = view.data_range();
        let (dir_start, dir_end) = view.directory_range();
        let (hash_start, hash_end) = view.hash_range();
        let (prefix_start, prefix_end) = view.prefix_range();
        let alignment = view.alignment();
        let blocksize = view.blocksize();

        let mut off = data_start;
        while off < data_end {
            let valuelen = u32::from_ne_bytes(out[off as usize..off as usize + 4].try_into().unwrap());
            let keylen = u16::from_ne_bytes(out[off as usize + 4..off as usize + 6].try_into().unwrap());
            let key_end = off + 6 + keylen as u64;
            let pad = pad_amount(key_end, valuelen as u64, 1u64 << alignment, 1u64 << blocksize);
            let value_start = key_end + pad;

            swap_u32_field!(off as usize);
            swap_u16_field!((off + 4) as usize);

            off = value_start + valuelen as u64;
        }

        swap_u64_field!(8); // byteorder
        swap_u32_field!(16); // version
        swap_u32_field!(20); // entries
        swap_u64_field!(24); // filesize
        swap_u64_field!(32); // data_start
        swap_u64_field!(40); // data_end
        swap_u64_field!(48); // hash_start
        swap_u64_field!(56); // hash_end
        swap_u64_field!(64); // directory_start
        swap_u64_field!(72); // directory_end
        swap_u64_field!(80); // prefix_start
        swap_u64_field!(88); // prefix_end
        swap_u32_field!(96); // prefixes
        swap_u32_field!(100); // hashseed

        for o in (dir_start..dir_end).step_by(8) {
            swap_u64_field!(o as usize);
        }
        for o in (hash_start..hash_end).step_by(4) {
            swap_u32_field!(o as usize);
        }
        for o in (prefix_start..prefix_end).step_by(4) {
            swap_u32_field!(o as usize);
        }

        // The checksum covers the raw on-disk bytes, whatever order they
        // happen to be in, so it must be recomputed over the now-swapped
        // superblock rather than byte-swapped in place like every other
        // field above.
        let version = view.version();
        let hashseed = view.hashseed();
        let checksum_len = std::mem::size_of::<Superblock>() - 4;
        let checksum = hash_for_version(version, &out[..checksum_len], hashseed);
        out[4092..4096].copy_from_slice(&checksum.swap_bytes().to_ne_bytes());

        out
    }
}
