//! On-disk structures: the fixed-size superblock, hash table entries, and
//! the byte-order handling needed to read a database written on a
//! foreign-endian machine.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Literal magic string stored at the start of every hardhat file.
pub const MAGIC: [u8; 8] = *b"*HARDHAT";

/// Written into `byteorder` on the machine that built the file. Reading
/// it back byte-swapped (rather than matching) means every multi-byte
/// field in the file is byte-swapped too.
pub const BYTEORDER_MARK: u64 = 0x0123_4567_89ab_cdef;

pub const SUPERBLOCK_SIZE: usize = 4096;

pub const DEFAULT_ALIGNMENT: u8 = 3;
pub const DEFAULT_BLOCKSIZE: u8 = 12;

/// Sentinel stored in a [`HashEntry::data`] field to mark an unused slot.
/// Never a valid directory index: databases are capped well below
/// `u32::MAX` entries by the 32-bit directory index itself.
pub const EMPTYHASH: u32 = u32::MAX;

/// The 4096-byte header every hardhat file begins with.
///
/// Field order and offsets are part of the on-disk format and must not
/// change: readers locate every other section purely from these
/// offsets, so even an unrecognised future version can still be
/// sanity-checked and, if the reader is willing, read on a best-effort
/// basis.
#[derive(FromBytes, FromZeroes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct Superblock {
    pub magic: [u8; 8],
    pub byteorder: u64,
    pub version: u32,
    pub entries: u32,
    pub filesize: u64,
    pub data_start: u64,
    pub data_end: u64,
    pub hash_start: u64,
    pub hash_end: u64,
    pub directory_start: u64,
    pub directory_end: u64,
    /// Version 3+. Zero in older files.
    pub prefix_start: u64,
    /// Version 3+. Zero in older files.
    pub prefix_end: u64,
    /// Version 3+. Zero in older files.
    pub prefixes: u32,
    /// Version 2+. Zero (meaning "unseeded FNV-1a") in version 1 files.
    pub hashseed: u32,
    /// Version 3+.
    pub alignment: u8,
    /// Version 3+.
    pub blocksize: u8,
    pub reserved: u16,
    pub padding: [u8; 3984],
    pub checksum: u32,
}

const _: () = assert!(std::mem::size_of::<Superblock>() == SUPERBLOCK_SIZE);

impl Superblock {
    pub fn zeroed() -> Self {
        FromZeroes::new_zeroed()
    }
}

/// A hash table slot: `(keyed hash, directory index)`, sorted by `hash`
/// on disk so lookups can use interpolation search. `data == EMPTYHASH`
/// marks an empty slot in the build-time table only — the on-disk
/// tables never contain empty slots.
#[derive(FromBytes, FromZeroes, AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct HashEntry {
    pub hash: u32,
    pub data: u32,
}

impl HashEntry {
    pub fn empty() -> Self {
        HashEntry {
            hash: 0,
            data: EMPTYHASH,
        }
    }
}

/// Byte order of an open database relative to this machine.
///
/// The reference format avoids runtime branching on endianness by
/// compiling two copies of the reader, one with swap macros and one
/// without. A Rust reader can't duplicate its own source at compile
/// time, but the swap is cheap enough that a small enum dispatch costs
/// nothing that matters: databases are read far more often than their
/// integers are unpacked in a hot loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Native,
    Swapped,
}

impl Endian {
    /// Determine which endianness a superblock's raw `byteorder` field
    /// implies. Returns `None` if neither the value nor its byte-swap
    /// matches [`BYTEORDER_MARK`] — the file is not a hardhat database,
    /// or not one this reader understands.
    pub fn detect(raw_byteorder: u64) -> Option<Endian> {
        if raw_byteorder == BYTEORDER_MARK {
            Some(Endian::Native)
        } else if raw_byteorder.swap_bytes() == BYTEORDER_MARK {
            Some(Endian::Swapped)
        } else {
            None
        }
    }

    pub fn fix_u16(self, v: u16) -> u16 {
        match self {
            Endian::Native => v,
            Endian::Swapped => v.swap_bytes(),
        }
    }

    pub fn fix_u32(self, v: u32) -> u32 {
        match self {
            Endian::Native => v,
            Endian::Swapped => v.swap_bytes(),
        }
    }

    pub fn fix_u64(self, v: u64) -> u64 {
        match self {
            Endian::Native => v,
            Endian::Swapped => v.swap_bytes(),
        }
    }
}

/// Endian-aware view over a borrowed superblock.
///
/// All accessors return host-native values regardless of which machine
/// wrote the file.
pub struct SuperblockView<'a> {
    sb: &'a Superblock,
    endian: Endian,
}

impl<'a> SuperblockView<'a> {
    pub fn new(sb: &'a Superblock, endian: Endian) -> Self {
        SuperblockView { sb, endian }
    }

    pub fn version(&self) -> u32 {
        self.endian.fix_u32(self.sb.version)
    }

    pub fn entries(&self) -> u32 {
        self.endian.fix_u32(self.sb.entries)
    }

    pub fn filesize(&self) -> u64 {
        self.endian.fix_u64(self.sb.filesize)
    }

    pub fn data_range(&self) -> (u64, u64) {
        (
            self.endian.fix_u64(self.sb.data_start),
            self.endian.fix_u64(self.sb.data_end),
        )
    }

    pub fn hash_range(&self) -> (u64, u64) {
        (
            self.endian.fix_u64(self.sb.hash_start),
            self.endian.fix_u64(self.sb.hash_end),
        )
    }

    pub fn directory_range(&self) -> (u64, u64) {
        (
            self.endian.fix_u64(self.sb.directory_start),
            self.endian.fix_u64(self.sb.directory_end),
        )
    }

    pub fn prefix_range(&self) -> (u64, u64) {
        if self.version() < 3 {
            return (0, 0);
        }
        (
            self.endian.fix_u64(self.sb.prefix_start),
            self.endian.fix_u64(self.sb.prefix_end),
        )
    }

    pub fn prefixes(&self) -> u32 {
        if self.version() < 3 {
            return 0;
        }
        self.endian.fix_u32(self.sb.prefixes)
    }

    pub fn hashseed(&self) -> u32 {
        if self.version() < 2 {
            return 0;
        }
        self.endian.fix_u32(self.sb.hashseed)
    }

    pub fn alignment(&self) -> u8 {
        if self.version() < 3 {
            return DEFAULT_ALIGNMENT;
        }
        self.sb.alignment
    }

    pub fn blocksize(&self) -> u8 {
        if self.version() < 3 {
            return DEFAULT_BLOCKSIZE;
        }
        self.sb.blocksize
    }

    pub fn checksum(&self) -> u32 {
        self.endian.fix_u32(self.sb.checksum)
    }
}

/// Endian-aware read of a [`HashEntry`] pair.
pub fn hash_entry_fields(entry: &HashEntry, endian: Endian) -> (u32, u32) {
    (endian.fix_u32(entry.hash), endian.fix_u32(entry.data))
}

/// How many zero bytes to insert before `offset` so that a `length`-byte
/// write aligned to `alignment` doesn't needlessly straddle a
/// `blocksize`-byte boundary. Shared between the builder (which inserts
/// the padding) and the reader (which must reconstruct where it ended,
/// since the padding itself isn't recorded anywhere on disk).
pub fn pad_amount(offset: u64, length: u64, alignment: u64, blocksize: u64) -> u64 {
    let mut align = align_up_remainder(offset, alignment);
    let aligned_offset = offset + align;

    let start = aligned_offset % blocksize;
    let end_rem = (aligned_offset + length) % blocksize;
    let end = if end_rem == 0 { blocksize } else { end_rem };

    if start > end {
        align += align_up_remainder(aligned_offset, blocksize);
    }

    align
}

fn align_up_remainder(offset: u64, alignment: u64) -> u64 {
    let rem = offset % alignment;
    if rem == 0 {
        0
    } else {
        alignment - rem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_size_is_4096() {
        assert_eq!(std::mem::size_of::<Superblock>(), 4096);
    }

    #[test]
    fn endian_detect_native_mark() {
        assert_eq!(Endian::detect(BYTEORDER_MARK), Some(Endian::Native));
    }

    #[test]
    fn endian_detect_swapped_mark() {
        assert_eq!(
            Endian::detect(BYTEORDER_MARK.swap_bytes()),
            Some(Endian::Swapped)
        );
    }

    #[test]
    fn endian_detect_rejects_garbage() {
        assert_eq!(Endian::detect(0xdead_beef_dead_beef), None);
    }

    #[test]
    fn pad_amount_is_zero_when_already_aligned() {
        assert_eq!(pad_amount(0, 10, 8, 4096), 0);
    }

    #[test]
    fn pad_amount_rounds_up_to_alignment() {
        assert_eq!(pad_amount(5, 10, 8, 4096), 3);
    }

    #[test]
    fn swapped_view_fixes_up_fields() {
        let mut sb = Superblock::zeroed();
        sb.magic = MAGIC;
        sb.byteorder = BYTEORDER_MARK.swap_bytes();
        sb.version = 3u32.swap_bytes();
        sb.entries = 7u32.swap_bytes();

        let view = SuperblockView::new(&sb, Endian::Swapped);
        assert_eq!(view.version(), 3);
        assert_eq!(view.entries(), 7);
    }
}
