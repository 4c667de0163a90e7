//! Path-like key normalisation and ordering.
//!
//! Keys are slash-separated byte strings with filename semantics: leading
//! and trailing slashes are insignificant, repeated slashes collapse, `.`
//! components vanish, and `..` pops the previous component (never above
//! the root).

use std::cmp::Ordering;

/// Normalise `src` per hardhat's path rules, returning an owned buffer.
///
/// The result never contains an empty component, `.`, or `..`, and never
/// begins or ends with `/`. Normalisation is idempotent:
/// `normalise(&normalise(s)) == normalise(s)`.
pub fn normalise(src: &[u8]) -> Vec<u8> {
    let mut dst: Vec<u8> = Vec::with_capacity(src.len());

    for component in src.split(|&b| b == b'/') {
        match component {
            b"" | b"." => continue,
            b".." => {
                if let Some(pos) = dst.iter().rposition(|&b| b == b'/') {
                    dst.truncate(pos);
                } else {
                    dst.clear();
                }
            }
            _ => {
                if !dst.is_empty() {
                    dst.push(b'/');
                }
                dst.extend_from_slice(component);
            }
        }
    }

    dst
}

/// Compare two paths in hardhat's path order.
///
/// Equal leading bytes are skipped. If the two strings diverge, and the
/// remaining tail of exactly one of them contains a further `/`, that one
/// is the "deeper" path and sorts after the other *regardless of how the
/// diverging bytes themselves compare* — this is what makes a whole
/// depth-1 sibling subtree sort before the depth-2 descendants of an
/// earlier sibling (`"x/b"` before `"x/a/1"`). If neither or both tails
/// contain a further slash, the diverging bytes are compared as unsigned.
/// If one string is a prefix of the other, the shorter (the ancestor)
/// sorts first.
///
/// See the worked example below for how ancestors and siblings interleave.
pub fn path_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let mismatch = a.iter().zip(b.iter()).position(|(x, y)| x != y);

    let p = match mismatch {
        Some(p) => p,
        None => return a.len().cmp(&b.len()),
    };

    let (ac, bc) = (a[p], b[p]);
    if ac == b'/' {
        return Ordering::Greater;
    }
    if bc == b'/' {
        return Ordering::Less;
    }

    let a_has_slash = a[p..].contains(&b'/');
    let b_has_slash = b[p..].contains(&b'/');
    match (a_has_slash, b_has_slash) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => ac.cmp(&bc),
    }
}

/// Thin newtype so paths can be sorted with `sort_by_key`/`BinaryHeap`
/// without repeating the `path_cmp` call at every use site.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PathKey<'a>(pub &'a [u8]);

impl<'a> Ord for PathKey<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        path_cmp(self.0, other.0)
    }
}

impl<'a> PartialOrd for PathKey<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_strips_slashes_and_dots() {
        assert_eq!(normalise(b"a//b/./c"), b"a/b/c");
        assert_eq!(normalise(b"/a/b/"), b"a/b");
        assert_eq!(normalise(b""), b"");
        assert_eq!(normalise(b"."), b"");
        assert_eq!(normalise(b"./"), b"");
    }

    #[test]
    fn normalise_handles_dotdot() {
        assert_eq!(normalise(b"a/b/../c"), b"a/c");
        assert_eq!(normalise(b"../a"), b"a");
        assert_eq!(normalise(b"a/../../b"), b"b");
    }

    #[test]
    fn normalise_is_idempotent() {
        for s in [
            &b""[..],
            b"a//b/./c",
            b"/a/b/",
            b"a/../../b",
            b"foo/bar/baz",
            b"../../../",
        ] {
            let once = normalise(s);
            let twice = normalise(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn path_order_matches_reference_example() {
        // All depth-1 siblings of a common ancestor sort before any
        // depth-2+ descendant of an earlier sibling.
        let keys: Vec<&[u8]> = vec![b"x/b/1", b"x/a/2", b"x/a/1", b"x/b", b"x/a", b"x"];
        let mut sorted = keys.clone();
        sorted.sort_by(|a, b| path_cmp(a, b));
        assert_eq!(
            sorted,
            vec![
                b"x".as_slice(),
                b"x/a".as_slice(),
                b"x/b".as_slice(),
                b"x/a/1".as_slice(),
                b"x/a/2".as_slice(),
                b"x/b/1".as_slice(),
            ]
        );
    }

    #[test]
    fn path_cmp_is_consistent_with_equality() {
        assert_eq!(path_cmp(b"foo", b"foo"), Ordering::Equal);
        assert_eq!(path_cmp(b"foo", b"foo/bar"), Ordering::Less);
        assert_eq!(path_cmp(b"foo/bar", b"foo"), Ordering::Greater);
    }

    #[test]
    fn path_cmp_is_a_strict_weak_order() {
        let keys: &[&[u8]] = &[b"", b"a", b"a/b", b"a/c", b"ab", b"b", b"b/a/c"];
        for &x in keys {
            assert_eq!(path_cmp(x, x), Ordering::Equal);
        }
        for &x in keys {
            for &y in keys {
                assert_eq!(path_cmp(x, y), path_cmp(y, x).reverse());
            }
        }
    }
}
