//! Fragment naming and coverage checks.

use std::path::PathBuf;

use thiserror::Error;

/// File name prefix shared by every fragment.
pub const FRAGMENT_PREFIX: &str = "zipline_partial_";

/// One persisted byte range `[start, end)` of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFragment {
    /// Upload session identifier.
    pub identifier: String,
    /// First byte offset.
    pub start: u64,
    /// One past the last byte offset.
    pub end: u64,
    /// Location on disk.
    pub path: PathBuf,
}

impl ChunkFragment {
    /// Number of bytes in the fragment.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the fragment holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// File name of the fragment `(identifier, start, end)`.
pub fn fragment_name(identifier: &str, start: u64, end: u64) -> String {
    format!("{FRAGMENT_PREFIX}{identifier}_{start}_{end}")
}

/// Parse a fragment file name into `(identifier, start, end)`.
pub fn parse_fragment_name(name: &str) -> Option<(&str, u64, u64)> {
    let rest = name.strip_prefix(FRAGMENT_PREFIX)?;
    let mut parts = rest.rsplitn(3, '_');
    let end = parts.next()?.parse().ok()?;
    let start = parts.next()?.parse().ok()?;
    let identifier = parts.next()?;
    if identifier.is_empty() || start > end {
        return None;
    }
    Some((identifier, start, end))
}

/// Why a fragment set cannot be assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverageError {
    /// Fewer or more fragments than chunks accepted.
    #[error("expected {expected} fragments, found {found}")]
    CountMismatch {
        /// Chunks accepted by the session.
        expected: usize,
        /// Fragments on disk.
        found: usize,
    },
    /// Bytes `[from, to)` are missing.
    #[error("missing bytes {from}-{to}")]
    Gap {
        /// First missing offset.
        from: u64,
        /// Where the next fragment starts.
        to: u64,
    },
    /// Two fragments claim the same bytes.
    #[error("fragments overlap at offset {at}")]
    Overlap {
        /// Start of the overlapping fragment.
        at: u64,
    },
    /// Fragments end before or after the declared size.
    #[error("fragments cover {covered} bytes, declared total is {total}")]
    LengthMismatch {
        /// End of the last fragment.
        covered: u64,
        /// Declared total size.
        total: u64,
    },
}

/// Check that `fragments` (sorted by start) tile `[0, total)` exactly.
pub fn verify_coverage(
    fragments: &[ChunkFragment],
    total: u64,
    expected_count: usize,
) -> Result<(), CoverageError> {
    if fragments.len() != expected_count {
        return Err(CoverageError::CountMismatch {
            expected: expected_count,
            found: fragments.len(),
        });
    }

    let mut cursor = 0u64;
    for fragment in fragments {
        if fragment.start > cursor {
            return Err(CoverageError::Gap {
                from: cursor,
                to: fragment.start,
            });
        }
        if fragment.start < cursor {
            return Err(CoverageError::Overlap { at: fragment.start });
        }
        cursor = fragment.end;
    }

    if cursor != total {
        return Err(CoverageError::LengthMismatch {
            covered: cursor,
            total,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(start: u64, end: u64) -> ChunkFragment {
        ChunkFragment {
            identifier: "abcd1234".to_string(),
            start,
            end,
            path: PathBuf::from(fragment_name("abcd1234", start, end)),
        }
    }

    #[test]
    fn test_name_round_trip() {
        let name = fragment_name("Xy12AbCd", 1024, 2048);
        assert_eq!(name, "zipline_partial_Xy12AbCd_1024_2048");
        assert_eq!(parse_fragment_name(&name), Some(("Xy12AbCd", 1024, 2048)));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_fragment_name("notes.txt"), None);
        assert_eq!(parse_fragment_name(".zipline_partial_a_0_1.tmp"), None);
        assert_eq!(parse_fragment_name("zipline_partial_a_5_1"), None);
        assert_eq!(parse_fragment_name("zipline_partial__0_1"), None);
    }

    #[test]
    fn test_contiguous_cover_passes() {
        let fragments = [frag(0, 3), frag(3, 6), frag(6, 10)];
        assert_eq!(verify_coverage(&fragments, 10, 3), Ok(()));
    }

    #[test]
    fn test_coverage_failures() {
        assert_eq!(
            verify_coverage(&[frag(0, 3), frag(6, 10)], 10, 3),
            Err(CoverageError::CountMismatch {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            verify_coverage(&[frag(0, 3), frag(4, 10)], 10, 2),
            Err(CoverageError::Gap { from: 3, to: 4 })
        );
        assert_eq!(
            verify_coverage(&[frag(0, 4), frag(3, 10)], 10, 2),
            Err(CoverageError::Overlap { at: 3 })
        );
        assert_eq!(
            verify_coverage(&[frag(0, 4), frag(4, 8)], 10, 2),
            Err(CoverageError::LengthMismatch {
                covered: 8,
                total: 10
            })
        );
    }
}
