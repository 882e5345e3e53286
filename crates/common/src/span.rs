/*
 * Keys, spans, and timestamps.
 *
 * Keys are opaque byte strings ordered lexicographically. A KeySpan is the
 * half-open interval [start, end). Timestamps are hybrid logical clocks:
 * wall-clock nanos plus a logical tiebreaker.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An opaque, lexicographically ordered key.
pub type Key = Vec<u8>;

/// A half-open interval of keys `[start, end)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeySpan {
    pub start: Key,
    pub end: Key,
}

impl KeySpan {
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// A span is valid when it covers at least one key.
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_slice() <= key && key < self.end.as_slice()
    }

    /// The overlap of two spans, or `None` when they do not intersect.
    pub fn intersect(&self, other: &KeySpan) -> Option<KeySpan> {
        let start = std::cmp::max(&self.start, &other.start);
        let end = std::cmp::min(&self.end, &other.end);
        if start < end {
            Some(KeySpan {
                start: start.clone(),
                end: end.clone(),
            })
        } else {
            None
        }
    }
}

fn fmt_key(f: &mut fmt::Formatter<'_>, key: &[u8]) -> fmt::Result {
    if !key.is_empty() && key.iter().all(|b| b.is_ascii_graphic()) {
        write!(f, "{}", String::from_utf8_lossy(key))
    } else {
        for b in key {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for KeySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        fmt_key(f, &self.start)?;
        write!(f, ", ")?;
        fmt_key(f, &self.end)?;
        write!(f, ")")
    }
}

/// A hybrid logical clock reading.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub wall_nanos: i64,
    pub logical: i32,
}

impl Timestamp {
    pub const EMPTY: Timestamp = Timestamp {
        wall_nanos: 0,
        logical: 0,
    };

    pub fn from_unix_nanos(wall_nanos: i64) -> Self {
        Self {
            wall_nanos,
            logical: 0,
        }
    }

    /// The current wall clock as a timestamp.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as i64;
        Self::from_unix_nanos(nanos)
    }

    /// The zero timestamp doubles as the "unset" sentinel.
    pub fn is_empty(&self) -> bool {
        self.wall_nanos == 0 && self.logical == 0
    }

    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.wall_nanos.max(0) as u64)
    }

    /// Wall-clock time elapsed since this timestamp; zero if it lies in the
    /// future.
    pub fn elapsed(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.to_system_time())
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.wall_nanos, self.logical)
    }
}

/// Entry counts for exported data, split into rows and secondary index
/// entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub rows: u64,
    pub index_entries: u64,
    pub data_size: u64,
}

impl RowCounts {
    pub fn add(&mut self, other: &RowCounts) {
        self.rows += other.rows;
        self.index_entries += other.index_entries;
        self.data_size += other.data_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_validity() {
        assert!(KeySpan::new(*b"a", *b"z").is_valid());
        assert!(!KeySpan::new(*b"a", *b"a").is_valid());
        assert!(!KeySpan::new(*b"z", *b"a").is_valid());
    }

    #[test]
    fn test_span_intersect() {
        let a = KeySpan::new(*b"a", *b"m");
        let b = KeySpan::new(*b"f", *b"z");
        assert_eq!(a.intersect(&b), Some(KeySpan::new(*b"f", *b"m")));

        let c = KeySpan::new(*b"m", *b"z");
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_span_contains() {
        let span = KeySpan::new(*b"a", *b"c");
        assert!(span.contains(b"a"));
        assert!(span.contains(b"b"));
        assert!(!span.contains(b"c"));
    }

    #[test]
    fn test_span_display() {
        let span = KeySpan::new(*b"a", *b"z");
        assert_eq!(span.to_string(), "[a, z)");

        let raw = KeySpan::new(vec![0x00], vec![0xff]);
        assert_eq!(raw.to_string(), "[00, ff)");
    }

    #[test]
    fn test_timestamp_sentinel() {
        assert!(Timestamp::EMPTY.is_empty());
        assert!(!Timestamp::from_unix_nanos(1).is_empty());
        assert!(!Timestamp::now().is_empty());
    }

    #[test]
    fn test_timestamp_elapsed() {
        // A timestamp from 1970 is a very old read.
        assert!(Timestamp::from_unix_nanos(1).elapsed() > Duration::from_secs(3600));
        // A future timestamp has nothing elapsed.
        let future = Timestamp::from_unix_nanos(Timestamp::now().wall_nanos + 1_000_000_000);
        assert_eq!(future.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_row_counts_add() {
        let mut counts = RowCounts {
            rows: 1,
            index_entries: 2,
            data_size: 100,
        };
        counts.add(&RowCounts {
            rows: 3,
            index_entries: 4,
            data_size: 50,
        });
        assert_eq!(counts.rows, 4);
        assert_eq!(counts.index_entries, 6);
        assert_eq!(counts.data_size, 150);
    }
}
