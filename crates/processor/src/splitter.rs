/*
 * Range splitter.
 *
 * Breaks each assigned span into range-aligned subspans so that export
 * requests line up with the store's range boundaries. The last subspan of
 * every assigned span is flagged as finishing it for progress accounting.
 */

use backup_common::{BackupError, KeySpan, Result, Timestamp};
use std::time::Instant;

/// Access to the store's range addressing.
pub trait RangeOracle: Send + Sync {
    /// Returns the spans of all ranges overlapping `span`, in ascending key
    /// order.
    fn covering_ranges(&self, span: &KeySpan) -> Result<Vec<KeySpan>>;
}

/// One unit of export work.
#[derive(Debug, Clone)]
pub struct SpanRequest {
    pub span: KeySpan,
    /// Resume timestamp when continuing a mid-key split; empty otherwise.
    pub first_key_ts: Timestamp,
    /// Exclusive lower bound of the interval to export.
    pub start: Timestamp,
    /// Inclusive upper bound of the interval to export.
    pub end: Timestamp,
    pub attempts: u32,
    pub last_tried: Option<Instant>,
    /// True for the last subspan derived from an assigned span.
    pub finishes_spec: bool,
}

impl SpanRequest {
    fn new(span: KeySpan, start: Timestamp, end: Timestamp) -> Self {
        Self {
            span,
            first_key_ts: Timestamp::EMPTY,
            start,
            end,
            attempts: 0,
            last_tried: None,
            finishes_spec: false,
        }
    }
}

/// Splits `spans` into per-range requests appended to `out`. With
/// presplitting off, each span becomes a single request.
pub fn split_request_spans(
    spans: &[KeySpan],
    start: Timestamp,
    end: Timestamp,
    presplit: bool,
    oracle: &dyn RangeOracle,
    out: &mut Vec<SpanRequest>,
) -> Result<()> {
    for full_span in spans {
        let before = out.len();
        let mut remaining = full_span.clone();

        if presplit {
            for range in oracle.covering_ranges(full_span)? {
                let subspan = remaining.intersect(&range).ok_or_else(|| {
                    BackupError::RangeLookup(format!(
                        "{range} not in {remaining} of {full_span}"
                    ))
                })?;
                remaining.start = subspan.end.clone();
                out.push(SpanRequest::new(subspan, start, end));
            }
        }

        // Any tail the range iteration did not cover is requested whole.
        if remaining.is_valid() {
            out.push(SpanRequest::new(remaining, start, end));
        }

        if out.len() > before {
            if let Some(last) = out.last_mut() {
                last.finishes_spec = true;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRanges(Vec<KeySpan>);

    impl RangeOracle for FixedRanges {
        fn covering_ranges(&self, span: &KeySpan) -> Result<Vec<KeySpan>> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.intersect(span).is_some())
                .cloned()
                .collect())
        }
    }

    struct FailingOracle;

    impl RangeOracle for FailingOracle {
        fn covering_ranges(&self, _span: &KeySpan) -> Result<Vec<KeySpan>> {
            Err(BackupError::RangeLookup("descriptor scan failed".into()))
        }
    }

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_unix_nanos(n)
    }

    #[test]
    fn test_no_presplit_single_request() {
        let oracle = FailingOracle;
        let mut out = Vec::new();
        split_request_spans(
            &[KeySpan::new(*b"a", *b"z")],
            ts(1),
            ts(2),
            false,
            &oracle,
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].span, KeySpan::new(*b"a", *b"z"));
        assert!(out[0].finishes_spec);
        assert_eq!(out[0].start, ts(1));
        assert_eq!(out[0].end, ts(2));
    }

    #[test]
    fn test_presplit_along_ranges() {
        let oracle = FixedRanges(vec![
            KeySpan::new(*b"a", *b"f"),
            KeySpan::new(*b"f", *b"m"),
            KeySpan::new(*b"m", *b"t"),
        ]);
        let mut out = Vec::new();
        split_request_spans(
            &[KeySpan::new(*b"c", *b"z")],
            ts(1),
            ts(2),
            true,
            &oracle,
            &mut out,
        )
        .unwrap();

        // Range-intersected subspans plus the uncovered tail [t, z).
        let spans: Vec<KeySpan> = out.iter().map(|r| r.span.clone()).collect();
        assert_eq!(
            spans,
            vec![
                KeySpan::new(*b"c", *b"f"),
                KeySpan::new(*b"f", *b"m"),
                KeySpan::new(*b"m", *b"t"),
                KeySpan::new(*b"t", *b"z"),
            ]
        );
        // Only the last subspan finishes the assigned span.
        assert_eq!(out.iter().filter(|r| r.finishes_spec).count(), 1);
        assert!(out.last().unwrap().finishes_spec);
    }

    #[test]
    fn test_multiple_assigned_spans_each_finish() {
        let oracle = FixedRanges(vec![KeySpan::new(*b"a", *b"z")]);
        let mut out = Vec::new();
        split_request_spans(
            &[KeySpan::new(*b"a", *b"c"), KeySpan::new(*b"d", *b"f")],
            ts(1),
            ts(2),
            true,
            &oracle,
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.finishes_spec));
    }

    #[test]
    fn test_oracle_failure_is_fatal() {
        let mut out = Vec::new();
        let err = split_request_spans(
            &[KeySpan::new(*b"a", *b"z")],
            ts(1),
            ts(2),
            true,
            &FailingOracle,
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, BackupError::RangeLookup(_)));
    }
}
