/*
 * Retry policy for export attempts.
 *
 * Lock conflicts requeue the span; GC-threshold reads on data excluded
 * from the backup complete without output; everything else is fatal for
 * the processor. Requeued spans wait out a per-attempt delay, and once a
 * retried read falls far enough behind the read-as-of time the worker
 * latches into priority mode.
 */

use backup_common::{ProcessorSettings, Timestamp};
use backup_proto::ExportError;
use std::time::{Duration, Instant};

/// What to do with a failed export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Put the span back on the queue for another attempt.
    Requeue,
    /// Drop the span; its data was excluded from the backup.
    CompleteWithoutData,
    /// Fail the processor.
    Fatal,
}

pub fn classify(err: &ExportError) -> Verdict {
    match err {
        ExportError::WriteIntent { .. } => Verdict::Requeue,
        ExportError::BeforeGcThreshold {
            data_excluded_from_backup: true,
            ..
        } => Verdict::CompleteWithoutData,
        _ => Verdict::Fatal,
    }
}

/// Delay and priority escalation applied before a retried span runs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay_per_attempt: Duration,
    pub priority_after: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ProcessorSettings) -> Self {
        Self {
            delay_per_attempt: settings.read_retry_delay,
            priority_after: settings.read_with_priority_after,
        }
    }

    /// Remaining wait before the next attempt of a span last tried at
    /// `last_tried` may run.
    pub fn delay_before_retry(&self, last_tried: Option<Instant>) -> Duration {
        match last_tried {
            Some(tried) => self.delay_per_attempt.saturating_sub(tried.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// True once reads are far enough behind the read-as-of time that
    /// conflicting transactions should be aborted rather than waited out.
    pub fn should_escalate(&self, read_time: Timestamp) -> bool {
        read_time.elapsed() > self.priority_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_write_intent() {
        let err = ExportError::WriteIntent { key: b"k".to_vec() };
        assert_eq!(classify(&err), Verdict::Requeue);
    }

    #[test]
    fn test_classify_gc_threshold() {
        let excluded = ExportError::BeforeGcThreshold {
            threshold: Timestamp::from_unix_nanos(10),
            data_excluded_from_backup: true,
        };
        assert_eq!(classify(&excluded), Verdict::CompleteWithoutData);

        let not_excluded = ExportError::BeforeGcThreshold {
            threshold: Timestamp::from_unix_nanos(10),
            data_excluded_from_backup: false,
        };
        assert_eq!(classify(&not_excluded), Verdict::Fatal);
    }

    #[test]
    fn test_classify_unavailable() {
        let err = ExportError::Unavailable("node down".into());
        assert_eq!(classify(&err), Verdict::Fatal);
    }

    #[test]
    fn test_delay_before_retry() {
        let policy = RetryPolicy {
            delay_per_attempt: Duration::from_secs(5),
            priority_after: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_before_retry(None), Duration::ZERO);

        let just_tried = Instant::now();
        let remaining = policy.delay_before_retry(Some(just_tried));
        assert!(remaining > Duration::from_secs(4));
        assert!(remaining <= Duration::from_secs(5));
    }

    #[test]
    fn test_escalation_threshold() {
        let policy = RetryPolicy {
            delay_per_attempt: Duration::ZERO,
            priority_after: Duration::ZERO,
        };
        // An old read-as-of time escalates immediately.
        assert!(policy.should_escalate(Timestamp::from_unix_nanos(1)));

        let patient = RetryPolicy {
            delay_per_attempt: Duration::ZERO,
            priority_after: Duration::from_secs(3600),
        };
        assert!(!patient.should_escalate(Timestamp::now()));
    }
}
