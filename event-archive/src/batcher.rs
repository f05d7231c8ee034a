//! Adaptive range batching
//!
//! A half-open interval `[start, end)` is walked in consecutive windows of at
//! most `max` span. A window whose fetch fails with a retryable error is
//! retried from the same cursor with half the span; once the span would drop
//! below `min` the run stops with [`ArchiveError::RangeExhausted`]. A window is
//! never skipped. Non-retryable errors stop the run unchanged.

use archive_common::{ArchiveError, IsRetryable, Result};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, error, warn};

/// A position on an ordered axis that can be walked in spans.
pub trait RangePoint: Copy + PartialOrd + Display + Send {
    type Span: Copy + PartialOrd + Display + Send;

    /// `self + span`, or `None` on overflow
    fn advance(self, span: Self::Span) -> Option<Self>;

    fn halve(span: Self::Span) -> Self::Span;

    /// Floor used when the caller gives none: a tenth of `max`
    fn default_min(max: Self::Span) -> Self::Span;

    fn is_empty_span(span: Self::Span) -> bool;
}

impl RangePoint for u64 {
    type Span = u64;

    fn advance(self, span: u64) -> Option<u64> {
        self.checked_add(span)
    }

    fn halve(span: u64) -> u64 {
        span / 2
    }

    fn default_min(max: u64) -> u64 {
        max / 10
    }

    fn is_empty_span(span: u64) -> bool {
        span == 0
    }
}

impl RangePoint for DateTime<Utc> {
    type Span = chrono::Duration;

    fn advance(self, span: chrono::Duration) -> Option<Self> {
        self.checked_add_signed(span)
    }

    fn halve(span: chrono::Duration) -> chrono::Duration {
        span / 2
    }

    fn default_min(max: chrono::Duration) -> chrono::Duration {
        max / 10
    }

    fn is_empty_span(span: chrono::Duration) -> bool {
        span <= chrono::Duration::zero()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RangeBatcher<P: RangePoint> {
    max: P::Span,
    min: P::Span,
}

impl<P: RangePoint> RangeBatcher<P> {
    pub fn new(max_batch_size: P::Span, min_batch_size: Option<P::Span>) -> Result<Self> {
        if P::is_empty_span(max_batch_size) {
            return Err(ArchiveError::InvalidRange(format!(
                "max batch size must be positive, got {}",
                max_batch_size
            )));
        }
        let min = min_batch_size.unwrap_or_else(|| P::default_min(max_batch_size));
        if min > max_batch_size {
            return Err(ArchiveError::InvalidRange(format!(
                "min batch size {} exceeds max batch size {}",
                min, max_batch_size
            )));
        }
        Ok(Self { max: max_batch_size, min })
    }

    pub fn max_batch_size(&self) -> P::Span {
        self.max
    }

    pub fn min_batch_size(&self) -> P::Span {
        self.min
    }

    /// Runs `fetch` over consecutive windows covering `[start, end)` and
    /// returns the results in window order.
    pub async fn apply<R, F, Fut>(&self, start: P, end: P, mut fetch: F) -> Result<Vec<R>>
    where
        F: FnMut(P, P) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if start >= end {
            return Err(ArchiveError::InvalidRange(format!(
                "start {} must be before end {}",
                start, end
            )));
        }

        let mut results = Vec::new();
        let mut cursor = start;
        let mut batch_size = self.max;

        while cursor < end {
            let batch_end = match cursor.advance(batch_size) {
                Some(next) if next < end => next,
                _ => end,
            };
            debug!(start = %cursor, end = %batch_end, "Fetching sub-range");

            match fetch(cursor, batch_end).await {
                Ok(result) => {
                    results.push(result);
                    cursor = batch_end;
                    batch_size = self.max;
                }
                Err(e) if e.is_retryable() => {
                    let smaller = P::halve(batch_size);
                    if P::is_empty_span(smaller) || smaller < self.min {
                        error!(cursor = %cursor, min = %self.min, "Sub-range failed at minimum batch size: {}", e);
                        return Err(ArchiveError::RangeExhausted {
                            cursor: cursor.to_string(),
                            min_batch_size: self.min.to_string(),
                            last_error: e.to_string(),
                        });
                    }
                    warn!(cursor = %cursor, batch_size = %smaller, "Sub-range failed, retrying smaller: {}", e);
                    batch_size = smaller;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }
}

/// One-shot form of [`RangeBatcher::apply`].
pub async fn apply_range<P, R, F, Fut>(
    fetch: F,
    start: P,
    end: P,
    max_batch_size: P::Span,
    min_batch_size: Option<P::Span>,
) -> Result<Vec<R>>
where
    P: RangePoint,
    F: FnMut(P, P) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    RangeBatcher::new(max_batch_size, min_batch_size)?
        .apply(start, end, fetch)
        .await
}
