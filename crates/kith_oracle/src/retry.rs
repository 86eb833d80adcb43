//! Backoff policy for the completion endpoint.

use reqwest::StatusCode;
use std::time::Duration;

/// Attempts per completion request, including the first.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 1_000;
const DELAY_CAP_MS: u64 = 30_000;

/// Timeouts, rate limiting, and server-side failures are worth another
/// attempt. Anything else the request itself got wrong, so a retry would
/// only repeat the mistake.
pub(crate) fn retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429) || status.is_server_error()
}

/// Delay before retry `n` (zero-based): doubles up to the cap, plus
/// sub-second jitter so concurrent stages do not resend in lockstep. The
/// jitter comes off the clock, which is plenty for spreading requests.
pub(crate) fn backoff_delay(retry: u32) -> Duration {
    let base = BASE_DELAY_MS
        .saturating_mul(1u64 << retry.min(16))
        .min(DELAY_CAP_MS);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
        % 500;
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(retryable_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [400, 401, 403, 404, 422] {
            assert!(!retryable_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert!(backoff_delay(0) >= Duration::from_millis(1_000));
        assert!(backoff_delay(0) < Duration::from_millis(1_500));
        assert!(backoff_delay(1) >= Duration::from_millis(2_000));
        assert!(backoff_delay(12) <= Duration::from_millis(30_500));
        // Large shifts must not wrap.
        assert!(backoff_delay(u32::MAX) <= Duration::from_millis(30_500));
    }
}
