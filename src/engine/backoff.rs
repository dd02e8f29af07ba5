//! Exponential backoff with jitter, generalized from this codebase's own
//! `calculate_retry_backoff` (crawl page retries) down to a fixed formula:
//! `min(base * 2^(attempt-1), cap) + uniform(0, base)`.

use std::time::Duration;

use rand::Rng;

#[must_use]
pub fn compute_backoff(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(cap_ms);
    let jitter = rand::rng().random_range(0..=base_ms);
    Duration::from_millis(capped.saturating_add(jitter).min(cap_ms.saturating_add(base_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_before_the_cap() {
        let first = compute_backoff(1, 1000, 30_000);
        let second = compute_backoff(2, 1000, 30_000);
        assert!(first.as_millis() >= 1000 && first.as_millis() <= 2000);
        assert!(second.as_millis() >= 2000 && second.as_millis() <= 3000);
    }

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter() {
        let delay = compute_backoff(10, 1000, 30_000);
        assert!(delay.as_millis() <= 31_000);
    }
}
