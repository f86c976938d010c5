use rand::Rng;
use std::time::Duration;

const BASE: Duration = Duration::from_secs(5);
const FACTOR: u32 = 2;
const CAP: Duration = Duration::from_secs(5 * 60);
const JITTER_RATIO: f64 = 0.2;

/// Exponential backoff with decorrelated jitter, used to space out retries
/// of transient failures (Nimbus unreachable, a 5xx from the API server)
/// without the thundering-herd effect a fixed requeue interval produces
/// across many topologies failing at once.
///
/// `attempt` is 0-based: the first retry uses `attempt = 0`.
pub fn backoff(attempt: u32) -> Duration {
    let exp = FACTOR.saturating_pow(attempt.min(16));
    let raw = BASE.saturating_mul(exp).min(CAP);
    jitter(raw)
}

fn jitter(duration: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let ratio = rng.gen_range(-JITTER_RATIO..=JITTER_RATIO);
    let millis = duration.as_millis() as f64;
    let jittered = (millis * (1.0 + ratio)).max(0.0);
    Duration::from_millis(jittered as u64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grows_exponentially_and_caps() {
        for attempt in 0..6 {
            let d = backoff(attempt);
            let lower = BASE.saturating_mul(FACTOR.saturating_pow(attempt)).mul_f64(1.0 - JITTER_RATIO);
            let upper = CAP.mul_f64(1.0 + JITTER_RATIO);
            assert!(d <= upper, "attempt {attempt}: {d:?} exceeds cap-derived upper bound {upper:?}");
            assert!(
                d.as_millis() as i64 >= (lower.as_millis() as i64 - 1),
                "attempt {attempt}: {d:?} below expected lower bound {lower:?}"
            );
        }
    }

    #[test]
    fn never_exceeds_cap_even_at_high_attempt_counts() {
        let d = backoff(100);
        assert!(d <= CAP.mul_f64(1.0 + JITTER_RATIO));
    }
}
