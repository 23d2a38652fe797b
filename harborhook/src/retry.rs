//! Pure retry-delay computation. No sleeping happens here — the worker hands
//! the computed duration to the broker's delayed requeue.

use rand::Rng;
use std::time::Duration;

/// Map an attempt count to a delay, per the configured schedule and jitter.
///
/// `attempt` is 1-indexed (the attempt that just failed). `schedule[0]`
/// covers attempt 1, the last entry covers every attempt beyond the
/// schedule's length. `jitter_pct` widens or narrows the delay by up to
/// `±jitter_pct` of the base value; the resulting factor is clamped to a
/// floor of `0.1` so a delay never collapses to zero.
pub fn delay(attempt: u32, schedule: &[Duration], jitter_pct: f64) -> Duration {
    delay_with_rng(attempt, schedule, jitter_pct, &mut rand::thread_rng())
}

fn delay_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    schedule: &[Duration],
    jitter_pct: f64,
    rng: &mut R,
) -> Duration {
    assert!(!schedule.is_empty(), "backoff schedule must not be empty");

    let idx = attempt.saturating_sub(1).min(schedule.len() as u32 - 1) as usize;
    let base = schedule[idx];

    let u: f64 = rng.gen_range(0.0..1.0);
    let mut factor = 1.0 + (u * 2.0 - 1.0) * jitter_pct;
    if factor < 0.1 {
        factor = 0.1;
    }

    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Vec<Duration> {
        vec![
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(16),
        ]
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let a = delay(1, &schedule(), 0.0);
        let b = delay(1, &schedule(), 0.0);
        assert_eq!(a, b);
        assert_eq!(a, Duration::from_secs(1));
    }

    #[test]
    fn attempt_zero_maps_to_first_entry() {
        assert_eq!(delay(0, &schedule(), 0.0), Duration::from_secs(1));
    }

    #[test]
    fn attempt_beyond_schedule_clamps_to_last_entry() {
        assert_eq!(delay(100, &schedule(), 0.0), Duration::from_secs(16));
    }

    #[test]
    fn jitter_stays_within_bounds_across_many_draws() {
        let base = Duration::from_secs(4);
        let sched = vec![base];
        for _ in 0..1000 {
            let d = delay(1, &sched, 0.25);
            assert!(d >= base.mul_f64(0.1));
            assert!(d <= base.mul_f64(1.25));
        }
    }
}
