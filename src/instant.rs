use std::ops::{Add, Sub};
use std::time::Duration;

/// Wall-clock instant that works on both native and `wasm32` targets.
///
/// Stored as a [`Duration`] since the Unix epoch so it can be compared across
/// [`QueryClient`](crate::QueryClient) instances and round-tripped through a
/// [`PersistedStore`](crate::PersistedStore) as a plain millisecond integer
/// (see the `query_time_<key>` slot in the persistence layout).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(pub Duration);

impl Instant {
    /// The current time as a Unix timestamp.
    pub fn now() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "wasm")] {
                let duration = web_time::SystemTime::now()
                    .duration_since(web_time::SystemTime::UNIX_EPOCH)
                    .expect("system clock is before the Unix epoch");
                Instant(duration)
            } else {
                let duration = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .expect("system clock is before the Unix epoch");
                Instant(duration)
            }
        }
    }

    /// Construct from a millisecond Unix timestamp, as stored in the
    /// `query_time_<key>` persistence slot.
    pub fn from_millis(millis: u64) -> Self {
        Instant(Duration::from_millis(millis))
    }

    /// The millisecond Unix timestamp, as written to the `query_time_<key>`
    /// persistence slot.
    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    /// Time elapsed between `self` and `now`, saturating at zero if `self`
    /// is in the future.
    pub fn elapsed(&self) -> Duration {
        Instant::now().0.saturating_sub(self.0)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Instant) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        Instant(self.0 + rhs)
    }
}

impl std::fmt::Display for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_millis())
    }
}

impl std::fmt::Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instant").field(&self.0.as_millis()).finish()
    }
}

/// Returns the duration remaining until `updated_at + ttl` is in the past.
/// Zero if already elapsed. Mirrors the teacher's `util::time_until_stale`.
pub fn time_until_stale(updated_at: Instant, ttl: Duration) -> Duration {
    let age = updated_at.elapsed();
    ttl.saturating_sub(age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_until_stale_saturates_at_zero() {
        let old = Instant(Duration::from_secs(0));
        assert_eq!(
            time_until_stale(old, Duration::from_secs(1)),
            Duration::from_secs(0)
        );
    }

    #[test]
    fn fresh_entry_has_full_ttl_remaining() {
        let now = Instant::now();
        let remaining = time_until_stale(now, Duration::from_secs(60));
        assert!(remaining.as_secs() <= 60 && remaining.as_secs() >= 59);
    }
}
