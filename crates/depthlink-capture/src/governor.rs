use std::time::Duration;

use tracing::trace;

/// Default minimum spacing between admitted frames (10 fps).
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Admits captured frames no more often than a minimum interval.
///
/// Timestamps come from the capture source and are treated as monotonic. The
/// first frame is always admitted. A frame whose timestamp lies before the last
/// admitted one is refused; call [`reset`](Self::reset) if the source restarts
/// its clock.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    min_interval: Duration,
    last_admitted: Option<Duration>,
    admitted: u64,
    throttled: u64,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admitted: None,
            admitted: 0,
            throttled: 0,
        }
    }

    /// Decide whether the frame captured at `timestamp` may proceed.
    ///
    /// Admitting records `timestamp` as the new reference point.
    pub fn admit(&mut self, timestamp: Duration) -> bool {
        let allowed = match self.last_admitted {
            None => true,
            Some(last) => timestamp
                .checked_sub(last)
                .is_some_and(|elapsed| elapsed >= self.min_interval),
        };

        if allowed {
            self.last_admitted = Some(timestamp);
            self.admitted += 1;
        } else {
            self.throttled += 1;
            trace!(timestamp_ms = timestamp.as_millis() as u64, "frame throttled");
        }
        allowed
    }

    /// Forget the last admitted timestamp.
    pub fn reset(&mut self) {
        self.last_admitted = None;
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_admitted(&self) -> Option<Duration> {
        self.last_admitted
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    pub fn throttled(&self) -> u64 {
        self.throttled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn admits_at_most_once_per_interval() {
        let mut gov = RateGovernor::new(ms(100));
        let admitted: Vec<u64> = [0, 30, 60, 100, 250]
            .into_iter()
            .filter(|&t| gov.admit(ms(t)))
            .collect();
        assert_eq!(admitted, vec![0, 100, 250]);
        assert_eq!(gov.admitted(), 3);
        assert_eq!(gov.throttled(), 2);
    }

    #[test]
    fn first_frame_always_admitted() {
        let mut gov = RateGovernor::new(Duration::from_secs(3600));
        assert!(gov.admit(ms(123_456)));
        assert!(!gov.admit(ms(123_457)));
    }

    #[test]
    fn interval_measured_from_last_admitted() {
        let mut gov = RateGovernor::new(ms(100));
        assert!(gov.admit(ms(0)));
        assert!(!gov.admit(ms(99)));
        assert!(gov.admit(ms(100)));
        assert!(!gov.admit(ms(150)));
        assert!(gov.admit(ms(200)));
    }

    #[test]
    fn backwards_timestamp_refused_until_reset() {
        let mut gov = RateGovernor::new(ms(100));
        assert!(gov.admit(ms(1_000)));
        assert!(!gov.admit(ms(10)));
        assert_eq!(gov.last_admitted(), Some(ms(1_000)));

        gov.reset();
        assert!(gov.admit(ms(10)));
    }

    #[test]
    fn zero_interval_admits_everything() {
        let mut gov = RateGovernor::new(Duration::ZERO);
        assert!((0..5).all(|_| gov.admit(ms(7))));
    }
}
