use std::{
    cmp,
    ops::Div,
    time::Duration,
};

use rand::Rng;

/// Exponential backoff with full jitter, shared by every stage worker's
/// retry loop. See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial_backoff: Duration,
    max_backoff: Duration,
    num_failures: u32,
}

impl Backoff {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            num_failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.num_failures = 0;
    }

    /// Ensures that `fail` will return the `max_backoff` value the next time
    /// it is called.
    pub fn max_backoff(&mut self) {
        self.num_failures = u32::MAX.div(2);
    }

    pub fn fail(&mut self, rng: &mut impl Rng) -> Duration {
        let p = 2u32.checked_pow(self.num_failures).unwrap_or(u32::MAX);
        self.num_failures += 1;
        let jitter = rng.gen::<f32>();
        let backoff = self
            .initial_backoff
            .checked_mul(p)
            .unwrap_or(self.max_backoff);
        cmp::min(backoff, self.max_backoff).mul_f32(jitter)
    }

    pub fn failures(&self) -> u32 {
        self.num_failures
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::thread_rng;

    use super::Backoff;

    #[test]
    fn backoff_never_exceeds_max() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        let mut rng = thread_rng();
        for _ in 0..64 {
            let delay = backoff.fail(&mut rng);
            assert!(delay <= Duration::from_secs(1));
        }
        assert_eq!(backoff.failures(), 64);
    }

    #[test]
    fn reset_brings_failures_back_to_zero() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        let mut rng = thread_rng();
        backoff.fail(&mut rng);
        backoff.fail(&mut rng);
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn max_backoff_forces_the_ceiling_next_call() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(5));
        backoff.max_backoff();
        let mut rng = thread_rng();
        // Jitter still applies, but num_failures is so large that `p` saturates
        // to u32::MAX, so the raw backoff before jitter is always max_backoff.
        let delay = backoff.fail(&mut rng);
        assert!(delay <= Duration::from_secs(5));
    }
}
