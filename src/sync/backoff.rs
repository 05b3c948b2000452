use std::time::Duration;

use rand::Rng;

use crate::config::SyncConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
	base: Duration,
	max: Duration,
	jitter: f64,
	attempts: u32,
}

impl Backoff {
	pub fn new(base: Duration, max: Duration) -> Self {
		Self {
			base,
			max,
			jitter: 0.0,
			attempts: 0,
		}
	}

	pub fn from_config(config: &SyncConfig) -> Self {
		Self::new(
			Duration::from_millis(config.reconnect_base_ms),
			Duration::from_millis(config.reconnect_max_ms),
		)
		.with_jitter(config.reconnect_jitter)
	}

	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter.clamp(0.0, 1.0);
		self
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn reset(&mut self) {
		self.attempts = 0;
	}

	/// `min(base * 2^attempts, max)`, then bumps the attempt counter.
	pub fn next_delay(&mut self) -> Duration {
		let factor = 2u32.saturating_pow(self.attempts.min(31));
		let delay = self.base.saturating_mul(factor).min(self.max);
		self.attempts = self.attempts.saturating_add(1);

		if self.jitter > 0.0 {
			let spread = rand::rng().random_range(-self.jitter..=self.jitter);
			let jittered = delay.as_secs_f64() * (1.0 + spread);
			return Duration::from_secs_f64(jittered.max(0.0)).min(self.max);
		}
		delay
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exponential_growth() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
		assert_eq!(backoff.next_delay(), Duration::from_secs(1));
		assert_eq!(backoff.next_delay(), Duration::from_secs(2));
		assert_eq!(backoff.next_delay(), Duration::from_secs(4));
		assert_eq!(backoff.next_delay(), Duration::from_secs(8));
		assert_eq!(backoff.next_delay(), Duration::from_secs(16));
		assert_eq!(backoff.attempts(), 5);
	}

	#[test]
	fn test_capped_at_max() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
		for _ in 0..5 {
			backoff.next_delay();
		}
		assert_eq!(backoff.next_delay(), Duration::from_secs(30));
		for _ in 0..50 {
			assert_eq!(backoff.next_delay(), Duration::from_secs(30));
		}
	}

	#[test]
	fn test_reset() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
		backoff.next_delay();
		backoff.next_delay();
		backoff.reset();
		assert_eq!(backoff.attempts(), 0);
		assert_eq!(backoff.next_delay(), Duration::from_secs(1));
	}

	#[test]
	fn test_jitter_stays_in_bounds() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30)).with_jitter(0.2);
		for _ in 0..20 {
			backoff.reset();
			let delay = backoff.next_delay();
			assert!(delay >= Duration::from_millis(799) && delay <= Duration::from_millis(1201));
		}
	}
}
