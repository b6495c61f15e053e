use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for restarting discovery.
#[derive(Debug, Clone)]
pub struct Backoff {
	initial: Duration,
	max: Duration,
	current: Duration,
}

impl Backoff {
	pub fn new(initial: Duration, max: Duration) -> Self {
		Self {
			initial,
			max,
			current: initial,
		}
	}

	/// Delay before the next attempt; each call doubles the base delay up
	/// to the cap and adds up to a quarter of it as jitter.
	pub fn next_delay(&mut self) -> Duration {
		let base = self.current;
		self.current = (self.current * 2).min(self.max);

		let max_jitter = base.as_millis() as u64 / 4;
		let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter);
		base.saturating_add(Duration::from_millis(jitter_ms))
	}

	pub fn reset(&mut self) {
		self.current = self.initial;
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new(Duration::from_secs(1), Duration::from_secs(60))
	}
}
