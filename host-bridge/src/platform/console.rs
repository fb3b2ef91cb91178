//! Console, performance and crypto adapters

use crate::capability::{Console, ConsoleLevel, Crypto, HostResult, Performance};
use crate::event_loop::VirtualClock;
use crate::value::{HostException, HostObject, HostValue};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::any::Any;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Largest buffer `getRandomValues` fills in one call
pub const RANDOM_VALUES_QUOTA: usize = 65536;

/// Forwards guest console output to `tracing` under `guest::console`
pub struct TracingConsole;

impl Console for TracingConsole {
	fn message(&self, level: ConsoleLevel, text: &str) {
		match level {
			ConsoleLevel::Log => info!(target: "guest::console", "{}", text),
			ConsoleLevel::Warn => warn!(target: "guest::console", "{}", text),
			ConsoleLevel::Error => error!(target: "guest::console", "{}", text),
		}
	}
}

/// Records every message (and still forwards it to `tracing`)
#[derive(Default)]
pub struct CapturingConsole {
	entries: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl CapturingConsole {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> Vec<(ConsoleLevel, String)> {
		self.entries.lock().clone()
	}

	pub fn lines(&self) -> Vec<String> {
		self.entries.lock().iter().map(|(_, line)| line.clone()).collect()
	}
}

impl Console for CapturingConsole {
	fn message(&self, level: ConsoleLevel, text: &str) {
		TracingConsole.message(level, text);
		self.entries.lock().push((level, text.to_string()));
	}
}

/// `performance` backed by the virtual clock
pub struct HeadlessPerformance {
	clock: VirtualClock,
	marks: Mutex<HashMap<String, f64>>,
}

impl HeadlessPerformance {
	pub fn new(clock: VirtualClock) -> Self {
		Self {
			clock,
			marks: Mutex::new(HashMap::new()),
		}
	}
}

impl HostObject for HeadlessPerformance {
	fn class_name(&self) -> &str {
		"Performance"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_performance(&self) -> Option<&dyn Performance> {
		Some(self)
	}
}

impl Performance for HeadlessPerformance {
	fn now(&self) -> f64 {
		self.clock.now()
	}

	fn mark(&self, name: &str) {
		self.marks.lock().insert(name.to_string(), self.clock.now());
	}

	fn measure(&self, name: &str, start_mark: &str) -> HostResult<f64> {
		let start = self.marks.lock().get(start_mark).copied().ok_or_else(|| {
			HostException::new(
				"SyntaxError",
				format!("The mark '{}' does not exist.", start_mark),
			)
		})?;
		let duration = self.clock.now() - start;
		tracing::debug!("measure {}: {}ms", name, duration);
		Ok(duration)
	}
}

/// `crypto` with an optional deterministic seed
pub struct HeadlessCrypto {
	rng: Mutex<StdRng>,
}

impl HeadlessCrypto {
	pub fn new(seed: Option<u64>) -> Self {
		let rng = match seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Self {
			rng: Mutex::new(rng),
		}
	}
}

impl HostObject for HeadlessCrypto {
	fn class_name(&self) -> &str {
		"Crypto"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		// feature checks done by guest glue (`crypto.getRandomValues`)
		(key == "getRandomValues").then_some(HostValue::Bool(true))
	}

	fn as_crypto(&self) -> Option<&dyn Crypto> {
		Some(self)
	}
}

impl Crypto for HeadlessCrypto {
	fn quota(&self) -> usize {
		RANDOM_VALUES_QUOTA
	}

	fn get_random_values(&self, buf: &mut [u8]) -> HostResult<()> {
		self.check_quota(buf.len())?;
		self.rng.lock().fill_bytes(buf);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_measure_requires_known_mark() {
		let clock = VirtualClock::new();
		let perf = HeadlessPerformance::new(clock.clone());
		perf.mark("start");
		clock.advance_to(12.5);
		assert_eq!(perf.measure("frame", "start").unwrap(), 12.5);
		assert_eq!(perf.measure("frame", "missing").unwrap_err().name, "SyntaxError");
	}

	#[test]
	fn test_random_values_quota_and_seed() {
		let a = HeadlessCrypto::new(Some(7));
		let b = HeadlessCrypto::new(Some(7));
		let mut x = [0u8; 16];
		let mut y = [0u8; 16];
		a.get_random_values(&mut x).unwrap();
		b.get_random_values(&mut y).unwrap();
		assert_eq!(x, y);

		assert!(a.check_quota(RANDOM_VALUES_QUOTA).is_ok());
		assert!(a.check_quota(usize::MAX).is_err());
		let mut big = vec![0u8; RANDOM_VALUES_QUOTA + 1];
		assert_eq!(
			a.get_random_values(&mut big).unwrap_err().name,
			"QuotaExceededError"
		);
	}
}
