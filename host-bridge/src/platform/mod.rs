//! Platform Adapters
//!
//! A [`Platform`] is the set of concrete host objects the capability surface
//! hands to the guest: the global window (and everything reachable from it)
//! and the console sink. It is chosen once, when the store is built.
//!
//! The only adapter set shipped here is headless: an in-process DOM, input
//! events, audio graph and GPU with just enough behaviour to drive a guest
//! without a browser. Embedders swap individual pieces with
//! [`Platform::with_console`] and [`Platform::with_window`].

mod console;
mod dom;
mod events;
mod gpu;
mod media;

pub use console::{CapturingConsole, HeadlessCrypto, HeadlessPerformance, TracingConsole};
pub use dom::{
	HeadlessDocument, HeadlessElement, HeadlessMediaQueryList, HeadlessNavigator, HeadlessStyle,
	HeadlessWindow, Listeners, NamedObject,
};
pub use events::{InputEvent, InputEventKind, Modifiers, MouseData};
pub use gpu::{
	DEFAULT_LIMITS as DEFAULT_GPU_LIMITS,
	GpuErrorObject, HeadlessGpu, HeadlessGpuAdapter, HeadlessGpuBuffer, HeadlessGpuCommandBuffer,
	HeadlessGpuCommandEncoder, HeadlessGpuDevice, HeadlessGpuQueue,
};
pub use media::{
	HeadlessAudioBuffer, HeadlessAudioBufferSource, HeadlessAudioContext, HeadlessAudioDestination,
};

use crate::capability::Console;
use crate::event_loop::VirtualClock;
use crate::value::ObjectRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Knobs for the headless adapter set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
	pub inner_width: f64,
	pub inner_height: f64,
	pub device_pixel_ratio: f64,
	pub user_agent: String,
	pub secure_context: bool,
	/// Expose `navigator.gpu`
	pub gpu: bool,
	pub audio_sample_rate: f32,
	/// Media queries that report `matches = true`
	pub matched_media: Vec<String>,
	/// Seed for `crypto.getRandomValues`; entropy from the OS when unset
	pub random_seed: Option<u64>,
}

impl Default for HeadlessConfig {
	fn default() -> Self {
		Self {
			inner_width: 1280.0,
			inner_height: 720.0,
			device_pixel_ratio: 1.0,
			user_agent: format!("guest-bridge/{} (headless)", env!("CARGO_PKG_VERSION")),
			secure_context: true,
			gpu: true,
			audio_sample_rate: 44100.0,
			matched_media: Vec::new(),
			random_seed: None,
		}
	}
}

/// Concrete adapters bound into one bridge context
#[derive(Clone)]
pub struct Platform {
	window: ObjectRef,
	console: Arc<dyn Console>,
	clock: VirtualClock,
	config: HeadlessConfig,
}

impl Platform {
	/// Compose the headless adapter set
	pub fn headless(config: HeadlessConfig) -> Self {
		let clock = VirtualClock::new();
		let window = HeadlessWindow::create(&config, clock.clone());
		Self {
			window,
			console: Arc::new(TracingConsole),
			clock,
			config,
		}
	}

	pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
		self.console = console;
		self
	}

	pub fn with_window(mut self, window: ObjectRef) -> Self {
		self.window = window;
		self
	}

	pub fn window(&self) -> &ObjectRef {
		&self.window
	}

	pub fn console(&self) -> &dyn Console {
		&*self.console
	}

	pub fn clock(&self) -> VirtualClock {
		self.clock.clone()
	}

	pub fn config(&self) -> &HeadlessConfig {
		&self.config
	}

	/// Audio contexts share the platform clock
	pub fn create_audio_context(&self) -> ObjectRef {
		HeadlessAudioContext::create(self.clock.clone(), self.config.audio_sample_rate)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_headless_config_from_json() {
		let config: HeadlessConfig =
			serde_json::from_str(r#"{ "inner_width": 800, "gpu": false }"#).unwrap();
		assert_eq!(config.inner_width, 800.0);
		assert!(!config.gpu);
		assert_eq!(config.inner_height, 720.0);
	}

	#[test]
	fn test_headless_window_surface() {
		let platform = Platform::headless(HeadlessConfig::default());
		let window = platform.window().as_window().unwrap();
		assert_eq!(window.inner_width().unwrap(), 1280.0);
		assert!(window.document().is_some());
		assert!(window.navigator().as_navigator().unwrap().gpu().is_some());

		let no_gpu = Platform::headless(HeadlessConfig {
			gpu: false,
			..HeadlessConfig::default()
		});
		let nav = no_gpu.window().as_window().unwrap().navigator();
		assert!(nav.as_navigator().unwrap().gpu().is_none());
	}

	#[test]
	fn test_console_can_be_swapped() {
		let capture = Arc::new(CapturingConsole::new());
		let platform = Platform::headless(HeadlessConfig::default()).with_console(capture.clone());
		platform
			.console()
			.message(crate::capability::ConsoleLevel::Warn, "careful");
		assert_eq!(capture.lines(), vec!["careful".to_string()]);
	}
}
