//! Headless audio graph
//!
//! Nothing is rendered. The graph keeps enough state (connections, buffer
//! contents, playback scheduling) for a guest to set up and drive audio the
//! way it would in a browser.

use crate::capability::{
	AudioBuffer, AudioBufferSource, AudioContext, AudioNode, HostResult,
};
use crate::event_loop::VirtualClock;
use crate::value::{HostException, HostObject, HostValue, ObjectRef, WeakObjectRef};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

const MAX_CHANNELS: u32 = 32;
const MIN_SAMPLE_RATE: f32 = 3000.0;
const MAX_SAMPLE_RATE: f32 = 768000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
	Suspended,
	Running,
	Closed,
}

impl ContextState {
	fn as_str(self) -> &'static str {
		match self {
			Self::Suspended => "suspended",
			Self::Running => "running",
			Self::Closed => "closed",
		}
	}
}

/// Time base shared by a context and the nodes it creates
struct AudioClock {
	clock: VirtualClock,
	state: Mutex<(ContextState, f64, f64)>,
}

impl AudioClock {
	/// Seconds of audio time; frozen while suspended or closed
	fn current_time(&self) -> f64 {
		let (state, base, resumed_at) = *self.state.lock();
		match state {
			ContextState::Running => base + (self.clock.now() - resumed_at) / 1000.0,
			_ => base,
		}
	}

	fn transition(&self, next: ContextState) {
		let now = self.current_time();
		let mut state = self.state.lock();
		*state = (next, now, self.clock.now());
	}

	fn state(&self) -> ContextState {
		self.state.lock().0
	}
}

pub struct HeadlessAudioContext {
	time: Arc<AudioClock>,
	sample_rate: f32,
	destination: ObjectRef,
}

impl HeadlessAudioContext {
	pub fn create(clock: VirtualClock, sample_rate: f32) -> ObjectRef {
		let time = Arc::new(AudioClock {
			state: Mutex::new((ContextState::Suspended, 0.0, clock.now())),
			clock,
		});
		ObjectRef::new(HeadlessAudioContext {
			time,
			sample_rate,
			destination: ObjectRef::new(HeadlessAudioDestination {
				channel_count: Mutex::new(2),
			}),
		})
	}

	fn ensure_open(&self) -> HostResult<()> {
		if self.time.state() == ContextState::Closed {
			return Err(HostException::invalid_state("AudioContext is closed"));
		}
		Ok(())
	}
}

impl HostObject for HeadlessAudioContext {
	fn class_name(&self) -> &str {
		"AudioContext"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"currentTime" => Some(HostValue::Number(self.current_time())),
			"sampleRate" => Some(HostValue::Number(self.sample_rate as f64)),
			"state" => Some(HostValue::string(self.state())),
			_ => None,
		}
	}

	fn as_audio_context(&self) -> Option<&dyn AudioContext> {
		Some(self)
	}
}

impl AudioContext for HeadlessAudioContext {
	fn current_time(&self) -> f64 {
		self.time.current_time()
	}

	fn sample_rate(&self) -> f32 {
		self.sample_rate
	}

	fn state(&self) -> String {
		self.time.state().as_str().to_string()
	}

	fn destination(&self) -> ObjectRef {
		self.destination.clone()
	}

	fn create_buffer(&self, channels: u32, length: u32, sample_rate: f32) -> HostResult<ObjectRef> {
		if channels == 0 || channels > MAX_CHANNELS {
			return Err(HostException::not_supported(format!(
				"The number of channels provided ({}) is outside the range [1, {}].",
				channels, MAX_CHANNELS
			)));
		}
		if length == 0 {
			return Err(HostException::not_supported(
				"The number of frames provided (0) is less than or equal to the minimum bound (0).",
			));
		}
		if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
			return Err(HostException::not_supported(format!(
				"The sample rate provided ({}) is outside the range [{}, {}].",
				sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
			)));
		}
		Ok(ObjectRef::new(HeadlessAudioBuffer {
			channels: (0..channels)
				.map(|_| Mutex::new(vec![0.0; length as usize]))
				.collect(),
			length,
			sample_rate,
		}))
	}

	fn create_buffer_source(&self) -> HostResult<ObjectRef> {
		self.ensure_open()?;
		Ok(ObjectRef::new(HeadlessAudioBufferSource {
			time: self.time.clone(),
			buffer: Mutex::new(None),
			onended: Mutex::new(None),
			started: Mutex::new(false),
			outputs: Mutex::new(Vec::new()),
		}))
	}

	fn resume(&self) -> HostResult<()> {
		self.ensure_open()?;
		if self.time.state() != ContextState::Running {
			self.time.transition(ContextState::Running);
			debug!("audio context running");
		}
		Ok(())
	}

	fn close(&self) -> HostResult<()> {
		self.ensure_open()?;
		self.time.transition(ContextState::Closed);
		debug!("audio context closed");
		Ok(())
	}
}

/// `AudioDestinationNode` (stereo output)
pub struct HeadlessAudioDestination {
	channel_count: Mutex<u32>,
}

const DESTINATION_MAX_CHANNELS: u32 = 2;

impl HostObject for HeadlessAudioDestination {
	fn class_name(&self) -> &str {
		"AudioDestinationNode"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_audio_node(&self) -> Option<&dyn AudioNode> {
		Some(self)
	}
}

impl AudioNode for HeadlessAudioDestination {
	fn connect(&self, _destination: &ObjectRef) -> HostResult<()> {
		Err(HostException::new(
			"IndexSizeError",
			"output index (0) exceeds number of outputs (0).",
		))
	}

	fn channel_count(&self) -> u32 {
		*self.channel_count.lock()
	}

	fn set_channel_count(&self, count: u32) -> HostResult<()> {
		if count == 0 || count > DESTINATION_MAX_CHANNELS {
			return Err(HostException::new(
				"IndexSizeError",
				format!(
					"The channel count provided ({}) is outside the range [1, {}].",
					count, DESTINATION_MAX_CHANNELS
				),
			));
		}
		*self.channel_count.lock() = count;
		Ok(())
	}

	fn max_channel_count(&self) -> u32 {
		DESTINATION_MAX_CHANNELS
	}
}

pub struct HeadlessAudioBuffer {
	channels: Vec<Mutex<Vec<f32>>>,
	length: u32,
	sample_rate: f32,
}

impl HeadlessAudioBuffer {
	/// Playback length in seconds
	pub fn duration(&self) -> f64 {
		self.length as f64 / self.sample_rate as f64
	}

	fn channel(&self, channel: u32) -> HostResult<&Mutex<Vec<f32>>> {
		self.channels.get(channel as usize).ok_or_else(|| {
			HostException::new(
				"IndexSizeError",
				format!(
					"The channel number provided ({}) is outside the range [0, {}].",
					channel,
					self.channels.len().saturating_sub(1)
				),
			)
		})
	}
}

impl HostObject for HeadlessAudioBuffer {
	fn class_name(&self) -> &str {
		"AudioBuffer"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"length" => Some(HostValue::Number(self.length as f64)),
			"duration" => Some(HostValue::Number(self.duration())),
			"numberOfChannels" => Some(HostValue::Number(self.channels.len() as f64)),
			_ => None,
		}
	}

	fn as_audio_buffer(&self) -> Option<&dyn AudioBuffer> {
		Some(self)
	}
}

impl AudioBuffer for HeadlessAudioBuffer {
	fn number_of_channels(&self) -> u32 {
		self.channels.len() as u32
	}

	fn length(&self) -> u32 {
		self.length
	}

	fn sample_rate(&self) -> f32 {
		self.sample_rate
	}

	fn copy_to_channel(&self, source: &[f32], channel: u32) -> HostResult<()> {
		let mut data = self.channel(channel)?.lock();
		let n = source.len().min(data.len());
		data[..n].copy_from_slice(&source[..n]);
		Ok(())
	}

	fn channel_data(&self, channel: u32) -> HostResult<Vec<f32>> {
		Ok(self.channel(channel)?.lock().clone())
	}
}

/// `AudioBufferSourceNode`
pub struct HeadlessAudioBufferSource {
	time: Arc<AudioClock>,
	buffer: Mutex<Option<ObjectRef>>,
	onended: Mutex<Option<ObjectRef>>,
	started: Mutex<bool>,
	outputs: Mutex<Vec<WeakObjectRef>>,
}

impl HeadlessAudioBufferSource {
	/// Nodes this source is connected to (still alive)
	pub fn outputs(&self) -> Vec<ObjectRef> {
		self.outputs
			.lock()
			.iter()
			.filter_map(WeakObjectRef::upgrade)
			.collect()
	}
}

impl HostObject for HeadlessAudioBufferSource {
	fn class_name(&self) -> &str {
		"AudioBufferSourceNode"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_audio_node(&self) -> Option<&dyn AudioNode> {
		Some(self)
	}

	fn as_audio_buffer_source(&self) -> Option<&dyn AudioBufferSource> {
		Some(self)
	}
}

impl AudioNode for HeadlessAudioBufferSource {
	fn connect(&self, destination: &ObjectRef) -> HostResult<()> {
		if destination.as_audio_node().is_none() {
			return Err(HostException::type_error(
				"Failed to execute 'connect' on 'AudioNode': parameter 1 is not of type 'AudioNode'.",
			));
		}
		self.outputs.lock().push(destination.downgrade());
		Ok(())
	}

	fn channel_count(&self) -> u32 {
		2
	}

	fn set_channel_count(&self, count: u32) -> HostResult<()> {
		if count == 0 || count > MAX_CHANNELS {
			return Err(HostException::not_supported(format!(
				"The channel count provided ({}) is outside the range [1, {}].",
				count, MAX_CHANNELS
			)));
		}
		Ok(())
	}

	fn max_channel_count(&self) -> u32 {
		MAX_CHANNELS
	}
}

impl AudioBufferSource for HeadlessAudioBufferSource {
	fn buffer(&self) -> Option<ObjectRef> {
		self.buffer.lock().clone()
	}

	fn set_buffer(&self, buffer: Option<ObjectRef>) {
		*self.buffer.lock() = buffer;
	}

	fn onended(&self) -> Option<ObjectRef> {
		self.onended.lock().clone()
	}

	fn set_onended(&self, handler: Option<ObjectRef>) {
		*self.onended.lock() = handler;
	}

	fn start(&self, when: f64) -> HostResult<Option<f64>> {
		if !when.is_finite() || when < 0.0 {
			return Err(HostException::range_error(format!(
				"The start time provided ({}) is less than the minimum bound (0).",
				when
			)));
		}
		let mut started = self.started.lock();
		if *started {
			return Err(HostException::invalid_state(
				"cannot call start more than once.",
			));
		}
		*started = true;

		let Some(buffer) = self.buffer.lock().clone() else {
			return Ok(None);
		};
		let duration = buffer
			.downcast_ref::<HeadlessAudioBuffer>()
			.map_or(0.0, HeadlessAudioBuffer::duration);
		let delay = (when - self.time.current_time()).max(0.0);
		Ok(Some(delay + duration))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn context() -> (VirtualClock, ObjectRef) {
		let clock = VirtualClock::new();
		let ctx = HeadlessAudioContext::create(clock.clone(), 44100.0);
		(clock, ctx)
	}

	#[test]
	fn test_current_time_runs_only_while_running() {
		let (clock, ctx_ref) = context();
		let ctx = ctx_ref.as_audio_context().unwrap();
		clock.advance_to(500.0);
		assert_eq!(ctx.current_time(), 0.0);
		assert_eq!(ctx.state(), "suspended");

		ctx.resume().unwrap();
		clock.advance_to(1500.0);
		assert!((ctx.current_time() - 1.0).abs() < 1e-9);

		ctx.close().unwrap();
		clock.advance_to(3000.0);
		assert!((ctx.current_time() - 1.0).abs() < 1e-9);
		assert_eq!(ctx.create_buffer_source().unwrap_err().name, "InvalidStateError");
	}

	#[test]
	fn test_buffer_validation_and_copy() {
		let (_, ctx_ref) = context();
		let ctx = ctx_ref.as_audio_context().unwrap();
		assert_eq!(ctx.create_buffer(0, 10, 44100.0).unwrap_err().name, "NotSupportedError");
		assert!(ctx.create_buffer(2, 10, 100.0).is_err());

		let buf_ref = ctx.create_buffer(2, 4, 44100.0).unwrap();
		let buf = buf_ref.as_audio_buffer().unwrap();
		buf.copy_to_channel(&[0.5, -0.5, 1.0, 0.0, 9.0], 1).unwrap();
		assert_eq!(buf.channel_data(1).unwrap(), vec![0.5, -0.5, 1.0, 0.0]);
		assert_eq!(buf.copy_to_channel(&[1.0], 2).unwrap_err().name, "IndexSizeError");
	}

	#[test]
	fn test_source_start_once_and_duration() {
		let (_, ctx_ref) = context();
		let ctx = ctx_ref.as_audio_context().unwrap();
		let src_ref = ctx.create_buffer_source().unwrap();
		let src = src_ref.as_audio_buffer_source().unwrap();
		src.set_buffer(Some(ctx.create_buffer(1, 22050, 44100.0).unwrap()));

		let duration = src.start(0.0).unwrap().unwrap();
		assert!((duration - 0.5).abs() < 1e-9);
		assert_eq!(src.start(0.0).unwrap_err().name, "InvalidStateError");
	}

	#[test]
	fn test_connect_and_channel_counts() {
		let (_, ctx_ref) = context();
		let ctx = ctx_ref.as_audio_context().unwrap();
		let dest = ctx.destination();
		let src_ref = ctx.create_buffer_source().unwrap();
		src_ref.as_audio_node().unwrap().connect(&dest).unwrap();
		assert_eq!(
			src_ref
				.downcast_ref::<HeadlessAudioBufferSource>()
				.unwrap()
				.outputs()
				.len(),
			1
		);

		let node = dest.as_audio_node().unwrap();
		assert_eq!(node.max_channel_count(), 2);
		node.set_channel_count(1).unwrap();
		assert_eq!(node.channel_count(), 1);
		assert!(node.set_channel_count(3).is_err());
		assert!(src_ref
			.as_audio_node()
			.unwrap()
			.connect(&ObjectRef::new(crate::value::PlainObject::new()))
			.is_err());
	}
}
