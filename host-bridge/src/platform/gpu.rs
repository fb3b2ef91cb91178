//! Headless GPU
//!
//! A CPU-side model of the WebGPU objects the guest drives: buffers are byte
//! vectors, command encoders record copies and the queue replays them on
//! submit. Validation follows the WebGPU rules for the operations modelled;
//! failures are reported to the innermost matching error scope (or logged as
//! uncaptured) and the offending object becomes invalid, as on a real device.

use crate::capability::{
	buffer_usage, GpuAdapter, GpuBuffer, GpuBufferDescriptor, GpuCommandEncoder, GpuDevice,
	GpuQueue, Gpu, HostResult,
};
use crate::value::{HostException, HostObject, HostValue, ObjectRef, PlainObject};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// Limits reported by the headless adapter
pub const DEFAULT_LIMITS: &[(&str, f64)] = &[
	("maxTextureDimension1D", 8192.0),
	("maxTextureDimension2D", 8192.0),
	("maxTextureDimension3D", 2048.0),
	("maxTextureArrayLayers", 256.0),
	("maxBindGroups", 4.0),
	("maxBindingsPerBindGroup", 1000.0),
	("maxDynamicUniformBuffersPerPipelineLayout", 8.0),
	("maxDynamicStorageBuffersPerPipelineLayout", 4.0),
	("maxSampledTexturesPerShaderStage", 16.0),
	("maxSamplersPerShaderStage", 16.0),
	("maxStorageBuffersPerShaderStage", 8.0),
	("maxStorageTexturesPerShaderStage", 4.0),
	("maxUniformBuffersPerShaderStage", 12.0),
	("maxUniformBufferBindingSize", 65536.0),
	("maxStorageBufferBindingSize", 134217728.0),
	("maxVertexBuffers", 8.0),
	("maxVertexAttributes", 16.0),
	("maxVertexBufferArrayStride", 2048.0),
	("maxBufferSize", 268435456.0),
];

const MAP_MODE_READ: u32 = 0x0001;
const MAP_MODE_WRITE: u32 = 0x0002;

fn limits_object() -> ObjectRef {
	let limits = DEFAULT_LIMITS
		.iter()
		.fold(PlainObject::new(), |obj, (name, value)| obj.with(name, *value));
	ObjectRef::new(limits)
}

fn limit(limits: &ObjectRef, name: &str) -> f64 {
	limits.get(name).and_then(|v| v.as_number()).unwrap_or(0.0)
}

// ============================================================================
// ERRORS
// ============================================================================

/// `GPUValidationError` / `GPUOutOfMemoryError`
pub struct GpuErrorObject {
	class: &'static str,
	message: String,
}

impl GpuErrorObject {
	pub fn validation(message: impl Into<String>) -> Self {
		Self {
			class: "GPUValidationError",
			message: message.into(),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

impl HostObject for GpuErrorObject {
	fn class_name(&self) -> &str {
		self.class
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		(key == "message").then(|| HostValue::string(&self.message))
	}
}

/// Error scope stack shared by a device and everything created from it
#[derive(Default)]
struct ErrorSink {
	scopes: Mutex<Vec<(String, Option<ObjectRef>)>>,
}

impl ErrorSink {
	fn report_validation(&self, message: String) {
		let mut scopes = self.scopes.lock();
		match scopes.iter_mut().rev().find(|(filter, _)| filter == "validation") {
			Some((_, slot)) => {
				if slot.is_none() {
					*slot = Some(ObjectRef::new(GpuErrorObject::validation(message)));
				}
			}
			None => warn!("uncaptured GPU validation error: {}", message),
		}
	}
}

// ============================================================================
// GPU / ADAPTER / DEVICE
// ============================================================================

pub struct HeadlessGpu {
	adapter: ObjectRef,
}

impl HeadlessGpu {
	pub fn create() -> ObjectRef {
		ObjectRef::new(HeadlessGpu {
			adapter: ObjectRef::new(HeadlessGpuAdapter {
				limits: limits_object(),
			}),
		})
	}
}

impl HostObject for HeadlessGpu {
	fn class_name(&self) -> &str {
		"GPU"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_gpu(&self) -> Option<&dyn Gpu> {
		Some(self)
	}
}

impl Gpu for HeadlessGpu {
	fn request_adapter(&self, _options: &HostValue) -> Option<ObjectRef> {
		Some(self.adapter.clone())
	}
}

pub struct HeadlessGpuAdapter {
	limits: ObjectRef,
}

impl HostObject for HeadlessGpuAdapter {
	fn class_name(&self) -> &str {
		"GPUAdapter"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		(key == "limits").then(|| HostValue::Object(self.limits.clone()))
	}

	fn as_gpu_adapter(&self) -> Option<&dyn GpuAdapter> {
		Some(self)
	}
}

impl GpuAdapter for HeadlessGpuAdapter {
	fn request_device(&self, descriptor: &HostValue) -> HostResult<ObjectRef> {
		let required = descriptor
			.property("requiredLimits")
			.and_then(|v| v.as_object().cloned());
		let limits = PlainObject::new();
		for (name, value) in DEFAULT_LIMITS {
			let wanted = required
				.as_ref()
				.and_then(|r| r.get(name))
				.and_then(|v| v.as_number());
			if let Some(wanted) = wanted {
				let supported = limit(&self.limits, name);
				if wanted > supported {
					return Err(HostException::operation_error(format!(
						"Required limit {} ({}) exceeds the adapter limit ({})",
						name, wanted, supported
					)));
				}
			}
			limits.set(name, HostValue::Number(*value))?;
		}

		let sink = Arc::new(ErrorSink::default());
		debug!("headless GPU device created");
		Ok(ObjectRef::new(HeadlessGpuDevice {
			limits: ObjectRef::new(limits),
			queue: ObjectRef::new(HeadlessGpuQueue { sink: sink.clone() }),
			sink,
			lost: Mutex::new(false),
		}))
	}

	fn limits(&self) -> ObjectRef {
		self.limits.clone()
	}
}

pub struct HeadlessGpuDevice {
	limits: ObjectRef,
	queue: ObjectRef,
	sink: Arc<ErrorSink>,
	lost: Mutex<bool>,
}

impl HostObject for HeadlessGpuDevice {
	fn class_name(&self) -> &str {
		"GPUDevice"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"limits" => Some(HostValue::Object(self.limits.clone())),
			"queue" => Some(HostValue::Object(self.queue.clone())),
			_ => None,
		}
	}

	fn as_gpu_device(&self) -> Option<&dyn GpuDevice> {
		Some(self)
	}
}

impl GpuDevice for HeadlessGpuDevice {
	fn queue(&self) -> ObjectRef {
		self.queue.clone()
	}

	fn limits(&self) -> ObjectRef {
		self.limits.clone()
	}

	fn create_buffer(&self, desc: &GpuBufferDescriptor) -> HostResult<ObjectRef> {
		let max_size = limit(&self.limits, "maxBufferSize") as u64;
		let map_flags = buffer_usage::MAP_READ | buffer_usage::MAP_WRITE;
		let problem = if *self.lost.lock() {
			Some("device is lost".to_string())
		} else if desc.usage == 0 {
			Some("buffer usage must not be 0".to_string())
		} else if desc.size > max_size {
			Some(format!("buffer size {} exceeds maxBufferSize {}", desc.size, max_size))
		} else if desc.usage & buffer_usage::MAP_READ != 0
			&& desc.usage & !(buffer_usage::MAP_READ | buffer_usage::COPY_DST) != 0
		{
			Some("MAP_READ may only be combined with COPY_DST".to_string())
		} else if desc.usage & buffer_usage::MAP_WRITE != 0
			&& desc.usage & !(buffer_usage::MAP_WRITE | buffer_usage::COPY_SRC) != 0
		{
			Some("MAP_WRITE may only be combined with COPY_SRC".to_string())
		} else if desc.mapped_at_creation && desc.size % 4 != 0 {
			Some("mappedAtCreation requires a size that is a multiple of 4".to_string())
		} else {
			None
		};

		let valid = problem.is_none();
		if let Some(message) = problem {
			let label = desc.label.as_deref().unwrap_or("");
			self.sink
				.report_validation(format!("createBuffer('{}'): {}", label, message));
		}
		let size = if valid { desc.size } else { 0 };
		debug!("GPU buffer created: size={} usage={:#x} valid={}", desc.size, desc.usage, valid);
		Ok(ObjectRef::new(HeadlessGpuBuffer {
			size: desc.size,
			usage: desc.usage,
			valid,
			contents: Mutex::new(vec![0; size as usize]),
			map_state: Mutex::new(if desc.mapped_at_creation && valid {
				MapState::Mapped
			} else {
				MapState::Unmapped
			}),
			sink: self.sink.clone(),
			mappable: desc.usage & map_flags != 0,
		}))
	}

	fn create_command_encoder(&self) -> ObjectRef {
		ObjectRef::new(HeadlessGpuCommandEncoder {
			ops: Mutex::new(Some(Vec::new())),
			sink: self.sink.clone(),
		})
	}

	fn push_error_scope(&self, filter: &str) -> HostResult<()> {
		match filter {
			"validation" | "out-of-memory" | "internal" => {
				self.sink.scopes.lock().push((filter.to_string(), None));
				Ok(())
			}
			other => Err(HostException::type_error(format!(
				"The provided value '{}' is not a valid enum value of type GPUErrorFilter.",
				other
			))),
		}
	}

	fn pop_error_scope(&self) -> HostResult<Option<ObjectRef>> {
		self.sink
			.scopes
			.lock()
			.pop()
			.map(|(_, error)| error)
			.ok_or_else(|| HostException::operation_error("There are no error scopes on the stack."))
	}

	fn destroy(&self) {
		*self.lost.lock() = true;
	}
}

// ============================================================================
// QUEUE / BUFFERS / ENCODERS
// ============================================================================

pub struct HeadlessGpuQueue {
	sink: Arc<ErrorSink>,
}

impl HostObject for HeadlessGpuQueue {
	fn class_name(&self) -> &str {
		"GPUQueue"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_gpu_queue(&self) -> Option<&dyn GpuQueue> {
		Some(self)
	}
}

impl GpuQueue for HeadlessGpuQueue {
	fn write_buffer(&self, buffer: &ObjectRef, offset: u64, data: &[u8]) {
		let Some(target) = buffer.downcast_ref::<HeadlessGpuBuffer>() else {
			self.sink.report_validation("writeBuffer: target is not a GPUBuffer".to_string());
			return;
		};
		if let Err(message) = target.write(offset, data) {
			self.sink.report_validation(format!("writeBuffer: {}", message));
		}
	}

	fn submit(&self, command_buffers: &[ObjectRef]) {
		for cb in command_buffers {
			let Some(cb) = cb.downcast_ref::<HeadlessGpuCommandBuffer>() else {
				self.sink.report_validation("submit: not a GPUCommandBuffer".to_string());
				continue;
			};
			let ops = std::mem::take(&mut *cb.ops.lock());
			for op in ops {
				if let Err(message) = op.execute() {
					self.sink.report_validation(format!("copyBufferToBuffer: {}", message));
				}
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
	Unmapped,
	Mapped,
	Destroyed,
}

pub struct HeadlessGpuBuffer {
	size: u64,
	usage: u32,
	valid: bool,
	mappable: bool,
	contents: Mutex<Vec<u8>>,
	map_state: Mutex<MapState>,
	sink: Arc<ErrorSink>,
}

impl HeadlessGpuBuffer {
	fn check_range(&self, offset: u64, len: u64) -> Result<(), String> {
		if !self.valid {
			return Err("buffer is invalid".to_string());
		}
		if *self.map_state.lock() == MapState::Destroyed {
			return Err("buffer is destroyed".to_string());
		}
		match offset.checked_add(len) {
			Some(end) if end <= self.size => Ok(()),
			_ => Err(format!(
				"range {}+{} exceeds buffer size {}",
				offset, len, self.size
			)),
		}
	}

	fn write(&self, offset: u64, data: &[u8]) -> Result<(), String> {
		if self.usage & buffer_usage::COPY_DST == 0 {
			return Err("buffer usage lacks COPY_DST".to_string());
		}
		if offset % 4 != 0 || data.len() % 4 != 0 {
			return Err("offset and size must be multiples of 4".to_string());
		}
		self.check_range(offset, data.len() as u64)?;
		let start = offset as usize;
		self.contents.lock()[start..start + data.len()].copy_from_slice(data);
		Ok(())
	}

	fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, String> {
		self.check_range(offset, len)?;
		let start = offset as usize;
		Ok(self.contents.lock()[start..start + len as usize].to_vec())
	}
}

impl HostObject for HeadlessGpuBuffer {
	fn class_name(&self) -> &str {
		"GPUBuffer"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"size" => Some(HostValue::Number(self.size as f64)),
			"usage" => Some(HostValue::Number(self.usage as f64)),
			_ => None,
		}
	}

	fn as_gpu_buffer(&self) -> Option<&dyn GpuBuffer> {
		Some(self)
	}
}

impl GpuBuffer for HeadlessGpuBuffer {
	fn size(&self) -> u64 {
		self.size
	}

	fn usage(&self) -> u32 {
		self.usage
	}

	fn map_async(&self, mode: u32, offset: u64, size: Option<u64>) -> HostResult<()> {
		let len = size.unwrap_or(self.size.saturating_sub(offset));
		let wanted = match mode {
			MAP_MODE_READ => buffer_usage::MAP_READ,
			MAP_MODE_WRITE => buffer_usage::MAP_WRITE,
			_ => 0,
		};
		let problem = if !self.mappable || wanted == 0 || self.usage & wanted == 0 {
			Some(format!("map mode {:#x} not allowed for usage {:#x}", mode, self.usage))
		} else if *self.map_state.lock() != MapState::Unmapped {
			Some("buffer is already mapped or destroyed".to_string())
		} else {
			self.check_range(offset, len).err()
		};
		if let Some(message) = problem {
			self.sink.report_validation(format!("mapAsync: {}", message));
			return Err(HostException::operation_error(format!("mapAsync failed: {}", message)));
		}
		*self.map_state.lock() = MapState::Mapped;
		Ok(())
	}

	fn mapped_range(&self, offset: u64, size: Option<u64>) -> HostResult<Vec<u8>> {
		if *self.map_state.lock() != MapState::Mapped {
			return Err(HostException::operation_error("buffer is not mapped"));
		}
		let len = size.unwrap_or(self.size.saturating_sub(offset));
		self.read(offset, len).map_err(HostException::operation_error)
	}

	fn unmap(&self) {
		let mut state = self.map_state.lock();
		if *state == MapState::Mapped {
			*state = MapState::Unmapped;
		}
	}

	fn destroy(&self) {
		*self.map_state.lock() = MapState::Destroyed;
	}
}

struct CopyOp {
	source: ObjectRef,
	source_offset: u64,
	destination: ObjectRef,
	destination_offset: u64,
	size: u64,
}

impl CopyOp {
	fn execute(&self) -> Result<(), String> {
		let (Some(src), Some(dst)) = (
			self.source.downcast_ref::<HeadlessGpuBuffer>(),
			self.destination.downcast_ref::<HeadlessGpuBuffer>(),
		) else {
			return Err("operands must be GPUBuffers".to_string());
		};
		if src.usage & buffer_usage::COPY_SRC == 0 {
			return Err("source usage lacks COPY_SRC".to_string());
		}
		let data = src.read(self.source_offset, self.size)?;
		if dst.usage & buffer_usage::COPY_DST == 0 {
			return Err("destination usage lacks COPY_DST".to_string());
		}
		dst.check_range(self.destination_offset, self.size)?;
		let start = self.destination_offset as usize;
		dst.contents.lock()[start..start + data.len()].copy_from_slice(&data);
		Ok(())
	}
}

pub struct HeadlessGpuCommandEncoder {
	ops: Mutex<Option<Vec<CopyOp>>>,
	sink: Arc<ErrorSink>,
}

impl HostObject for HeadlessGpuCommandEncoder {
	fn class_name(&self) -> &str {
		"GPUCommandEncoder"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_gpu_command_encoder(&self) -> Option<&dyn GpuCommandEncoder> {
		Some(self)
	}
}

impl GpuCommandEncoder for HeadlessGpuCommandEncoder {
	fn copy_buffer_to_buffer(
		&self,
		source: &ObjectRef,
		source_offset: u64,
		destination: &ObjectRef,
		destination_offset: u64,
		size: u64,
	) {
		let mut ops = self.ops.lock();
		let Some(ops) = ops.as_mut() else {
			self.sink
				.report_validation("copyBufferToBuffer: encoder already finished".to_string());
			return;
		};
		if size % 4 != 0 || source_offset % 4 != 0 || destination_offset % 4 != 0 {
			self.sink.report_validation(
				"copyBufferToBuffer: offsets and size must be multiples of 4".to_string(),
			);
			return;
		}
		ops.push(CopyOp {
			source: source.clone(),
			source_offset,
			destination: destination.clone(),
			destination_offset,
			size,
		});
	}

	fn finish(&self) -> HostResult<ObjectRef> {
		let ops = self.ops.lock().take();
		if ops.is_none() {
			self.sink
				.report_validation("finish: encoder already finished".to_string());
		}
		Ok(ObjectRef::new(HeadlessGpuCommandBuffer {
			ops: Mutex::new(ops.unwrap_or_default()),
		}))
	}
}

pub struct HeadlessGpuCommandBuffer {
	ops: Mutex<Vec<CopyOp>>,
}

impl HostObject for HeadlessGpuCommandBuffer {
	fn class_name(&self) -> &str {
		"GPUCommandBuffer"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capability::buffer_usage::{COPY_DST, COPY_SRC, MAP_READ};

	fn device() -> ObjectRef {
		let gpu = HeadlessGpu::create();
		let adapter = gpu.as_gpu().unwrap().request_adapter(&HostValue::Undefined).unwrap();
		adapter
			.as_gpu_adapter()
			.unwrap()
			.request_device(&HostValue::Undefined)
			.unwrap()
	}

	fn desc(size: u64, usage: u32) -> GpuBufferDescriptor {
		GpuBufferDescriptor {
			size,
			usage,
			..GpuBufferDescriptor::default()
		}
	}

	#[test]
	fn test_required_limits_are_checked() {
		let gpu = HeadlessGpu::create();
		let adapter = gpu.as_gpu().unwrap().request_adapter(&HostValue::Undefined).unwrap();
		let too_much = HostValue::object(PlainObject::new().with(
			"requiredLimits",
			ObjectRef::new(PlainObject::new().with("maxBindGroups", 64.0)),
		));
		let err = adapter.as_gpu_adapter().unwrap().request_device(&too_much).unwrap_err();
		assert_eq!(err.name, "OperationError");
	}

	#[test]
	fn test_error_scope_captures_validation_error() {
		let dev_ref = device();
		let dev = dev_ref.as_gpu_device().unwrap();
		dev.push_error_scope("validation").unwrap();
		dev.create_buffer(&desc(16, MAP_READ | COPY_SRC)).unwrap();
		let error = dev.pop_error_scope().unwrap().unwrap();
		assert_eq!(error.class_name(), "GPUValidationError");
		assert!(error
			.downcast_ref::<GpuErrorObject>()
			.unwrap()
			.message()
			.contains("MAP_READ"));

		dev.push_error_scope("validation").unwrap();
		dev.create_buffer(&desc(16, COPY_DST)).unwrap();
		assert!(dev.pop_error_scope().unwrap().is_none());
		assert_eq!(dev.pop_error_scope().unwrap_err().name, "OperationError");
		assert_eq!(dev.push_error_scope("bogus").unwrap_err().name, "TypeError");
	}

	#[test]
	fn test_write_copy_map_read() {
		let dev_ref = device();
		let dev = dev_ref.as_gpu_device().unwrap();
		let upload = dev.create_buffer(&desc(8, COPY_SRC | COPY_DST)).unwrap();
		let readback = dev.create_buffer(&desc(8, MAP_READ | COPY_DST)).unwrap();

		let queue_ref = dev.queue();
		let queue = queue_ref.as_gpu_queue().unwrap();
		queue.write_buffer(&upload, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

		let enc_ref = dev.create_command_encoder();
		let enc = enc_ref.as_gpu_command_encoder().unwrap();
		enc.copy_buffer_to_buffer(&upload, 4, &readback, 0, 4);
		let cb = enc.finish().unwrap();
		queue.submit(&[cb]);

		let rb = readback.as_gpu_buffer().unwrap();
		assert!(rb.mapped_range(0, None).is_err());
		rb.map_async(MAP_MODE_READ, 0, None).unwrap();
		assert_eq!(rb.mapped_range(0, Some(4)).unwrap(), vec![5, 6, 7, 8]);
		assert_eq!(rb.map_async(MAP_MODE_READ, 0, None).unwrap_err().name, "OperationError");
		rb.unmap();
		rb.destroy();
		assert!(rb.map_async(MAP_MODE_READ, 0, None).is_err());
	}
}
