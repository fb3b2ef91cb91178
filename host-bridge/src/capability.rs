//! Host Capability Interfaces
//!
//! One narrow trait per host interface the guest reaches through the
//! capability surface. Each trait carries exactly the members the surface
//! binds; adapters (see [`crate::platform`]) implement them for a concrete
//! target and are chosen when the [`crate::platform::Platform`] is composed.
//!
//! Methods that can fail on the host return `Result<_, HostException>`; the
//! surface routes those through the exception bridge.

use crate::closure::ClosureToken;
use crate::value::{HostException, HostValue, ObjectRef};

pub type HostResult<T> = Result<T, HostException>;

// ============================================================================
// CONSOLE / PERFORMANCE / CRYPTO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

pub trait Console: Send + Sync {
    fn message(&self, level: ConsoleLevel, text: &str);
}

pub trait Performance: Send + Sync {
    /// Milliseconds since the time origin
    fn now(&self) -> f64;
    fn mark(&self, name: &str);
    /// Record a measure from `start_mark` to now; unknown marks are an error
    fn measure(&self, name: &str, start_mark: &str) -> HostResult<f64>;
}

pub trait Crypto: Send + Sync {
    /// Largest buffer one `getRandomValues` call fills
    fn quota(&self) -> usize;

    fn get_random_values(&self, buf: &mut [u8]) -> HostResult<()>;

    /// `QuotaExceededError` for requests over [`Crypto::quota`]
    fn check_quota(&self, len: usize) -> HostResult<()> {
        if len > self.quota() {
            return Err(HostException::new(
                "QuotaExceededError",
                format!(
                    "The ArrayBufferView's byte length ({}) exceeds the number of bytes of entropy available via this API ({})",
                    len,
                    self.quota()
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// WINDOW / DOCUMENT / ELEMENTS
// ============================================================================

pub trait Window: Send + Sync {
    fn document(&self) -> Option<ObjectRef>;
    fn navigator(&self) -> ObjectRef;
    fn performance(&self) -> Option<ObjectRef>;
    fn crypto(&self) -> HostResult<ObjectRef>;
    fn inner_width(&self) -> HostResult<f64>;
    fn inner_height(&self) -> HostResult<f64>;
    fn device_pixel_ratio(&self) -> f64;
    fn is_secure_context(&self) -> bool;
    fn match_media(&self, query: &str) -> HostResult<Option<ObjectRef>>;
}

pub trait Navigator: Send + Sync {
    fn gpu(&self) -> Option<ObjectRef>;
    fn user_agent(&self) -> String;
}

pub trait Document: Send + Sync {
    fn body(&self) -> Option<ObjectRef>;
    fn create_element(&self, tag: &str) -> HostResult<ObjectRef>;
    fn query_selector(&self, selector: &str) -> HostResult<Option<ObjectRef>>;
    fn fullscreen_element(&self) -> Option<ObjectRef>;
    fn exit_fullscreen(&self);
    fn pointer_lock_element(&self) -> Option<ObjectRef>;
    fn exit_pointer_lock(&self);
}

/// Geometry returned by `getBoundingClientRect`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DomRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub trait Element: Send + Sync {
    fn tag_name(&self) -> String;
    fn id(&self) -> String;
    fn parent_element(&self) -> Option<ObjectRef>;
    /// `this` is the handle the guest called through; adapters record it as
    /// the child's parent.
    fn append_child(&self, this: &ObjectRef, child: &ObjectRef) -> HostResult<()>;
    fn set_attribute(&self, name: &str, value: &str) -> HostResult<()>;
    fn get_attribute(&self, name: &str) -> Option<String>;
    fn bounding_client_rect(&self) -> DomRect;
    fn style(&self) -> ObjectRef;
    fn request_fullscreen(&self, this: &ObjectRef) -> HostResult<()>;
    fn request_pointer_lock(&self, this: &ObjectRef);
    fn set_pointer_capture(&self, pointer_id: i32) -> HostResult<()>;
}

pub trait CssStyle: Send + Sync {
    fn set_property(&self, name: &str, value: &str) -> HostResult<()>;
    fn get_property_value(&self, name: &str) -> String;
}

pub trait Canvas: Send + Sync {
    fn width(&self) -> u32;
    fn set_width(&self, width: u32);
    fn height(&self) -> u32;
    fn set_height(&self, height: u32);
    fn get_context(&self, kind: &str) -> HostResult<Option<ObjectRef>>;
}

pub trait MediaQueryList: Send + Sync {
    fn media(&self) -> String;
    fn matches(&self) -> bool;
    fn add_listener(&self, listener: ObjectRef) -> HostResult<()>;
    fn remove_listener(&self, listener: &ObjectRef) -> HostResult<()>;
    fn listeners(&self) -> Vec<ObjectRef>;
}

// ============================================================================
// EVENTS
// ============================================================================

/// Options accepted by `addEventListener`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

impl ListenerOptions {
    /// Decode the third `addEventListener` argument (boolean or option bag)
    pub fn from_value(value: &HostValue) -> Self {
        match value {
            HostValue::Bool(capture) => Self {
                capture: *capture,
                ..Self::default()
            },
            HostValue::Object(_) => Self {
                capture: value.property("capture").is_some_and(|v| v.truthy()),
                once: value.property("once").is_some_and(|v| v.truthy()),
                passive: value.property("passive").is_some_and(|v| v.truthy()),
            },
            _ => Self::default(),
        }
    }
}

/// Listener registry of an event target.
///
/// Registered listeners are held by [`ClosureToken`]; every token that
/// leaves the registry must be handed to `closure::release`.
pub trait EventTarget: Send + Sync {
    /// Register a listener. A duplicate registration hands its token back.
    fn add_event_listener(
        &self,
        event_type: &str,
        listener: ClosureToken,
        options: ListenerOptions,
    ) -> Option<ClosureToken>;
    /// Unregister a listener and return the token that held it
    fn remove_event_listener(
        &self,
        event_type: &str,
        listener: &ObjectRef,
        capture: bool,
    ) -> Option<ClosureToken>;
    /// Listeners to run for one dispatch. `once` listeners are removed and
    /// come with their token.
    fn take_listeners(&self, event_type: &str) -> Vec<(ObjectRef, Option<ClosureToken>)>;
    fn listener_count(&self, event_type: &str) -> usize;
}

pub trait Event: Send + Sync {
    fn event_type(&self) -> String;
    fn target(&self) -> Option<ObjectRef>;
    fn set_target(&self, target: ObjectRef);
    fn prevent_default(&self);
    fn default_prevented(&self) -> bool;
    fn stop_propagation(&self);
    fn cancel_bubble(&self) -> bool;
}

pub trait ModifierState: Send + Sync {
    fn alt_key(&self) -> bool;
    fn ctrl_key(&self) -> bool;
    fn shift_key(&self) -> bool;
    fn meta_key(&self) -> bool;
    fn get_modifier_state(&self, key: &str) -> bool;
}

pub trait KeyboardEvent: Send + Sync {
    fn key(&self) -> String;
    fn code(&self) -> String;
    fn key_code(&self) -> u32;
    fn char_code(&self) -> u32;
    fn repeat(&self) -> bool;
}

pub trait MouseEvent: Send + Sync {
    fn client_x(&self) -> i32;
    fn client_y(&self) -> i32;
    fn offset_x(&self) -> i32;
    fn offset_y(&self) -> i32;
    fn movement_x(&self) -> i32;
    fn movement_y(&self) -> i32;
    fn button(&self) -> i16;
    fn buttons(&self) -> u16;
}

pub trait PointerEvent: Send + Sync {
    fn pointer_id(&self) -> i32;
    fn pointer_type(&self) -> String;
    fn pressure(&self) -> f32;
}

pub trait WheelEvent: Send + Sync {
    fn delta_x(&self) -> f64;
    fn delta_y(&self) -> f64;
    fn delta_mode(&self) -> u32;
}

// ============================================================================
// AUDIO
// ============================================================================

pub trait AudioContext: Send + Sync {
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> f32;
    fn state(&self) -> String;
    fn destination(&self) -> ObjectRef;
    fn create_buffer(&self, channels: u32, length: u32, sample_rate: f32)
        -> HostResult<ObjectRef>;
    fn create_buffer_source(&self) -> HostResult<ObjectRef>;
    fn resume(&self) -> HostResult<()>;
    fn close(&self) -> HostResult<()>;
}

pub trait AudioNode: Send + Sync {
    fn connect(&self, destination: &ObjectRef) -> HostResult<()>;
    fn channel_count(&self) -> u32;
    fn set_channel_count(&self, count: u32) -> HostResult<()>;
    fn max_channel_count(&self) -> u32;
}

pub trait AudioBuffer: Send + Sync {
    fn number_of_channels(&self) -> u32;
    fn length(&self) -> u32;
    fn sample_rate(&self) -> f32;
    fn copy_to_channel(&self, source: &[f32], channel: u32) -> HostResult<()>;
    fn channel_data(&self, channel: u32) -> HostResult<Vec<f32>>;
}

pub trait AudioBufferSource: Send + Sync {
    fn buffer(&self) -> Option<ObjectRef>;
    fn set_buffer(&self, buffer: Option<ObjectRef>);
    fn onended(&self) -> Option<ObjectRef>;
    fn set_onended(&self, handler: Option<ObjectRef>);
    /// Start playback; returns the playback duration in seconds when a
    /// buffer is attached.
    fn start(&self, when: f64) -> HostResult<Option<f64>>;
}

// ============================================================================
// GPU
// ============================================================================

/// Buffer descriptor decoded from the guest's option bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuBufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: u32,
    pub mapped_at_creation: bool,
}

impl GpuBufferDescriptor {
    pub fn from_value(value: &HostValue) -> HostResult<Self> {
        let size = value
            .property("size")
            .and_then(|v| v.as_number())
            .ok_or_else(|| HostException::type_error("GPUBufferDescriptor.size is required"))?;
        let usage = value
            .property("usage")
            .and_then(|v| v.as_number())
            .ok_or_else(|| HostException::type_error("GPUBufferDescriptor.usage is required"))?;
        Ok(Self {
            label: value
                .property("label")
                .and_then(|v| v.as_str().map(str::to_string)),
            size: size as u64,
            usage: usage as u32,
            mapped_at_creation: value
                .property("mappedAtCreation")
                .is_some_and(|v| v.truthy()),
        })
    }
}

/// `GPUBufferUsage` flags the headless adapter enforces
pub mod buffer_usage {
    pub const MAP_READ: u32 = 0x0001;
    pub const MAP_WRITE: u32 = 0x0002;
    pub const COPY_SRC: u32 = 0x0004;
    pub const COPY_DST: u32 = 0x0008;
}

pub trait Gpu: Send + Sync {
    fn request_adapter(&self, options: &HostValue) -> Option<ObjectRef>;
}

pub trait GpuAdapter: Send + Sync {
    fn request_device(&self, descriptor: &HostValue) -> HostResult<ObjectRef>;
    fn limits(&self) -> ObjectRef;
}

pub trait GpuDevice: Send + Sync {
    fn queue(&self) -> ObjectRef;
    fn limits(&self) -> ObjectRef;
    fn create_buffer(&self, descriptor: &GpuBufferDescriptor) -> HostResult<ObjectRef>;
    fn create_command_encoder(&self) -> ObjectRef;
    fn push_error_scope(&self, filter: &str) -> HostResult<()>;
    /// Pop the innermost scope; `Ok(None)` when it captured no error
    fn pop_error_scope(&self) -> HostResult<Option<ObjectRef>>;
    fn destroy(&self);
}

pub trait GpuQueue: Send + Sync {
    fn write_buffer(&self, buffer: &ObjectRef, offset: u64, data: &[u8]);
    fn submit(&self, command_buffers: &[ObjectRef]);
}

pub trait GpuBuffer: Send + Sync {
    fn size(&self) -> u64;
    fn usage(&self) -> u32;
    fn map_async(&self, mode: u32, offset: u64, size: Option<u64>) -> HostResult<()>;
    fn mapped_range(&self, offset: u64, size: Option<u64>) -> HostResult<Vec<u8>>;
    fn unmap(&self);
    fn destroy(&self);
}

pub trait GpuCommandEncoder: Send + Sync {
    fn copy_buffer_to_buffer(
        &self,
        source: &ObjectRef,
        source_offset: u64,
        destination: &ObjectRef,
        destination_offset: u64,
        size: u64,
    );
    fn finish(&self) -> HostResult<ObjectRef>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PlainObject;

    #[test]
    fn test_listener_options_from_bool_and_bag() {
        assert!(ListenerOptions::from_value(&HostValue::Bool(true)).capture);
        assert_eq!(
            ListenerOptions::from_value(&HostValue::Undefined),
            ListenerOptions::default()
        );

        let bag = HostValue::object(PlainObject::new().with("once", true).with("passive", 1.0));
        let opts = ListenerOptions::from_value(&bag);
        assert!(opts.once);
        assert!(opts.passive);
        assert!(!opts.capture);
    }

    #[test]
    fn test_buffer_descriptor_requires_size() {
        let bag = HostValue::object(PlainObject::new().with("usage", 8.0));
        let err = GpuBufferDescriptor::from_value(&bag).unwrap_err();
        assert_eq!(err.name, "TypeError");

        let bag = HostValue::object(
            PlainObject::new()
                .with("size", 256.0)
                .with("usage", 9.0)
                .with("label", "staging"),
        );
        let desc = GpuBufferDescriptor::from_value(&bag).unwrap();
        assert_eq!(desc.size, 256);
        assert_eq!(desc.usage, buffer_usage::MAP_READ | buffer_usage::COPY_DST);
        assert_eq!(desc.label.as_deref(), Some("staging"));
    }
}
