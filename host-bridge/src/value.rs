//! Host Value Model
//!
//! Everything the guest can refer to by handle is a [`HostValue`]. Scalars are
//! stored inline; everything else is an [`ObjectRef`], a shared pointer to a
//! [`HostObject`] compared by identity.
//!
//! Host objects expose narrow capability views (`as_window`, `as_event`, ...).
//! Thunks in the capability surface ask for exactly the view they need and
//! raise a `TypeError` when the receiver does not provide it.

use crate::capability::{
    AudioBuffer, AudioBufferSource, AudioContext, AudioNode, Canvas, Crypto, CssStyle,
    Document, Element, Event, EventTarget, Gpu, GpuAdapter, GpuBuffer, GpuCommandEncoder,
    GpuDevice, GpuQueue, KeyboardEvent, MediaQueryList, ModifierState, MouseEvent, Navigator,
    Performance, PointerEvent, WheelEvent, Window,
};
use crate::closure::GuestClosure;
use crate::event_loop::PromiseObject;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// A value living on the host side of the boundary
#[derive(Clone, Debug, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl HostValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn object(obj: impl HostObject + 'static) -> Self {
        Self::Object(ObjectRef::new(obj))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        self.as_object().is_some_and(|o| o.as_closure().is_some())
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(o) if o.as_closure().is_some() => "function",
            Self::Object(_) => "object",
        }
    }

    /// Truthiness used for option bags (`{ once: 1 }` counts as set)
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// Property key form of a value (`Reflect.get(obj, key)`)
    pub fn to_property_key(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            other => debug_string(other),
        }
    }

    /// Read a property when this value is an object
    pub fn property(&self, key: &str) -> Option<HostValue> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// Strict equality (`===`)
    pub fn strict_eq(&self, other: &HostValue) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// SameValue comparison (`Object.is`)
    pub fn same_value(&self, other: &HostValue) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a.to_bits() == b.to_bits()
                }
            }
            _ => self.strict_eq(other),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectRef> for HostValue {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<Option<ObjectRef>> for HostValue {
    fn from(o: Option<ObjectRef>) -> Self {
        o.map_or(Self::Null, Self::Object)
    }
}

/// A host object the guest can only reach by handle.
///
/// Every capability accessor defaults to `None`; adapters override the ones
/// for the interfaces they implement.
pub trait HostObject: Send + Sync {
    fn class_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Dynamic property read (`Reflect.get`)
    fn get(&self, _key: &str) -> Option<HostValue> {
        None
    }

    /// Dynamic property write (`Reflect.set`); `Ok(false)` when not writable
    fn set(&self, _key: &str, _value: HostValue) -> Result<bool, HostException> {
        Ok(false)
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn as_closure(&self) -> Option<&GuestClosure> {
        None
    }
    fn as_promise(&self) -> Option<&PromiseObject> {
        None
    }
    fn as_exception(&self) -> Option<&HostException> {
        None
    }
    fn as_array(&self) -> Option<&ArrayObject> {
        None
    }

    fn as_window(&self) -> Option<&dyn Window> {
        None
    }
    fn as_navigator(&self) -> Option<&dyn Navigator> {
        None
    }
    fn as_document(&self) -> Option<&dyn Document> {
        None
    }
    fn as_element(&self) -> Option<&dyn Element> {
        None
    }
    fn as_css_style(&self) -> Option<&dyn CssStyle> {
        None
    }
    fn as_canvas(&self) -> Option<&dyn Canvas> {
        None
    }
    fn as_media_query_list(&self) -> Option<&dyn MediaQueryList> {
        None
    }
    fn as_event_target(&self) -> Option<&dyn EventTarget> {
        None
    }
    fn as_event(&self) -> Option<&dyn Event> {
        None
    }
    fn as_keyboard_event(&self) -> Option<&dyn KeyboardEvent> {
        None
    }
    fn as_modifier_state(&self) -> Option<&dyn ModifierState> {
        None
    }
    fn as_mouse_event(&self) -> Option<&dyn MouseEvent> {
        None
    }
    fn as_pointer_event(&self) -> Option<&dyn PointerEvent> {
        None
    }
    fn as_wheel_event(&self) -> Option<&dyn WheelEvent> {
        None
    }
    fn as_performance(&self) -> Option<&dyn Performance> {
        None
    }
    fn as_crypto(&self) -> Option<&dyn Crypto> {
        None
    }
    fn as_audio_context(&self) -> Option<&dyn AudioContext> {
        None
    }
    fn as_audio_node(&self) -> Option<&dyn AudioNode> {
        None
    }
    fn as_audio_buffer(&self) -> Option<&dyn AudioBuffer> {
        None
    }
    fn as_audio_buffer_source(&self) -> Option<&dyn AudioBufferSource> {
        None
    }
    fn as_gpu(&self) -> Option<&dyn Gpu> {
        None
    }
    fn as_gpu_adapter(&self) -> Option<&dyn GpuAdapter> {
        None
    }
    fn as_gpu_device(&self) -> Option<&dyn GpuDevice> {
        None
    }
    fn as_gpu_queue(&self) -> Option<&dyn GpuQueue> {
        None
    }
    fn as_gpu_buffer(&self) -> Option<&dyn GpuBuffer> {
        None
    }
    fn as_gpu_command_encoder(&self) -> Option<&dyn GpuCommandEncoder> {
        None
    }
}

/// Shared, identity-compared pointer to a host object
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn HostObject>);

impl ObjectRef {
    pub fn new(obj: impl HostObject + 'static) -> Self {
        Self(Arc::new(obj))
    }

    pub fn from_arc(obj: Arc<dyn HostObject>) -> Self {
        Self(obj)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Downcast to a concrete adapter type
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Non-owning reference, used for back-pointers such as parent links
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }
}

#[derive(Clone)]
pub struct WeakObjectRef(Weak<dyn HostObject>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = dyn HostObject;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[object {}]", self.0.class_name())
    }
}

/// An exception raised by a host capability
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{name}: {message}")]
pub struct HostException {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl HostException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Plain `Error`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn operation_error(message: impl Into<String>) -> Self {
        Self::new("OperationError", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// `TypeError` for a receiver lacking the requested interface
    pub fn illegal_invocation(interface: &str, member: &str) -> Self {
        Self::type_error(format!(
            "'{}' called on an object that does not implement interface {}",
            member, interface
        ))
    }
}

impl HostObject for HostException {
    fn class_name(&self) -> &str {
        "Error"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, key: &str) -> Option<HostValue> {
        match key {
            "name" => Some(HostValue::string(&self.name)),
            "message" => Some(HostValue::string(&self.message)),
            "stack" => Some(
                self.stack
                    .as_ref()
                    .map_or(HostValue::Undefined, HostValue::string),
            ),
            _ => None,
        }
    }

    fn as_exception(&self) -> Option<&HostException> {
        Some(self)
    }
}

/// Property bag created by the guest (`{}`) to pass option dictionaries
#[derive(Default)]
pub struct PlainObject {
    props: Mutex<BTreeMap<String, HostValue>>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl Into<HostValue>) -> Self {
        self.props.lock().insert(key.to_string(), value.into());
        self
    }

    pub fn entries(&self) -> Vec<(String, HostValue)> {
        self.props
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl HostObject for PlainObject {
    fn class_name(&self) -> &str {
        "Object"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, key: &str) -> Option<HostValue> {
        self.props.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: HostValue) -> Result<bool, HostException> {
        self.props.lock().insert(key.to_string(), value);
        Ok(true)
    }
}

/// Growable array (`[]`) built by the guest or handed back by the host
#[derive(Default)]
pub struct ArrayObject {
    items: Mutex<Vec<HostValue>>,
}

impl ArrayObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<HostValue>) -> Self {
        Self {
            items: Mutex::new(values),
        }
    }

    pub fn push(&self, value: HostValue) -> u32 {
        let mut items = self.items.lock();
        items.push(value);
        items.len() as u32
    }

    pub fn len(&self) -> u32 {
        self.items.lock().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn get_index(&self, index: u32) -> Option<HostValue> {
        self.items.lock().get(index as usize).cloned()
    }

    pub fn to_vec(&self) -> Vec<HostValue> {
        self.items.lock().clone()
    }
}

impl HostObject for ArrayObject {
    fn class_name(&self) -> &str {
        "Array"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, key: &str) -> Option<HostValue> {
        if key == "length" {
            return Some(HostValue::Number(self.len() as f64));
        }
        key.parse::<u32>().ok().and_then(|i| self.get_index(i))
    }

    fn set(&self, key: &str, value: HostValue) -> Result<bool, HostException> {
        let Ok(index) = key.parse::<usize>() else {
            return Ok(false);
        };
        let mut items = self.items.lock();
        if index >= items.len() {
            items.resize(index + 1, HostValue::Undefined);
        }
        items[index] = value;
        Ok(true)
    }

    fn as_array(&self) -> Option<&ArrayObject> {
        Some(self)
    }
}

/// Number formatting compatible with the host's `String(n)`
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Human readable rendering of any host value for diagnostics
pub fn debug_string(value: &HostValue) -> String {
    match value {
        HostValue::Undefined => "undefined".to_string(),
        HostValue::Null => "null".to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Number(n) => format_number(*n),
        HostValue::String(s) => format!("\"{}\"", s),
        HostValue::Object(obj) => debug_object(obj),
    }
}

fn debug_object(obj: &ObjectRef) -> String {
    if let Some(closure) = obj.as_closure() {
        return format!("Function(closure#{})", closure.id());
    }
    if let Some(array) = obj.as_array() {
        let items: Vec<String> = array.to_vec().iter().map(debug_string).collect();
        return format!("[{}]", items.join(", "));
    }
    if let Some(exception) = obj.as_exception() {
        return format!(
            "{}: {}\n{}",
            exception.name,
            exception.message,
            exception.stack.as_deref().unwrap_or("")
        );
    }
    if obj.downcast_ref::<PlainObject>().is_some() {
        return match serde_json::to_string(&json_value(&HostValue::Object(obj.clone()), 0)) {
            Ok(json) => format!("Object({})", json),
            Err(_) => "Object".to_string(),
        };
    }
    obj.class_name().to_string()
}

// Nesting cap keeps cyclic property bags from recursing forever.
const JSON_DEPTH_LIMIT: usize = 16;

fn json_value(value: &HostValue, depth: usize) -> serde_json::Value {
    use serde_json::Value;
    if depth > JSON_DEPTH_LIMIT {
        return Value::Null;
    }
    match value {
        HostValue::Undefined | HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        HostValue::String(s) => Value::String(s.clone()),
        HostValue::Object(obj) => {
            if let Some(plain) = obj.downcast_ref::<PlainObject>() {
                let map = plain
                    .entries()
                    .into_iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k, json_value(&v, depth + 1)))
                    .collect();
                Value::Object(map)
            } else if let Some(array) = obj.as_array() {
                Value::Array(
                    array
                        .to_vec()
                        .iter()
                        .map(|v| json_value(v, depth + 1))
                        .collect(),
                )
            } else {
                Value::Object(serde_json::Map::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_string_primitives() {
        assert_eq!(debug_string(&HostValue::Undefined), "undefined");
        assert_eq!(debug_string(&HostValue::Null), "null");
        assert_eq!(debug_string(&HostValue::Bool(true)), "true");
        assert_eq!(debug_string(&HostValue::Number(42.0)), "42");
        assert_eq!(debug_string(&HostValue::Number(1.5)), "1.5");
        assert_eq!(debug_string(&HostValue::string("hi")), "\"hi\"");
    }

    #[test]
    fn test_debug_string_objects() {
        let array = ArrayObject::from_values(vec![HostValue::Number(1.0), HostValue::string("a")]);
        assert_eq!(debug_string(&HostValue::object(array)), "[1, \"a\"]");

        let plain = PlainObject::new().with("width", 640.0).with("label", "main");
        assert_eq!(
            debug_string(&HostValue::object(plain)),
            r#"Object({"label":"main","width":640.0})"#
        );

        let err = HostException::type_error("boom").with_stack("at guest");
        assert_eq!(debug_string(&HostValue::object(err)), "TypeError: boom\nat guest");
    }

    #[test]
    fn test_identity_and_equality() {
        let a = ObjectRef::new(PlainObject::new());
        let b = ObjectRef::new(PlainObject::new());
        assert!(HostValue::Object(a.clone()).strict_eq(&HostValue::Object(a.clone())));
        assert!(!HostValue::Object(a).strict_eq(&HostValue::Object(b)));

        let nan = HostValue::Number(f64::NAN);
        assert!(!nan.strict_eq(&nan));
        assert!(nan.same_value(&nan));
        assert!(!HostValue::Number(0.0).same_value(&HostValue::Number(-0.0)));
        assert!(HostValue::Number(0.0).strict_eq(&HostValue::Number(-0.0)));
    }

    #[test]
    fn test_array_properties() {
        let array = ArrayObject::new();
        array.push(HostValue::Bool(true));
        assert_eq!(array.get("length").and_then(|v| v.as_number()), Some(1.0));
        assert!(array.set("3", HostValue::Null).unwrap());
        assert_eq!(array.len(), 4);
        assert!(array.get_index(2).unwrap().is_undefined());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.25), "0.25");
    }
}
