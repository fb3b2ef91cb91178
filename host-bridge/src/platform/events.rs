//! Synthetic input events
//!
//! The headless platform never produces input by itself; the embedder (or a
//! test) builds an [`InputEvent`] and dispatches it with
//! [`crate::event_loop::dispatch_event`].

use crate::capability::{
	Event, KeyboardEvent, ModifierState, MouseEvent, PointerEvent, WheelEvent,
};
use crate::value::{HostObject, HostValue, ObjectRef, WeakObjectRef};
use parking_lot::Mutex;
use std::any::Any;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum InputEventKind {
	#[default]
	Plain,
	Keyboard {
		key: String,
		code: String,
		key_code: u32,
		char_code: u32,
		repeat: bool,
	},
	Mouse(MouseData),
	Pointer {
		mouse: MouseData,
		pointer_id: i32,
		pointer_type: String,
		pressure: f32,
	},
	Wheel {
		mouse: MouseData,
		delta_x: f64,
		delta_y: f64,
		delta_mode: u32,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MouseData {
	pub client_x: i32,
	pub client_y: i32,
	pub offset_x: i32,
	pub offset_y: i32,
	pub movement_x: i32,
	pub movement_y: i32,
	pub button: i16,
	pub buttons: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
	pub alt: bool,
	pub ctrl: bool,
	pub shift: bool,
	pub meta: bool,
}

#[derive(Default)]
struct DispatchState {
	target: Option<WeakObjectRef>,
	default_prevented: bool,
	propagation_stopped: bool,
}

/// One event instance (plain, keyboard, mouse, pointer or wheel)
pub struct InputEvent {
	event_type: String,
	kind: InputEventKind,
	modifiers: Modifiers,
	state: Mutex<DispatchState>,
}

impl InputEvent {
	pub fn new(event_type: &str, kind: InputEventKind) -> Self {
		Self {
			event_type: event_type.to_string(),
			kind,
			modifiers: Modifiers::default(),
			state: Mutex::new(DispatchState::default()),
		}
	}

	pub fn plain(event_type: &str) -> ObjectRef {
		ObjectRef::new(Self::new(event_type, InputEventKind::Plain))
	}

	pub fn keyboard(event_type: &str, key: &str, code: &str) -> Self {
		let key_code = key
			.chars()
			.next()
			.filter(|_| key.chars().count() == 1)
			.map_or(0, |c| c.to_ascii_uppercase() as u32);
		Self::new(
			event_type,
			InputEventKind::Keyboard {
				key: key.to_string(),
				code: code.to_string(),
				key_code,
				char_code: if event_type == "keypress" { key_code } else { 0 },
				repeat: false,
			},
		)
	}

	pub fn mouse(event_type: &str, client_x: i32, client_y: i32, button: i16) -> Self {
		Self::new(
			event_type,
			InputEventKind::Mouse(MouseData {
				client_x,
				client_y,
				offset_x: client_x,
				offset_y: client_y,
				button,
				buttons: if button >= 0 { 1 << button } else { 0 },
				..MouseData::default()
			}),
		)
	}

	pub fn pointer(event_type: &str, pointer_id: i32, client_x: i32, client_y: i32) -> Self {
		Self::new(
			event_type,
			InputEventKind::Pointer {
				mouse: MouseData {
					client_x,
					client_y,
					offset_x: client_x,
					offset_y: client_y,
					..MouseData::default()
				},
				pointer_id,
				pointer_type: "mouse".to_string(),
				pressure: 0.5,
			},
		)
	}

	pub fn wheel(delta_x: f64, delta_y: f64) -> Self {
		Self::new(
			"wheel",
			InputEventKind::Wheel {
				mouse: MouseData::default(),
				delta_x,
				delta_y,
				delta_mode: 0,
			},
		)
	}

	pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
		self.modifiers = modifiers;
		self
	}

	pub fn into_ref(self) -> ObjectRef {
		ObjectRef::new(self)
	}

	fn mouse_data(&self) -> Option<&MouseData> {
		match &self.kind {
			InputEventKind::Mouse(m) => Some(m),
			InputEventKind::Pointer { mouse, .. } | InputEventKind::Wheel { mouse, .. } => Some(mouse),
			_ => None,
		}
	}
}

impl HostObject for InputEvent {
	fn class_name(&self) -> &str {
		match self.kind {
			InputEventKind::Plain => "Event",
			InputEventKind::Keyboard { .. } => "KeyboardEvent",
			InputEventKind::Mouse(_) => "MouseEvent",
			InputEventKind::Pointer { .. } => "PointerEvent",
			InputEventKind::Wheel { .. } => "WheelEvent",
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"type" => Some(HostValue::string(&self.event_type)),
			"defaultPrevented" => Some(HostValue::Bool(self.default_prevented())),
			_ => None,
		}
	}

	fn as_event(&self) -> Option<&dyn Event> {
		Some(self)
	}

	fn as_modifier_state(&self) -> Option<&dyn ModifierState> {
		match self.kind {
			InputEventKind::Plain => None,
			_ => Some(self),
		}
	}

	fn as_keyboard_event(&self) -> Option<&dyn KeyboardEvent> {
		matches!(self.kind, InputEventKind::Keyboard { .. }).then_some(self as &dyn KeyboardEvent)
	}

	fn as_mouse_event(&self) -> Option<&dyn MouseEvent> {
		self.mouse_data().map(|_| self as &dyn MouseEvent)
	}

	fn as_pointer_event(&self) -> Option<&dyn PointerEvent> {
		matches!(self.kind, InputEventKind::Pointer { .. }).then_some(self as &dyn PointerEvent)
	}

	fn as_wheel_event(&self) -> Option<&dyn WheelEvent> {
		matches!(self.kind, InputEventKind::Wheel { .. }).then_some(self as &dyn WheelEvent)
	}
}

impl Event for InputEvent {
	fn event_type(&self) -> String {
		self.event_type.clone()
	}

	fn target(&self) -> Option<ObjectRef> {
		self.state.lock().target.as_ref().and_then(WeakObjectRef::upgrade)
	}

	fn set_target(&self, target: ObjectRef) {
		self.state.lock().target = Some(target.downgrade());
	}

	fn prevent_default(&self) {
		self.state.lock().default_prevented = true;
	}

	fn default_prevented(&self) -> bool {
		self.state.lock().default_prevented
	}

	fn stop_propagation(&self) {
		self.state.lock().propagation_stopped = true;
	}

	fn cancel_bubble(&self) -> bool {
		self.state.lock().propagation_stopped
	}
}

impl ModifierState for InputEvent {
	fn alt_key(&self) -> bool {
		self.modifiers.alt
	}

	fn ctrl_key(&self) -> bool {
		self.modifiers.ctrl
	}

	fn shift_key(&self) -> bool {
		self.modifiers.shift
	}

	fn meta_key(&self) -> bool {
		self.modifiers.meta
	}

	fn get_modifier_state(&self, key: &str) -> bool {
		match key {
			"Alt" => self.modifiers.alt,
			"Control" => self.modifiers.ctrl,
			"Shift" => self.modifiers.shift,
			"Meta" => self.modifiers.meta,
			_ => false,
		}
	}
}

impl KeyboardEvent for InputEvent {
	fn key(&self) -> String {
		match &self.kind {
			InputEventKind::Keyboard { key, .. } => key.clone(),
			_ => String::new(),
		}
	}

	fn code(&self) -> String {
		match &self.kind {
			InputEventKind::Keyboard { code, .. } => code.clone(),
			_ => String::new(),
		}
	}

	fn key_code(&self) -> u32 {
		match &self.kind {
			InputEventKind::Keyboard { key_code, .. } => *key_code,
			_ => 0,
		}
	}

	fn char_code(&self) -> u32 {
		match &self.kind {
			InputEventKind::Keyboard { char_code, .. } => *char_code,
			_ => 0,
		}
	}

	fn repeat(&self) -> bool {
		matches!(self.kind, InputEventKind::Keyboard { repeat: true, .. })
	}
}

impl MouseEvent for InputEvent {
	fn client_x(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.client_x)
	}

	fn client_y(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.client_y)
	}

	fn offset_x(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.offset_x)
	}

	fn offset_y(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.offset_y)
	}

	fn movement_x(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.movement_x)
	}

	fn movement_y(&self) -> i32 {
		self.mouse_data().map_or(0, |m| m.movement_y)
	}

	fn button(&self) -> i16 {
		self.mouse_data().map_or(0, |m| m.button)
	}

	fn buttons(&self) -> u16 {
		self.mouse_data().map_or(0, |m| m.buttons)
	}
}

impl PointerEvent for InputEvent {
	fn pointer_id(&self) -> i32 {
		match &self.kind {
			InputEventKind::Pointer { pointer_id, .. } => *pointer_id,
			_ => 0,
		}
	}

	fn pointer_type(&self) -> String {
		match &self.kind {
			InputEventKind::Pointer { pointer_type, .. } => pointer_type.clone(),
			_ => String::new(),
		}
	}

	fn pressure(&self) -> f32 {
		match &self.kind {
			InputEventKind::Pointer { pressure, .. } => *pressure,
			_ => 0.0,
		}
	}
}

impl WheelEvent for InputEvent {
	fn delta_x(&self) -> f64 {
		match &self.kind {
			InputEventKind::Wheel { delta_x, .. } => *delta_x,
			_ => 0.0,
		}
	}

	fn delta_y(&self) -> f64 {
		match &self.kind {
			InputEventKind::Wheel { delta_y, .. } => *delta_y,
			_ => 0.0,
		}
	}

	fn delta_mode(&self) -> u32 {
		match &self.kind {
			InputEventKind::Wheel { delta_mode, .. } => *delta_mode,
			_ => 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_keyboard_event_views() {
		let ev = InputEvent::keyboard("keydown", "a", "KeyA")
			.with_modifiers(Modifiers {
				shift: true,
				..Modifiers::default()
			})
			.into_ref();
		let kb = ev.as_keyboard_event().unwrap();
		assert_eq!(kb.key(), "a");
		assert_eq!(kb.code(), "KeyA");
		assert_eq!(kb.key_code(), 'A' as u32);
		assert_eq!(kb.char_code(), 0);
		assert!(ev.as_modifier_state().unwrap().get_modifier_state("Shift"));
		assert!(ev.as_mouse_event().is_none());
		assert_eq!(ev.class_name(), "KeyboardEvent");
	}

	#[test]
	fn test_pointer_event_is_also_mouse_event() {
		let ev = InputEvent::pointer("pointerdown", 3, 10, 20).into_ref();
		assert_eq!(ev.as_pointer_event().unwrap().pointer_id(), 3);
		assert_eq!(ev.as_mouse_event().unwrap().client_y(), 20);
		assert!(ev.as_wheel_event().is_none());
	}

	#[test]
	fn test_prevent_default_and_stop_propagation() {
		let ev = InputEvent::plain("resize");
		let e = ev.as_event().unwrap();
		assert!(!e.default_prevented());
		e.prevent_default();
		e.stop_propagation();
		assert!(e.default_prevented());
		assert!(e.cancel_bubble());
		assert!(ev.as_modifier_state().is_none());
	}

	#[test]
	fn test_mouse_buttons_mask() {
		let ev = InputEvent::mouse("mousedown", 1, 2, 2).into_ref();
		let m = ev.as_mouse_event().unwrap();
		assert_eq!(m.button(), 2);
		assert_eq!(m.buttons(), 4);
	}
}
