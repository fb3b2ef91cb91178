//! Headless window, document and element tree

use super::console::{HeadlessCrypto, HeadlessPerformance};
use super::gpu::HeadlessGpu;
use super::HeadlessConfig;
use crate::capability::{
	Canvas, CssStyle, Document, DomRect, Element, EventTarget, HostResult, ListenerOptions,
	MediaQueryList, Navigator, Window,
};
use crate::closure::ClosureToken;
use crate::event_loop::VirtualClock;
use crate::value::{HostException, HostObject, HostValue, ObjectRef, PlainObject, WeakObjectRef};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CANVAS_WIDTH: u32 = 300;
const DEFAULT_CANVAS_HEIGHT: u32 = 150;

// ============================================================================
// LISTENERS
// ============================================================================

struct ListenerEntry {
	event_type: String,
	token: ClosureToken,
	options: ListenerOptions,
}

impl ListenerEntry {
	fn matches(&self, event_type: &str, listener: &ObjectRef, capture: bool) -> bool {
		self.event_type == event_type
			&& self.token.callee().ptr_eq(listener)
			&& self.options.capture == capture
	}
}

/// Listener list shared by every headless event target
#[derive(Default)]
pub struct Listeners {
	entries: Mutex<Vec<ListenerEntry>>,
}

impl Listeners {
	pub fn new() -> Self {
		Self::default()
	}
}

impl EventTarget for Listeners {
	fn add_event_listener(
		&self,
		event_type: &str,
		listener: ClosureToken,
		options: ListenerOptions,
	) -> Option<ClosureToken> {
		let mut entries = self.entries.lock();
		if entries
			.iter()
			.any(|e| e.matches(event_type, listener.callee(), options.capture))
		{
			return Some(listener);
		}
		entries.push(ListenerEntry {
			event_type: event_type.to_string(),
			token: listener,
			options,
		});
		None
	}

	fn remove_event_listener(
		&self,
		event_type: &str,
		listener: &ObjectRef,
		capture: bool,
	) -> Option<ClosureToken> {
		let mut entries = self.entries.lock();
		let at = entries.iter().position(|e| e.matches(event_type, listener, capture))?;
		Some(entries.remove(at).token)
	}

	fn take_listeners(&self, event_type: &str) -> Vec<(ObjectRef, Option<ClosureToken>)> {
		let mut entries = self.entries.lock();
		let mut taken = Vec::new();
		let mut kept = Vec::with_capacity(entries.len());
		for entry in entries.drain(..) {
			if entry.event_type != event_type {
				kept.push(entry);
			} else if entry.options.once {
				taken.push((entry.token.callee().clone(), Some(entry.token)));
			} else {
				taken.push((entry.token.callee().clone(), None));
				kept.push(entry);
			}
		}
		*entries = kept;
		taken
	}

	fn listener_count(&self, event_type: &str) -> usize {
		self.entries
			.lock()
			.iter()
			.filter(|e| e.event_type == event_type)
			.count()
	}
}

// ============================================================================
// WINDOW / NAVIGATOR
// ============================================================================

pub struct HeadlessWindow {
	document: ObjectRef,
	navigator: ObjectRef,
	performance: ObjectRef,
	crypto: ObjectRef,
	inner_width: f64,
	inner_height: f64,
	device_pixel_ratio: f64,
	secure_context: bool,
	matched_media: Vec<String>,
	listeners: Listeners,
}

impl HeadlessWindow {
	pub fn create(config: &HeadlessConfig, clock: VirtualClock) -> ObjectRef {
		let gpu = config.gpu.then(HeadlessGpu::create);
		ObjectRef::new(HeadlessWindow {
			document: HeadlessDocument::create(),
			navigator: ObjectRef::new(HeadlessNavigator {
				gpu,
				user_agent: config.user_agent.clone(),
			}),
			performance: ObjectRef::new(HeadlessPerformance::new(clock)),
			crypto: ObjectRef::new(HeadlessCrypto::new(config.random_seed)),
			inner_width: config.inner_width,
			inner_height: config.inner_height,
			device_pixel_ratio: config.device_pixel_ratio,
			secure_context: config.secure_context,
			matched_media: config.matched_media.clone(),
			listeners: Listeners::new(),
		})
	}
}

impl HostObject for HeadlessWindow {
	fn class_name(&self) -> &str {
		"Window"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"document" => Some(HostValue::Object(self.document.clone())),
			"navigator" => Some(HostValue::Object(self.navigator.clone())),
			"performance" => Some(HostValue::Object(self.performance.clone())),
			"crypto" => Some(HostValue::Object(self.crypto.clone())),
			"innerWidth" => Some(HostValue::Number(self.inner_width)),
			"innerHeight" => Some(HostValue::Number(self.inner_height)),
			"devicePixelRatio" => Some(HostValue::Number(self.device_pixel_ratio)),
			_ => None,
		}
	}

	fn as_window(&self) -> Option<&dyn Window> {
		Some(self)
	}

	fn as_event_target(&self) -> Option<&dyn EventTarget> {
		Some(&self.listeners)
	}
}

impl Window for HeadlessWindow {
	fn document(&self) -> Option<ObjectRef> {
		Some(self.document.clone())
	}

	fn navigator(&self) -> ObjectRef {
		self.navigator.clone()
	}

	fn performance(&self) -> Option<ObjectRef> {
		Some(self.performance.clone())
	}

	fn crypto(&self) -> HostResult<ObjectRef> {
		Ok(self.crypto.clone())
	}

	fn inner_width(&self) -> HostResult<f64> {
		Ok(self.inner_width)
	}

	fn inner_height(&self) -> HostResult<f64> {
		Ok(self.inner_height)
	}

	fn device_pixel_ratio(&self) -> f64 {
		self.device_pixel_ratio
	}

	fn is_secure_context(&self) -> bool {
		self.secure_context
	}

	fn match_media(&self, query: &str) -> HostResult<Option<ObjectRef>> {
		let media = query.trim().to_string();
		let matches = self.matched_media.iter().any(|m| m.trim() == media);
		Ok(Some(ObjectRef::new(HeadlessMediaQueryList {
			media,
			matches,
			listeners: Mutex::new(Vec::new()),
		})))
	}
}

pub struct HeadlessNavigator {
	gpu: Option<ObjectRef>,
	user_agent: String,
}

impl HostObject for HeadlessNavigator {
	fn class_name(&self) -> &str {
		"Navigator"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"gpu" => Some(self.gpu.clone().map_or(HostValue::Undefined, HostValue::Object)),
			"userAgent" => Some(HostValue::string(&self.user_agent)),
			_ => None,
		}
	}

	fn as_navigator(&self) -> Option<&dyn Navigator> {
		Some(self)
	}
}

impl Navigator for HeadlessNavigator {
	fn gpu(&self) -> Option<ObjectRef> {
		self.gpu.clone()
	}

	fn user_agent(&self) -> String {
		self.user_agent.clone()
	}
}

pub struct HeadlessMediaQueryList {
	media: String,
	matches: bool,
	listeners: Mutex<Vec<ObjectRef>>,
}

impl HostObject for HeadlessMediaQueryList {
	fn class_name(&self) -> &str {
		"MediaQueryList"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"media" => Some(HostValue::string(&self.media)),
			"matches" => Some(HostValue::Bool(self.matches)),
			_ => None,
		}
	}

	fn as_media_query_list(&self) -> Option<&dyn MediaQueryList> {
		Some(self)
	}
}

impl MediaQueryList for HeadlessMediaQueryList {
	fn media(&self) -> String {
		self.media.clone()
	}

	fn matches(&self) -> bool {
		self.matches
	}

	fn add_listener(&self, listener: ObjectRef) -> HostResult<()> {
		let mut listeners = self.listeners.lock();
		if !listeners.iter().any(|l| l.ptr_eq(&listener)) {
			listeners.push(listener);
		}
		Ok(())
	}

	fn remove_listener(&self, listener: &ObjectRef) -> HostResult<()> {
		self.listeners.lock().retain(|l| !l.ptr_eq(listener));
		Ok(())
	}

	fn listeners(&self) -> Vec<ObjectRef> {
		self.listeners.lock().clone()
	}
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// State shared by a document and every element it created
#[derive(Default)]
struct DocumentState {
	fullscreen: Mutex<Option<WeakObjectRef>>,
	pointer_lock: Mutex<Option<WeakObjectRef>>,
}

pub struct HeadlessDocument {
	state: Arc<DocumentState>,
	root: ObjectRef,
	body: ObjectRef,
	listeners: Listeners,
}

impl HeadlessDocument {
	pub fn create() -> ObjectRef {
		let state = Arc::new(DocumentState::default());
		let root = HeadlessElement::create("html", state.clone());
		let body = HeadlessElement::create("body", state.clone());
		if let Some(html) = root.downcast_ref::<HeadlessElement>() {
			html.attach(&root, &body);
		}
		ObjectRef::new(HeadlessDocument {
			state,
			root,
			body,
			listeners: Listeners::new(),
		})
	}

	fn find(&self, pred: &dyn Fn(&HeadlessElement) -> bool) -> Option<ObjectRef> {
		let mut stack = vec![self.root.clone()];
		while let Some(node) = stack.pop() {
			let Some(el) = node.downcast_ref::<HeadlessElement>() else {
				continue;
			};
			if pred(el) {
				return Some(node.clone());
			}
			let children = el.children.lock().clone();
			stack.extend(children.into_iter().rev());
		}
		None
	}
}

impl HostObject for HeadlessDocument {
	fn class_name(&self) -> &str {
		"HTMLDocument"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"body" => Some(HostValue::Object(self.body.clone())),
			"documentElement" => Some(HostValue::Object(self.root.clone())),
			_ => None,
		}
	}

	fn as_document(&self) -> Option<&dyn Document> {
		Some(self)
	}

	fn as_event_target(&self) -> Option<&dyn EventTarget> {
		Some(&self.listeners)
	}
}

fn valid_tag_name(tag: &str) -> bool {
	let mut chars = tag.chars();
	chars.next().is_some_and(|c| c.is_ascii_alphabetic())
		&& chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl Document for HeadlessDocument {
	fn body(&self) -> Option<ObjectRef> {
		Some(self.body.clone())
	}

	fn create_element(&self, tag: &str) -> HostResult<ObjectRef> {
		if !valid_tag_name(tag) {
			return Err(HostException::new(
				"InvalidCharacterError",
				format!("The tag name provided ('{}') is not a valid name.", tag),
			));
		}
		Ok(HeadlessElement::create(tag, self.state.clone()))
	}

	fn query_selector(&self, selector: &str) -> HostResult<Option<ObjectRef>> {
		let selector = selector.trim();
		if selector.is_empty() {
			return Err(HostException::new(
				"SyntaxError",
				"'' is not a valid selector.",
			));
		}
		if selector.contains(|c: char| c.is_whitespace() || ">+~[:,".contains(c)) {
			return Err(HostException::not_supported(format!(
				"selector '{}' is not supported by the headless document",
				selector
			)));
		}
		let found = if let Some(id) = selector.strip_prefix('#') {
			self.find(&|el| el.attribute("id").as_deref() == Some(id))
		} else if let Some(class) = selector.strip_prefix('.') {
			self.find(&|el| {
				el.attribute("class")
					.is_some_and(|c| c.split_whitespace().any(|part| part == class))
			})
		} else {
			let tag = selector.to_ascii_uppercase();
			self.find(&|el| el.tag == tag)
		};
		Ok(found)
	}

	fn fullscreen_element(&self) -> Option<ObjectRef> {
		self.state.fullscreen.lock().as_ref().and_then(WeakObjectRef::upgrade)
	}

	fn exit_fullscreen(&self) {
		*self.state.fullscreen.lock() = None;
	}

	fn pointer_lock_element(&self) -> Option<ObjectRef> {
		self.state.pointer_lock.lock().as_ref().and_then(WeakObjectRef::upgrade)
	}

	fn exit_pointer_lock(&self) {
		*self.state.pointer_lock.lock() = None;
	}
}

// ============================================================================
// ELEMENTS
// ============================================================================

pub struct HeadlessElement {
	tag: String,
	attributes: Mutex<BTreeMap<String, String>>,
	children: Mutex<Vec<ObjectRef>>,
	parent: Mutex<Option<WeakObjectRef>>,
	style: ObjectRef,
	listeners: Listeners,
	pointer_captures: Mutex<Vec<i32>>,
	doc: Arc<DocumentState>,
}

impl HeadlessElement {
	fn create(tag: &str, doc: Arc<DocumentState>) -> ObjectRef {
		ObjectRef::new(HeadlessElement {
			tag: tag.to_ascii_uppercase(),
			attributes: Mutex::new(BTreeMap::new()),
			children: Mutex::new(Vec::new()),
			parent: Mutex::new(None),
			style: ObjectRef::new(HeadlessStyle::default()),
			listeners: Listeners::new(),
			pointer_captures: Mutex::new(Vec::new()),
			doc,
		})
	}

	pub fn attribute(&self, name: &str) -> Option<String> {
		self.attributes.lock().get(name).cloned()
	}

	pub fn children(&self) -> Vec<ObjectRef> {
		self.children.lock().clone()
	}

	pub fn pointer_captures(&self) -> Vec<i32> {
		self.pointer_captures.lock().clone()
	}

	fn parent(&self) -> Option<ObjectRef> {
		self.parent.lock().as_ref().and_then(WeakObjectRef::upgrade)
	}

	fn attach(&self, this: &ObjectRef, child: &ObjectRef) {
		if let Some(el) = child.downcast_ref::<HeadlessElement>() {
			if let Some(old) = el.parent() {
				if let Some(old_el) = old.downcast_ref::<HeadlessElement>() {
					old_el.children.lock().retain(|c| !c.ptr_eq(child));
				}
			}
			*el.parent.lock() = Some(this.downgrade());
		}
		self.children.lock().push(child.clone());
	}

	/// Connected when the parent chain reaches the document root
	fn is_connected(&self) -> bool {
		if self.tag == "HTML" {
			return true;
		}
		let mut current = self.parent();
		while let Some(node) = current {
			let Some(el) = node.downcast_ref::<HeadlessElement>() else {
				return false;
			};
			if el.tag == "HTML" {
				return true;
			}
			current = el.parent();
		}
		false
	}

	fn is_canvas(&self) -> bool {
		self.tag == "CANVAS"
	}

	fn dimension(&self, name: &str, default: u32) -> u32 {
		self.attribute(name)
			.and_then(|v| v.trim().parse().ok())
			.unwrap_or(default)
	}

	fn css_pixels(&self, property: &str) -> Option<f64> {
		self.style
			.as_css_style()
			.map(|s| s.get_property_value(property))
			.and_then(|v| v.trim().strip_suffix("px").and_then(|n| n.trim().parse().ok()))
	}
}

impl HostObject for HeadlessElement {
	fn class_name(&self) -> &str {
		if self.is_canvas() {
			"HTMLCanvasElement"
		} else {
			"HTMLElement"
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		match key {
			"tagName" => Some(HostValue::string(&self.tag)),
			"id" => Some(HostValue::string(self.id())),
			"width" if self.is_canvas() => Some(HostValue::Number(self.width() as f64)),
			"height" if self.is_canvas() => Some(HostValue::Number(self.height() as f64)),
			_ => None,
		}
	}

	fn as_element(&self) -> Option<&dyn Element> {
		Some(self)
	}

	fn as_canvas(&self) -> Option<&dyn Canvas> {
		self.is_canvas().then_some(self as &dyn Canvas)
	}

	fn as_event_target(&self) -> Option<&dyn EventTarget> {
		Some(&self.listeners)
	}
}

impl Element for HeadlessElement {
	fn tag_name(&self) -> String {
		self.tag.clone()
	}

	fn id(&self) -> String {
		self.attribute("id").unwrap_or_default()
	}

	fn parent_element(&self) -> Option<ObjectRef> {
		self.parent()
	}

	fn append_child(&self, this: &ObjectRef, child: &ObjectRef) -> HostResult<()> {
		if child.downcast_ref::<HeadlessElement>().is_none() {
			return Err(HostException::type_error(
				"Failed to execute 'appendChild': parameter 1 is not of type 'Node'.",
			));
		}
		let mut ancestor = Some(this.clone());
		while let Some(node) = ancestor {
			if node.ptr_eq(child) {
				return Err(HostException::new(
					"HierarchyRequestError",
					"The new child element contains the parent.",
				));
			}
			ancestor = node
				.downcast_ref::<HeadlessElement>()
				.and_then(HeadlessElement::parent);
		}
		self.attach(this, child);
		debug!("appended <{}> to <{}>", child.class_name(), self.tag);
		Ok(())
	}

	fn set_attribute(&self, name: &str, value: &str) -> HostResult<()> {
		if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '=') {
			return Err(HostException::new(
				"InvalidCharacterError",
				format!("'{}' is not a valid attribute name.", name),
			));
		}
		self.attributes
			.lock()
			.insert(name.to_ascii_lowercase(), value.to_string());
		Ok(())
	}

	fn get_attribute(&self, name: &str) -> Option<String> {
		self.attribute(&name.to_ascii_lowercase())
	}

	fn bounding_client_rect(&self) -> DomRect {
		let (w, h) = if self.is_canvas() {
			(self.width() as f64, self.height() as f64)
		} else {
			(0.0, 0.0)
		};
		DomRect {
			x: 0.0,
			y: 0.0,
			width: self.css_pixels("width").unwrap_or(w),
			height: self.css_pixels("height").unwrap_or(h),
		}
	}

	fn style(&self) -> ObjectRef {
		self.style.clone()
	}

	fn request_fullscreen(&self, this: &ObjectRef) -> HostResult<()> {
		if !self.is_connected() {
			return Err(HostException::type_error("Element is not connected"));
		}
		*self.doc.fullscreen.lock() = Some(this.downgrade());
		Ok(())
	}

	fn request_pointer_lock(&self, this: &ObjectRef) {
		if self.is_connected() {
			*self.doc.pointer_lock.lock() = Some(this.downgrade());
		}
	}

	fn set_pointer_capture(&self, pointer_id: i32) -> HostResult<()> {
		if !self.is_connected() {
			return Err(HostException::invalid_state("Element is not connected"));
		}
		let mut captures = self.pointer_captures.lock();
		if !captures.contains(&pointer_id) {
			captures.push(pointer_id);
		}
		Ok(())
	}
}

impl Canvas for HeadlessElement {
	fn width(&self) -> u32 {
		self.dimension("width", DEFAULT_CANVAS_WIDTH)
	}

	fn set_width(&self, width: u32) {
		self.attributes
			.lock()
			.insert("width".to_string(), width.to_string());
	}

	fn height(&self) -> u32 {
		self.dimension("height", DEFAULT_CANVAS_HEIGHT)
	}

	fn set_height(&self, height: u32) {
		self.attributes
			.lock()
			.insert("height".to_string(), height.to_string());
	}

	fn get_context(&self, kind: &str) -> HostResult<Option<ObjectRef>> {
		let class = match kind {
			"2d" => "CanvasRenderingContext2D",
			"webgpu" => "GPUCanvasContext",
			"webgl" | "webgl2" => return Ok(None),
			other => {
				return Err(HostException::type_error(format!(
					"The provided value '{}' is not a valid enum value of type RenderingContextType.",
					other
				)))
			}
		};
		Ok(Some(ObjectRef::new(NamedObject::new(class))))
	}
}

#[derive(Default)]
pub struct HeadlessStyle {
	props: Mutex<BTreeMap<String, String>>,
}

impl HostObject for HeadlessStyle {
	fn class_name(&self) -> &str {
		"CSSStyleDeclaration"
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_css_style(&self) -> Option<&dyn CssStyle> {
		Some(self)
	}
}

impl CssStyle for HeadlessStyle {
	fn set_property(&self, name: &str, value: &str) -> HostResult<()> {
		let mut props = self.props.lock();
		if value.is_empty() {
			props.remove(name);
		} else {
			props.insert(name.to_string(), value.to_string());
		}
		Ok(())
	}

	fn get_property_value(&self, name: &str) -> String {
		self.props.lock().get(name).cloned().unwrap_or_default()
	}
}

/// Opaque host object identified only by its class (rendering contexts and
/// similar handles the guest passes around but never inspects)
pub struct NamedObject {
	class: String,
	props: PlainObject,
}

impl NamedObject {
	pub fn new(class: &str) -> Self {
		Self {
			class: class.to_string(),
			props: PlainObject::new(),
		}
	}
}

impl HostObject for NamedObject {
	fn class_name(&self) -> &str {
		&self.class
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn get(&self, key: &str) -> Option<HostValue> {
		self.props.get(key)
	}

	fn set(&self, key: &str, value: HostValue) -> Result<bool, HostException> {
		self.props.set(key, value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn document() -> ObjectRef {
		HeadlessDocument::create()
	}

	#[test]
	fn test_create_and_query_elements() {
		let doc_ref = document();
		let doc = doc_ref.as_document().unwrap();
		let body = doc.body().unwrap();
		let canvas = doc.create_element("canvas").unwrap();
		canvas.as_element().unwrap().set_attribute("id", "screen").unwrap();
		body.as_element().unwrap().append_child(&body, &canvas).unwrap();

		let found = doc.query_selector("#screen").unwrap().unwrap();
		assert!(found.ptr_eq(&canvas));
		assert!(doc.query_selector("canvas").unwrap().unwrap().ptr_eq(&canvas));
		assert!(doc.query_selector("#missing").unwrap().is_none());
		assert_eq!(doc.query_selector("").unwrap_err().name, "SyntaxError");
		assert!(canvas.as_element().unwrap().parent_element().unwrap().ptr_eq(&body));
	}

	#[test]
	fn test_invalid_tag_name() {
		let doc_ref = document();
		let err = doc_ref.as_document().unwrap().create_element("1nope").unwrap_err();
		assert_eq!(err.name, "InvalidCharacterError");
	}

	#[test]
	fn test_append_cycle_is_rejected() {
		let doc_ref = document();
		let doc = doc_ref.as_document().unwrap();
		let outer = doc.create_element("div").unwrap();
		let inner = doc.create_element("div").unwrap();
		outer.as_element().unwrap().append_child(&outer, &inner).unwrap();
		let err = inner
			.as_element()
			.unwrap()
			.append_child(&inner, &outer)
			.unwrap_err();
		assert_eq!(err.name, "HierarchyRequestError");
	}

	#[test]
	fn test_canvas_dimensions_and_rect() {
		let doc_ref = document();
		let canvas = doc_ref.as_document().unwrap().create_element("canvas").unwrap();
		let c = canvas.as_canvas().unwrap();
		assert_eq!((c.width(), c.height()), (300, 150));
		c.set_width(640);
		assert_eq!(canvas.as_element().unwrap().bounding_client_rect().width, 640.0);

		let style = canvas.as_element().unwrap().style();
		style.as_css_style().unwrap().set_property("width", "320px").unwrap();
		assert_eq!(canvas.as_element().unwrap().bounding_client_rect().width, 320.0);
		assert!(c.get_context("webgpu").unwrap().is_some());
		assert!(c.get_context("bogus").is_err());
	}

	#[test]
	fn test_fullscreen_requires_connection() {
		let doc_ref = document();
		let doc = doc_ref.as_document().unwrap();
		let div = doc.create_element("div").unwrap();
		let el = div.as_element().unwrap();
		assert!(el.request_fullscreen(&div).is_err());
		assert_eq!(el.set_pointer_capture(1).unwrap_err().name, "InvalidStateError");

		let body = doc.body().unwrap();
		body.as_element().unwrap().append_child(&body, &div).unwrap();
		el.request_fullscreen(&div).unwrap();
		assert!(doc.fullscreen_element().unwrap().ptr_eq(&div));
		doc.exit_fullscreen();
		assert!(doc.fullscreen_element().is_none());
	}

	#[test]
	fn test_once_listeners_are_removed_after_dispatch() {
		let mut bridge = crate::context::BridgeContext::default();
		let listener = crate::closure::GuestClosure::create(&mut bridge, 1, 1, 0, 0);
		let retain = || crate::closure::retain(&listener).unwrap();
		let listeners = Listeners::new();
		let once = ListenerOptions {
			once: true,
			..ListenerOptions::default()
		};
		assert!(listeners.add_event_listener("click", retain(), once).is_none());
		let duplicate = listeners.add_event_listener("click", retain(), once);
		assert!(duplicate.is_some_and(|t| t.callee().ptr_eq(&listener)));
		assert_eq!(listeners.listener_count("click"), 1);

		let taken = listeners.take_listeners("click");
		assert_eq!(taken.len(), 1);
		assert!(taken[0].0.ptr_eq(&listener));
		assert!(taken[0].1.is_some());
		assert_eq!(listeners.listener_count("click"), 0);
	}

	#[test]
	fn test_removing_a_listener_hands_back_its_token() {
		let mut bridge = crate::context::BridgeContext::default();
		let listener = crate::closure::GuestClosure::create(&mut bridge, 1, 1, 0, 0);
		let listeners = Listeners::new();
		let token = crate::closure::retain(&listener).unwrap();
		assert!(listeners
			.add_event_listener("keydown", token, ListenerOptions::default())
			.is_none());
		assert_eq!(listener.as_closure().unwrap().record().cnt, 2);

		let taken = listeners.take_listeners("keydown");
		assert!(taken[0].1.is_none());
		assert_eq!(listeners.listener_count("keydown"), 1);

		assert!(listeners.remove_event_listener("keydown", &listener, true).is_none());
		let removed = listeners.remove_event_listener("keydown", &listener, false);
		assert!(removed.is_some_and(|t| t.callee().ptr_eq(&listener)));
		assert_eq!(listeners.listener_count("keydown"), 0);
	}
}
