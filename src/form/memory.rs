//! Headless implementations of the collaborator traits.
//!
//! They behave like a minimal DOM: listeners fire synchronously from `dispatch`, `reset`
//! restores defaults and fires a reset event, and native submissions are only counted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::controller::{read_state, write_state};
use super::element::{
    Document, EventKind, EventSource, FieldKind, FileHandle, FormControl, FormElement, FormId,
    ListenerId, NativeEvent, NativeListener, TargetKind,
};

struct ControlState {
    value: String,
    checked: bool,
    files: Vec<FileHandle>,
    focused: bool,
}

#[derive(Clone)]
pub struct InMemoryControl {
    name: String,
    kind: FieldKind,
    default_value: String,
    default_checked: bool,
    state: Arc<RwLock<ControlState>>,
}

impl InMemoryControl {
    pub fn new(name: impl Into<String>, kind: FieldKind, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            kind,
            default_value: value.clone(),
            default_checked: false,
            state: Arc::new(RwLock::new(ControlState {
                value,
                checked: false,
                files: Vec::new(),
                focused: false,
            })),
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text, value)
    }

    pub fn other(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Other, value)
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::File, "")
    }

    pub fn checkbox(name: impl Into<String>, checked: bool) -> Self {
        let mut control = Self::new(name, FieldKind::Checkbox, "on");
        control.default_checked = checked;
        write_state(&control.state).checked = checked;
        control
    }

    /// Replaces the selection, given in selection order.
    pub fn select_files(&self, files: Vec<FileHandle>) {
        write_state(&self.state).files = files;
    }

    pub fn is_focused(&self) -> bool {
        read_state(&self.state).focused
    }
}

impl FormControl for InMemoryControl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> FieldKind {
        self.kind
    }

    fn value(&self) -> String {
        read_state(&self.state).value.clone()
    }

    fn set_value(&self, value: String) {
        write_state(&self.state).value = value;
    }

    fn checked(&self) -> bool {
        read_state(&self.state).checked
    }

    fn set_checked(&self, checked: bool) {
        write_state(&self.state).checked = checked;
    }

    fn files(&self) -> Vec<FileHandle> {
        read_state(&self.state).files.clone()
    }

    fn focus(&self) {
        write_state(&self.state).focused = true;
    }
}

impl InMemoryControl {
    fn restore_default(&self) {
        let mut state = write_state(&self.state);
        state.value = self.default_value.clone();
        state.checked = self.default_checked;
        state.files.clear();
    }
}

#[derive(Clone, Default)]
struct ListenerTable {
    entries: Arc<RwLock<Vec<(ListenerId, EventKind, NativeListener)>>>,
}

impl ListenerTable {
    fn add(&self, kind: EventKind, listener: NativeListener) -> ListenerId {
        let id = ListenerId::next();
        write_state(&self.entries).push((id, kind, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = write_state(&self.entries);
        let before = entries.len();
        entries.retain(|(entry, _, _)| *entry != id);
        entries.len() != before
    }

    fn dispatch(&self, event: &NativeEvent) {
        let listeners = read_state(&self.entries)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(event);
        }
    }

    fn len(&self) -> usize {
        read_state(&self.entries).len()
    }
}

#[derive(Clone)]
pub struct InMemoryForm {
    id: FormId,
    name: String,
    action: String,
    method: String,
    enctype: String,
    controls: Arc<RwLock<Vec<InMemoryControl>>>,
    aliases: Arc<RwLock<Vec<(String, InMemoryControl)>>>,
    listeners: ListenerTable,
    native_submissions: Arc<AtomicUsize>,
}

impl InMemoryForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FormId::next(),
            name: name.into(),
            action: String::new(),
            method: String::new(),
            enctype: String::new(),
            controls: Arc::new(RwLock::new(Vec::new())),
            aliases: Arc::new(RwLock::new(Vec::new())),
            listeners: ListenerTable::default(),
            native_submissions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_enctype(mut self, enctype: impl Into<String>) -> Self {
        self.enctype = enctype.into();
        self
    }

    pub fn with_control(self, control: InMemoryControl) -> Self {
        self.push_control(control);
        self
    }

    pub fn push_control(&self, control: InMemoryControl) {
        write_state(&self.controls).push(control);
    }

    /// Exposes `control` under an extra key, the way a DOM form exposes ids and indices.
    pub fn insert_alias(&self, key: impl Into<String>, control: InMemoryControl) {
        write_state(&self.aliases).push((key.into(), control));
    }

    pub fn in_memory_control(&self, name: &str) -> Option<InMemoryControl> {
        read_state(&self.controls)
            .iter()
            .find(|control| control.name == name)
            .cloned()
    }

    /// Fires `kind` at the named control, as a user interaction would.
    pub fn fire(&self, kind: EventKind, name: &str) {
        if let Some(control) = self.in_memory_control(name) {
            self.dispatch(NativeEvent::for_control(kind, &control));
        }
    }

    /// Fires a submit event and reports whether a listener suppressed the default action.
    pub fn request_submit(&self) -> bool {
        let event = NativeEvent::for_form(EventKind::Submit);
        self.dispatch(event.clone());
        event.is_default_prevented()
    }

    pub fn native_submission_count(&self) -> usize {
        self.native_submissions.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl EventSource for InMemoryForm {
    fn add_listener(&self, kind: EventKind, listener: NativeListener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn dispatch(&self, event: NativeEvent) {
        self.listeners.dispatch(&event);
    }
}

impl FormElement for InMemoryForm {
    fn form_id(&self) -> FormId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn action(&self) -> String {
        self.action.clone()
    }

    fn method(&self) -> String {
        self.method.clone()
    }

    fn enctype(&self) -> String {
        self.enctype.clone()
    }

    fn controls(&self) -> Vec<Arc<dyn FormControl>> {
        read_state(&self.controls)
            .iter()
            .map(|control| Arc::new(control.clone()) as Arc<dyn FormControl>)
            .collect()
    }

    fn entries(&self) -> Vec<(String, Arc<dyn FormControl>)> {
        let mut entries = read_state(&self.controls)
            .iter()
            .filter(|control| !control.name.is_empty())
            .map(|control| {
                (
                    control.name.clone(),
                    Arc::new(control.clone()) as Arc<dyn FormControl>,
                )
            })
            .collect::<Vec<_>>();
        entries.extend(read_state(&self.aliases).iter().map(|(key, control)| {
            (
                key.clone(),
                Arc::new(control.clone()) as Arc<dyn FormControl>,
            )
        }));
        entries
    }

    fn reset(&self) {
        for control in read_state(&self.controls).iter() {
            control.restore_default();
        }
        self.dispatch(NativeEvent::for_form(EventKind::Reset));
    }

    fn submit_natively(&self) {
        self.native_submissions.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDocument {
    forms: Arc<RwLock<Vec<InMemoryForm>>>,
    listeners: ListenerTable,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_form(&self, form: InMemoryForm) {
        write_state(&self.forms).push(form);
    }

    /// Signals that the environment finished loading.
    pub fn ready(&self) {
        self.dispatch(NativeEvent::new(EventKind::Ready, TargetKind::Other));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl EventSource for InMemoryDocument {
    fn add_listener(&self, kind: EventKind, listener: NativeListener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn dispatch(&self, event: NativeEvent) {
        self.listeners.dispatch(&event);
    }
}

impl Document for InMemoryDocument {
    fn form_by_name(&self, name: &str) -> Option<Arc<dyn FormElement>> {
        read_state(&self.forms)
            .iter()
            .find(|form| form.name == name)
            .map(|form| Arc::new(form.clone()) as Arc<dyn FormElement>)
    }
}
