//! Collaborator interfaces the controller is bound to.
//!
//! A host (browser bridge, terminal UI, test harness) implements these traits over its own
//! widget tree. The controller never touches a global document; everything it reads or
//! writes arrives through the objects handed to [`super::FormControllerBuilder`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);
static LISTENER_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

impl Display for FormId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "form#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListenerId(pub u64);

impl ListenerId {
    pub fn next() -> Self {
        Self(LISTENER_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Checkbox,
    File,
    Other,
}

/// Opaque handle to a user-selected file.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// A single interactive control owned by the form.
///
/// Controls are shared handles with interior mutability, the same way a DOM node is.
pub trait FormControl: Send + Sync {
    fn name(&self) -> String;
    fn kind(&self) -> FieldKind;
    fn value(&self) -> String;
    fn set_value(&self, value: String);
    fn checked(&self) -> bool;
    fn set_checked(&self, checked: bool);
    /// Files in selection order; empty for anything but file inputs.
    fn files(&self) -> Vec<FileHandle>;
    fn focus(&self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    Input,
    Focus,
    Change,
    Click,
    Submit,
    Reset,
    Ready,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Input => "input",
            EventKind::Focus => "focus",
            EventKind::Change => "change",
            EventKind::Click => "click",
            EventKind::Submit => "submit",
            EventKind::Reset => "reset",
            EventKind::Ready => "ready",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetKind {
    Control(FieldKind),
    /// A label; `html_for` names the control it is associated with.
    Label { html_for: Option<String> },
    Form,
    Other,
}

/// Raw interaction event as delivered by the host.
///
/// Clones share the default-prevented flag, so a listener that receives a clone can still
/// suppress the host's default action.
#[derive(Clone, Debug)]
pub struct NativeEvent {
    pub kind: EventKind,
    pub target_name: Option<String>,
    pub target_kind: TargetKind,
    pub checked: Option<bool>,
    pub value: Option<String>,
    default_prevented: Arc<AtomicBool>,
}

impl NativeEvent {
    pub fn new(kind: EventKind, target_kind: TargetKind) -> Self {
        Self {
            kind,
            target_name: None,
            target_kind,
            checked: None,
            value: None,
            default_prevented: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Event targeting `control`, carrying its current name, value and checked state.
    pub fn for_control(kind: EventKind, control: &dyn FormControl) -> Self {
        let field_kind = control.kind();
        let mut event = Self::new(kind, TargetKind::Control(field_kind)).named(control.name());
        event.value = Some(control.value());
        if field_kind == FieldKind::Checkbox {
            event.checked = Some(control.checked());
        }
        event
    }

    pub fn for_form(kind: EventKind) -> Self {
        Self::new(kind, TargetKind::Form)
    }

    pub fn label_click(html_for: impl Into<String>) -> Self {
        Self::new(
            EventKind::Click,
            TargetKind::Label {
                html_for: Some(html_for.into()),
            },
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    /// The target's name, if it carries a non-empty one.
    pub fn field_name(&self) -> Option<&str> {
        self.target_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::SeqCst);
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }
}

pub type NativeListener = Arc<dyn Fn(&NativeEvent) + Send + Sync>;

/// Registration point for native events.
///
/// Listeners must be invoked synchronously from `dispatch`, in registration order, and
/// before any handler the host attaches to individual controls (capture phase).
pub trait EventSource: Send + Sync {
    fn add_listener(&self, kind: EventKind, listener: NativeListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId) -> bool;
    fn dispatch(&self, event: NativeEvent);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlRef {
    Index(usize),
    Name(String),
}

impl Default for ControlRef {
    fn default() -> Self {
        ControlRef::Index(0)
    }
}

impl From<usize> for ControlRef {
    fn from(value: usize) -> Self {
        ControlRef::Index(value)
    }
}

impl From<&str> for ControlRef {
    fn from(value: &str) -> Self {
        ControlRef::Name(value.to_string())
    }
}

impl From<String> for ControlRef {
    fn from(value: String) -> Self {
        ControlRef::Name(value)
    }
}

pub trait FormElement: EventSource {
    fn form_id(&self) -> FormId;
    fn name(&self) -> String;
    fn action(&self) -> String;
    /// Raw method attribute; may be empty.
    fn method(&self) -> String;
    /// Raw enctype attribute; may be empty.
    fn enctype(&self) -> String;
    /// Every control in document order, named or not.
    fn controls(&self) -> Vec<Arc<dyn FormControl>>;

    /// Keyed view over the controls. A key normally equals the control's name, but hosts
    /// may expose aliases (ids, positional keys) whose key differs.
    fn entries(&self) -> Vec<(String, Arc<dyn FormControl>)> {
        self.controls()
            .into_iter()
            .filter_map(|control| {
                let name = control.name();
                (!name.is_empty()).then_some((name, control))
            })
            .collect()
    }

    fn control(&self, reference: &ControlRef) -> Option<Arc<dyn FormControl>> {
        match reference {
            ControlRef::Index(index) => self.controls().into_iter().nth(*index),
            ControlRef::Name(name) => self
                .entries()
                .into_iter()
                .find_map(|(key, control)| (&key == name).then_some(control)),
        }
    }

    /// Restores every control to its default and fires a [`EventKind::Reset`] event.
    fn reset(&self);

    /// Submits the form natively, bypassing submit listeners.
    fn submit_natively(&self);
}

/// The surrounding environment: form lookup plus the readiness signal.
pub trait Document: EventSource {
    fn form_by_name(&self, name: &str) -> Option<Arc<dyn FormElement>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_default_prevented_flag() {
        let event = NativeEvent::for_form(EventKind::Submit);
        let clone = event.clone();
        clone.prevent_default();
        assert!(event.is_default_prevented());
    }

    #[test]
    fn empty_target_name_is_not_a_field_name() {
        let event = NativeEvent::new(EventKind::Input, TargetKind::Control(FieldKind::Text))
            .named("");
        assert_eq!(event.field_name(), None);
        assert_eq!(event.clone().named("email").field_name(), Some("email"));
    }
}
