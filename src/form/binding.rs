use std::sync::{Arc, RwLock, Weak};

use super::bus::FormEvent;
use super::collector;
use super::controller::{ControllerInner, FormError, FormResult, write_lock, write_state};
use super::element::{
    ControlRef, Document, EventKind, EventSource, FieldKind, FormElement, ListenerId, NativeEvent,
    NativeListener, TargetKind,
};
use super::submission::SubmitOutcome;

const FORM_EVENTS: [EventKind; 6] = [
    EventKind::Input,
    EventKind::Focus,
    EventKind::Change,
    EventKind::Click,
    EventKind::Submit,
    EventKind::Reset,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Registration {
    Form(ListenerId),
    Document(ListenerId),
}

/// Native listener registrations owned by one controller.
#[derive(Default)]
pub(super) struct EventBinder {
    registrations: RwLock<Vec<Registration>>,
}

impl EventBinder {
    /// Registers the controller's listeners on its form and, when present, its document.
    pub(super) fn attach(inner: &Arc<ControllerInner>) -> FormResult<()> {
        let mut registrations = write_lock(&inner.binder.registrations, "attaching listeners")?;
        if !registrations.is_empty() {
            return Err(FormError::AlreadyBound(inner.form.form_id()));
        }

        let weak = Arc::downgrade(inner);
        for kind in FORM_EVENTS {
            let id = inner.form.add_listener(kind, listener(weak.clone()));
            registrations.push(Registration::Form(id));
        }
        if let Some(document) = inner.document.as_ref() {
            let id = document.add_listener(EventKind::Ready, listener(weak));
            registrations.push(Registration::Document(id));
        }
        tracing::trace!(
            form = %inner.form.form_id(),
            listeners = registrations.len(),
            "native listeners attached"
        );
        Ok(())
    }

    pub(super) fn detach(&self, form: &dyn FormElement, document: Option<&dyn Document>) {
        let registrations = std::mem::take(&mut *write_state(&self.registrations));
        for registration in registrations {
            match (registration, document) {
                (Registration::Form(id), _) => {
                    form.remove_listener(id);
                }
                (Registration::Document(id), Some(document)) => {
                    document.remove_listener(id);
                }
                (Registration::Document(_), None) => {}
            }
        }
    }
}

fn listener(inner: Weak<ControllerInner>) -> NativeListener {
    Arc::new(move |event: &NativeEvent| {
        if let Some(inner) = inner.upgrade() {
            inner.handle_native(event);
        }
    })
}

impl ControllerInner {
    pub(super) fn handle_native(self: &Arc<Self>, event: &NativeEvent) {
        if self.is_disposed() {
            return;
        }
        match event.kind {
            EventKind::Input | EventKind::Change => self.on_modified(event),
            EventKind::Focus => self.on_focus(event),
            EventKind::Click => self.on_click(event),
            EventKind::Submit => self.on_submit(event),
            EventKind::Reset => self.on_reset(),
            EventKind::Ready => {
                self.session.mark_pristine();
            }
        }
    }

    fn on_modified(self: &Arc<Self>, event: &NativeEvent) {
        let base = event.kind.as_str();
        let Some(name) = event.field_name() else {
            tracing::trace!(event = base, "event without a field name");
            self.bus.emit(base, &FormEvent::Native(event.clone()));
            return;
        };

        self.session.mark_dirty();
        self.bus
            .emit_scoped(base, Some(name), &FormEvent::Native(event.clone()));

        let snapshot = collector::collect(self.form.as_ref());
        let ticket = self.coordinator.issue_ticket(name);
        let name = name.to_string();
        let inner = self.clone();
        self.spawn(async move {
            inner
                .coordinator
                .validate_ticketed(&inner.session, &name, ticket, snapshot)
                .await;
        });
    }

    fn on_focus(&self, event: &NativeEvent) {
        self.bus.emit_scoped(
            event.kind.as_str(),
            event.field_name(),
            &FormEvent::Native(event.clone()),
        );
    }

    /// A click on a checkbox, or on a label bound to one, becomes a change of that checkbox
    /// observed after the host has toggled it.
    fn on_click(self: &Arc<Self>, event: &NativeEvent) {
        let name = match &event.target_kind {
            TargetKind::Control(FieldKind::Checkbox) => event.field_name(),
            TargetKind::Label { html_for } => html_for.as_deref(),
            _ => None,
        };
        let Some(control) = name
            .and_then(|name| self.form.control(&ControlRef::Name(name.to_string())))
            .filter(|control| control.kind() == FieldKind::Checkbox)
        else {
            return;
        };

        let inner = self.clone();
        self.spawn(async move {
            inner.handle_native(&NativeEvent::for_control(EventKind::Change, control.as_ref()));
        });
    }

    fn on_submit(self: &Arc<Self>, event: &NativeEvent) {
        event.prevent_default();
        let inner = self.clone();
        self.spawn(async move {
            match inner.run_submission().await {
                Ok(SubmitOutcome::Native) => inner.form.submit_natively(),
                Ok(outcome) => tracing::debug!(?outcome, "submission finished"),
                Err(FormError::AlreadySubmitting) => {}
                Err(error) => tracing::error!(%error, "submission could not run"),
            }
        });
    }

    fn on_reset(&self) {
        self.coordinator.invalidate_all();
        self.pipeline.abandon();
        self.session.reset();
    }
}
