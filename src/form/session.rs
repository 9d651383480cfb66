use std::sync::RwLock;

use serde::Serialize;

use super::bus::{self, EventBus, FormEvent};
use super::controller::{read_state, write_state};
use super::validation::{ErrorList, ErrorMap};

/// Error state carried by every `"error"` emission.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ErrorSnapshot {
    pub fields: Option<ErrorMap>,
    pub custom: Vec<String>,
}

#[derive(Clone, Debug)]
struct SessionState {
    pristine: bool,
    pending: bool,
    errors: Option<ErrorMap>,
    custom_errors: Vec<String>,
    generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            pristine: true,
            pending: false,
            errors: None,
            custom_errors: Vec::new(),
            generation: 0,
        }
    }
}

/// Lifecycle state of one bound form.
///
/// Every mutator updates the state first and emits afterwards, with no lock held while
/// handlers run, so handlers may read the session they are notified about.
pub struct FormSession {
    state: RwLock<SessionState>,
    bus: EventBus,
}

impl FormSession {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            bus,
        }
    }

    pub fn is_pristine(&self) -> bool {
        read_state(&self.state).pristine
    }

    pub fn is_dirty(&self) -> bool {
        !self.is_pristine()
    }

    pub fn is_pending(&self) -> bool {
        read_state(&self.state).pending
    }

    pub fn errors(&self) -> Option<ErrorMap> {
        read_state(&self.state).errors.clone()
    }

    pub fn field_errors(&self, name: &str) -> Option<ErrorList> {
        read_state(&self.state)
            .errors
            .as_ref()
            .and_then(|errors| errors.get(name).cloned())
    }

    pub fn custom_errors(&self) -> Vec<String> {
        read_state(&self.state).custom_errors.clone()
    }

    pub fn error_snapshot(&self) -> ErrorSnapshot {
        let state = read_state(&self.state);
        ErrorSnapshot {
            fields: state.errors.clone(),
            custom: state.custom_errors.clone(),
        }
    }

    /// Bumped by every reset; work started before a reset compares against it.
    pub fn generation(&self) -> u64 {
        read_state(&self.state).generation
    }

    /// Marks the session dirty. Emits `"dirty"` only on the pristine → dirty edge.
    pub fn mark_dirty(&self) -> bool {
        {
            let mut state = write_state(&self.state);
            if !state.pristine {
                return false;
            }
            state.pristine = false;
        }
        tracing::debug!("form session became dirty");
        self.bus.emit(bus::DIRTY, &FormEvent::Dirty(true));
        true
    }

    /// Marks the session pristine. Emits `"dirty"` only on the dirty → pristine edge.
    pub fn mark_pristine(&self) -> bool {
        {
            let mut state = write_state(&self.state);
            if state.pristine {
                return false;
            }
            state.pristine = true;
        }
        self.bus.emit(bus::DIRTY, &FormEvent::Dirty(false));
        true
    }

    pub fn set_pending(&self, pending: bool) {
        write_state(&self.state).pending = pending;
        tracing::debug!(pending, "form session pending changed");
        self.bus.emit(bus::PENDING, &FormEvent::Pending(pending));
    }

    /// Replaces the whole error map in one step and emits `"error"`.
    pub fn set_errors(&self, errors: Option<ErrorMap>) {
        write_state(&self.state).errors = errors.filter(|errors| !errors.is_empty());
        self.emit_errors();
    }

    /// Clears the error map; emits only if there was something to clear.
    pub fn clear_errors(&self) -> bool {
        if write_state(&self.state).errors.take().is_none() {
            return false;
        }
        self.emit_errors();
        true
    }

    /// Updates a single field's entry, leaving every other key untouched.
    pub fn set_field_errors(&self, name: &str, errors: Option<ErrorList>) {
        {
            let mut state = write_state(&self.state);
            match errors.filter(|errors| !errors.is_empty()) {
                Some(errors) => {
                    state
                        .errors
                        .get_or_insert_with(ErrorMap::new)
                        .insert(name.to_string(), errors);
                }
                None => {
                    if let Some(map) = state.errors.as_mut() {
                        map.remove(name);
                        if map.is_empty() {
                            state.errors = None;
                        }
                    }
                }
            }
        }
        self.emit_errors();
    }

    pub fn set_custom_errors(&self, errors: Vec<String>) {
        write_state(&self.state).custom_errors = errors;
        self.emit_errors();
    }

    pub fn push_custom_error(&self, error: impl Into<String>) {
        write_state(&self.state).custom_errors.push(error.into());
        self.emit_errors();
    }

    /// Clears custom errors without emitting.
    pub fn reset_custom_errors(&self) {
        write_state(&self.state).custom_errors.clear();
    }

    /// Back to `{pristine, not pending, no errors, no custom errors}`.
    ///
    /// Emits `"dirty"` and `"pending"` for the flags that actually changed, then `"reset"`.
    pub fn reset(&self) {
        let previous = {
            let mut state = write_state(&self.state);
            let generation = state.generation + 1;
            std::mem::replace(
                &mut *state,
                SessionState {
                    generation,
                    ..SessionState::default()
                },
            )
        };
        tracing::debug!(generation = previous.generation + 1, "form session reset");
        if !previous.pristine {
            self.bus.emit(bus::DIRTY, &FormEvent::Dirty(false));
        }
        if previous.pending {
            self.bus.emit(bus::PENDING, &FormEvent::Pending(false));
        }
        self.bus.emit(bus::RESET, &FormEvent::Reset);
    }

    fn emit_errors(&self) {
        let snapshot = self.error_snapshot();
        self.bus.emit(bus::ERROR, &FormEvent::Error(snapshot));
    }
}
