use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::controller::{read_state, write_state};
use super::element::NativeEvent;
use super::session::ErrorSnapshot;
use super::submission::Response;

pub const DIRTY: &str = "dirty";
pub const PENDING: &str = "pending";
pub const ERROR: &str = "error";
pub const SUBMIT: &str = "submit";
pub const RESET: &str = "reset";

/// Payload carried by every emission.
#[derive(Clone, Debug)]
pub enum FormEvent {
    Dirty(bool),
    Pending(bool),
    /// A native `input`, `focus` or `change` event, forwarded as-is.
    Native(NativeEvent),
    Error(ErrorSnapshot),
    Submit(Response),
    Reset,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub u64);

pub type EventHandler = Arc<dyn Fn(&FormEvent) + Send + Sync>;

/// `"<base>.<field>"`, the name field-scoped subscribers listen on.
pub fn scoped_event_name(base: &str, field: &str) -> String {
    format!("{base}.{field}")
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    handlers: BTreeMap<String, Vec<(SubscriptionId, EventHandler)>>,
    closed: bool,
}

/// Synchronous publish/subscribe keyed by plain event names.
///
/// Handlers run on the emitting caller, in subscription order. Names are matched exactly;
/// a handler panic unwinds into the caller of [`EventBus::emit`].
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<RwLock<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event_name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&FormEvent) + Send + Sync + 'static,
    {
        let mut state = write_state(&self.state);
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        if !state.closed {
            state
                .handlers
                .entry(event_name.into())
                .or_default()
                .push((id, Arc::new(handler)));
        }
        id
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut state = write_state(&self.state);
        let mut removed = false;
        state.handlers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(entry, _)| *entry != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    pub fn emit(&self, event_name: &str, event: &FormEvent) {
        // Handlers are cloned out so they may subscribe or emit re-entrantly.
        let handlers = {
            let state = read_state(&self.state);
            if state.closed {
                return;
            }
            state
                .handlers
                .get(event_name)
                .map(|handlers| {
                    handlers
                        .iter()
                        .map(|(_, handler)| handler.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        tracing::trace!(event = event_name, subscribers = handlers.len(), "emit");
        for handler in handlers {
            handler(event);
        }
    }

    /// Emits on `base`, then on `base.field` when a field is implicated.
    pub fn emit_scoped(&self, base: &str, field: Option<&str>, event: &FormEvent) {
        self.emit(base, event);
        if let Some(field) = field {
            self.emit(&scoped_event_name(base, field), event);
        }
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        read_state(&self.state)
            .handlers
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Drops every handler; later subscriptions and emissions are ignored.
    pub fn close(&self) {
        let mut state = write_state(&self.state);
        state.closed = true;
        state.handlers.clear();
    }

    pub fn is_closed(&self) -> bool {
        read_state(&self.state).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &'static str| {
            let sink = sink.clone();
            Arc::new(move |_: &FormEvent| {
                sink.lock().expect("log lock").push(tag.to_string());
            }) as EventHandler
        };
        (log, make)
    }

    #[test]
    fn dispatches_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        bus.on("dirty", move |event| first(event));
        bus.on("dirty", move |event| second(event));

        bus.emit(DIRTY, &FormEvent::Dirty(true));
        assert_eq!(*log.lock().expect("log lock"), vec!["first", "second"]);
    }

    #[test]
    fn emitting_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit("nobody.listens", &FormEvent::Reset);
        assert_eq!(bus.subscriber_count("nobody.listens"), 0);
    }

    #[test]
    fn scoped_emission_hits_base_then_field_names_only() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let base = make("input");
        let scoped = make("input.username");
        let other = make("input.password");
        bus.on("input", move |event| base(event));
        bus.on("input.username", move |event| scoped(event));
        bus.on("input.password", move |event| other(event));

        bus.emit_scoped("input", Some("username"), &FormEvent::Reset);
        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["input", "input.username"]
        );
    }

    #[test]
    fn off_removes_only_that_subscription() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let kept = make("kept");
        let dropped = make("dropped");
        bus.on(RESET, move |event| kept(event));
        let id = bus.on(RESET, move |event| dropped(event));

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(RESET, &FormEvent::Reset);
        assert_eq!(*log.lock().expect("log lock"), vec!["kept"]);
    }

    #[test]
    fn closed_bus_stays_silent() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let handler = make("late");
        bus.close();
        bus.on(RESET, move |event| handler(event));
        bus.emit(RESET, &FormEvent::Reset);
        assert!(log.lock().expect("log lock").is_empty());
        assert!(bus.is_closed());
    }

    #[test]
    #[should_panic(expected = "handler failure")]
    fn handler_panics_reach_the_emitter() {
        let bus = EventBus::new();
        bus.on(ERROR, |_| panic!("handler failure"));
        bus.emit(ERROR, &FormEvent::Reset);
    }
}
