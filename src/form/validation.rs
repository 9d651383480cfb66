use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_timer::Delay;
use serde::{Deserialize, Serialize};

use super::collector::FormData;
use super::controller::{read_state, write_state};
use super::session::FormSession;

pub type ErrorList = Vec<String>;
pub type ErrorMap = BTreeMap<String, ErrorList>;

/// Rule description resolved by field name. The controller never looks inside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rule(pub serde_json::Value);

impl Rule {
    pub fn new(description: serde_json::Value) -> Self {
        Self(description)
    }

    pub fn description(&self) -> &serde_json::Value {
        &self.0
    }
}

pub type RuleSet = BTreeMap<String, Rule>;

pub trait RuleSource: Send + Sync {
    fn rule(&self, field: &str) -> Option<Rule>;
}

impl RuleSource for RuleSet {
    fn rule(&self, field: &str) -> Option<Rule> {
        self.get(field).cloned()
    }
}

impl RuleSource for HashMap<String, Rule> {
    fn rule(&self, field: &str) -> Option<Rule> {
        self.get(field).cloned()
    }
}

pub(super) struct NoRules;

impl RuleSource for NoRules {
    fn rule(&self, _field: &str) -> Option<Rule> {
        None
    }
}

pub type BoxedValidationFuture<'a> = Pin<Box<dyn Future<Output = Option<ErrorMap>> + Send + 'a>>;

/// Evaluates values against rules. `None` (or an empty map) means no errors.
pub trait ValidationEngine: Send + Sync {
    fn validate(&self, values: FormData, rules: RuleSet) -> BoxedValidationFuture<'static>;

    /// Whether a clean field validation also clears the session's custom errors.
    fn clears_custom_errors(&self) -> bool {
        false
    }
}

impl<F, Fut> ValidationEngine for F
where
    F: Fn(FormData, RuleSet) -> Fut + Send + Sync,
    Fut: Future<Output = Option<ErrorMap>> + Send + 'static,
{
    fn validate(&self, values: FormData, rules: RuleSet) -> BoxedValidationFuture<'static> {
        Box::pin((self)(values, rules))
    }
}

pub(super) struct AcceptAll;

impl ValidationEngine for AcceptAll {
    fn validate(&self, _values: FormData, _rules: RuleSet) -> BoxedValidationFuture<'static> {
        Box::pin(async { None::<ErrorMap> })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

/// Result of one field validation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldVerdict {
    pub ticket: ValidationTicket,
    pub errors: Option<ErrorList>,
    /// False when a newer call for the same field was issued before this one resolved.
    pub applied: bool,
}

/// Drives the validation engine and keeps per-field results ordered by issue time.
pub struct ValidationCoordinator {
    engine: Arc<dyn ValidationEngine>,
    rules: Arc<dyn RuleSource>,
    debounce: Duration,
    next_ticket: AtomicU64,
    tickets: RwLock<BTreeMap<String, ValidationTicket>>,
}

impl ValidationCoordinator {
    pub fn new(
        engine: Arc<dyn ValidationEngine>,
        rules: Arc<dyn RuleSource>,
        debounce: Duration,
    ) -> Self {
        Self {
            engine,
            rules,
            debounce,
            next_ticket: AtomicU64::new(1),
            tickets: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn rule(&self, field: &str) -> Option<Rule> {
        self.rules.rule(field)
    }

    /// Rules for every field present in `snapshot`.
    pub fn rules_for(&self, snapshot: &FormData) -> RuleSet {
        snapshot
            .names()
            .filter_map(|name| self.rules.rule(name).map(|rule| (name.to_string(), rule)))
            .collect()
    }

    pub fn issue_ticket(&self, field: &str) -> ValidationTicket {
        let ticket = ValidationTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst));
        let mut tickets = write_state(&self.tickets);
        tickets.insert(field.to_string(), ticket);
        ticket
    }

    pub fn is_latest(&self, field: &str, ticket: ValidationTicket) -> bool {
        let tickets = read_state(&self.tickets);
        tickets.get(field).copied() == Some(ticket)
    }

    /// Forgets every issued ticket, so nothing in flight will be applied.
    pub fn invalidate_all(&self) {
        let mut tickets = write_state(&self.tickets);
        tickets.clear();
    }

    /// Validates one field and applies the result to `session` if it is still the latest
    /// call for that field when it resolves.
    ///
    /// The ticket is issued here, before the returned future is first polled, so calls
    /// are ordered by when they were made rather than by when an executor runs them.
    pub fn validate_field<'a>(
        &'a self,
        session: &'a FormSession,
        name: &'a str,
        snapshot: FormData,
    ) -> impl Future<Output = FieldVerdict> + Send + 'a {
        let ticket = self.issue_ticket(name);
        self.validate_ticketed(session, name, ticket, snapshot)
    }

    /// Runs a field validation under a ticket obtained from [`Self::issue_ticket`].
    pub async fn validate_ticketed(
        &self,
        session: &FormSession,
        name: &str,
        ticket: ValidationTicket,
        snapshot: FormData,
    ) -> FieldVerdict {
        if !self.debounce.is_zero() {
            Delay::new(self.debounce).await;
            if !self.is_latest(name, ticket) {
                tracing::debug!(field = name, ticket = ticket.0, "debounced validation superseded");
                return FieldVerdict {
                    ticket,
                    errors: None,
                    applied: false,
                };
            }
        }

        let rules = self
            .rules
            .rule(name)
            .map(|rule| RuleSet::from([(name.to_string(), rule)]))
            .unwrap_or_default();
        let errors = self
            .engine
            .validate(snapshot, rules)
            .await
            .and_then(|mut map| map.remove(name))
            .filter(|errors| !errors.is_empty());

        if !self.is_latest(name, ticket) {
            tracing::debug!(field = name, ticket = ticket.0, "discarding stale validation result");
            return FieldVerdict {
                ticket,
                errors,
                applied: false,
            };
        }

        let clean = errors.is_none();
        session.set_field_errors(name, errors.clone());
        if clean && self.engine.clears_custom_errors() && !session.custom_errors().is_empty() {
            session.set_custom_errors(Vec::new());
        }
        FieldVerdict {
            ticket,
            errors,
            applied: true,
        }
    }

    /// Whole-form validation. Not sequenced; the caller applies the result.
    pub async fn validate_form(&self, snapshot: FormData) -> Option<ErrorMap> {
        let rules = self.rules_for(&snapshot);
        self.engine
            .validate(snapshot, rules)
            .await
            .map(|map| {
                map.into_iter()
                    .filter(|(_, errors)| !errors.is_empty())
                    .collect::<ErrorMap>()
            })
            .filter(|map| !map.is_empty())
    }
}
