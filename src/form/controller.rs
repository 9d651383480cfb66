use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::task::{Spawn, SpawnExt};
use serde::Deserialize;

use super::binding::EventBinder;
use super::bus::{EventBus, FormEvent, SubscriptionId};
use super::collector::{self, FieldValue, FormData};
use super::element::{
    ControlRef, Document, EventKind, EventSource, FieldKind, FileHandle, FormControl,
    FormElement, FormId, NativeEvent,
};
use super::session::FormSession;
use super::submission::{
    self, BodyEncoder, EncoderRegistry, Method, SubmissionPipeline, SubmitOutcome, SubmitState,
    SubmitTarget, Transport,
};
use super::validation::{
    AcceptAll, ErrorList, ErrorMap, FieldVerdict, NoRules, Rule, RuleSource, ValidationCoordinator,
    ValidationEngine,
};

static BOUND_FORMS: Mutex<BTreeSet<FormId>> = Mutex::new(BTreeSet::new());

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("form submission is already in progress")]
    AlreadySubmitting,
    #[error("no form named `{0}` in the document")]
    FormNotFound(String),
    #[error("form `{0}` was referenced by name but no document was supplied")]
    DocumentRequired(String),
    #[error("{0} is already bound to a controller")]
    AlreadyBound(FormId),
    #[error("form has no field named `{0}`")]
    UnknownField(String),
    #[error("field `{0}` cannot be written programmatically")]
    ReadOnlyField(String),
    #[error("enctype `{enctype}` is not supported for {method} submissions")]
    UnsupportedEncoding { enctype: String, method: String },
    #[error("automatic submission requires a transport")]
    MissingTransport,
    #[error("a task spawner is required to run validation and submission")]
    MissingSpawner,
    #[error("failed to encode request body: {0}")]
    Encoding(String),
    #[error("form controller has been disposed")]
    Disposed,
}

pub type FormResult<T> = Result<T, FormError>;

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    /// `false` leaves submission to the host once validation passes.
    pub submit: bool,
    /// Overrides the form's own enctype attribute.
    pub enctype: Option<String>,
    pub validation_debounce_ms: u64,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            submit: true,
            enctype: None,
            validation_debounce_ms: 0,
        }
    }
}

pub enum FormTarget {
    Element(Arc<dyn FormElement>),
    Named(String),
}

impl FormTarget {
    pub fn element(form: impl FormElement + 'static) -> Self {
        FormTarget::Element(Arc::new(form))
    }
}

impl From<Arc<dyn FormElement>> for FormTarget {
    fn from(value: Arc<dyn FormElement>) -> Self {
        FormTarget::Element(value)
    }
}

impl From<&str> for FormTarget {
    fn from(value: &str) -> Self {
        FormTarget::Named(value.to_string())
    }
}

impl From<String> for FormTarget {
    fn from(value: String) -> Self {
        FormTarget::Named(value)
    }
}

/// One control as seen by a renderer.
#[derive(Clone)]
pub struct ElementView {
    pub control: Arc<dyn FormControl>,
    pub name: String,
    pub errors: Option<ErrorList>,
    pub rule: Option<Rule>,
}

pub struct FormControllerBuilder {
    target: FormTarget,
    options: FormOptions,
    document: Option<Arc<dyn Document>>,
    engine: Option<Arc<dyn ValidationEngine>>,
    rules: Option<Arc<dyn RuleSource>>,
    transport: Option<Arc<dyn Transport>>,
    spawner: Option<Arc<dyn Spawn + Send + Sync>>,
    encoders: EncoderRegistry,
}

impl FormControllerBuilder {
    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn document(mut self, document: Arc<dyn Document>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn validation_engine(mut self, engine: Arc<dyn ValidationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn rules(mut self, rules: Arc<dyn RuleSource>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawn + Send + Sync>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn body_encoder(mut self, enctype: &str, encoder: Arc<dyn BodyEncoder>) -> Self {
        self.encoders.insert(submission::mime_essence(enctype), encoder);
        self
    }

    /// Resolves the form, checks the configuration and attaches the native listeners.
    pub fn bind(self) -> FormResult<FormController> {
        let form = match self.target {
            FormTarget::Element(form) => form,
            FormTarget::Named(name) => {
                let Some(document) = self.document.as_ref() else {
                    return Err(FormError::DocumentRequired(name));
                };
                document
                    .form_by_name(&name)
                    .ok_or(FormError::FormNotFound(name))?
            }
        };
        let spawner = self.spawner.ok_or(FormError::MissingSpawner)?;
        if self.options.submit && self.transport.is_none() {
            return Err(FormError::MissingTransport);
        }
        let enctype = effective_enctype(&self.options, form.as_ref());
        let method = Method::parse(&form.method());
        if self.options.submit && !submission::supports_encoding(&method, &enctype, &self.encoders)
        {
            return Err(FormError::UnsupportedEncoding {
                enctype,
                method: method.to_string(),
            });
        }

        let form_id = form.form_id();
        claim(form_id)?;

        let bus = EventBus::new();
        let coordinator = ValidationCoordinator::new(
            self.engine.unwrap_or_else(|| Arc::new(AcceptAll)),
            self.rules.unwrap_or_else(|| Arc::new(NoRules)),
            Duration::from_millis(self.options.validation_debounce_ms),
        );
        let pipeline = SubmissionPipeline::new(
            self.options.submit,
            self.transport,
            self.encoders,
            bus.clone(),
        );
        let inner = Arc::new(ControllerInner {
            options: self.options,
            form,
            document: self.document,
            session: FormSession::new(bus.clone()),
            bus,
            coordinator,
            pipeline,
            spawner,
            binder: EventBinder::default(),
            disposed: AtomicBool::new(false),
        });
        EventBinder::attach(&inner)?;
        tracing::debug!(form = %form_id, "form controller bound");
        Ok(FormController { inner })
    }
}

pub(super) struct ControllerInner {
    pub(super) options: FormOptions,
    pub(super) form: Arc<dyn FormElement>,
    pub(super) document: Option<Arc<dyn Document>>,
    pub(super) session: FormSession,
    pub(super) bus: EventBus,
    pub(super) coordinator: ValidationCoordinator,
    pub(super) pipeline: SubmissionPipeline,
    pub(super) spawner: Arc<dyn Spawn + Send + Sync>,
    pub(super) binder: EventBinder,
    pub(super) disposed: AtomicBool,
}

impl ControllerInner {
    pub(super) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(super) fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        if let Err(error) = self.spawner.spawn(task) {
            tracing::warn!(%error, "could not schedule form task");
        }
    }

    pub(super) fn enctype(&self) -> String {
        effective_enctype(&self.options, self.form.as_ref())
    }

    pub(super) fn submit_target(&self) -> SubmitTarget {
        SubmitTarget {
            method: Method::parse(&self.form.method()),
            url: self.form.action(),
            enctype: self.enctype(),
            data: collector::collect(self.form.as_ref()),
        }
    }

    pub(super) async fn run_submission(&self) -> FormResult<SubmitOutcome> {
        if self.is_disposed() {
            return Err(FormError::Disposed);
        }
        self.pipeline
            .run(&self.session, &self.coordinator, self.submit_target())
            .await
    }

    fn teardown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.binder.detach(self.form.as_ref(), self.document.as_deref());
        self.bus.close();
        release(self.form.form_id());
        tracing::debug!(form = %self.form.form_id(), "form controller disposed");
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Controller bound to exactly one form element.
///
/// Cloning is cheap and every clone drives the same session. Dropping the last clone
/// detaches the native listeners.
#[derive(Clone)]
pub struct FormController {
    pub(super) inner: Arc<ControllerInner>,
}

impl FormController {
    pub fn builder(target: impl Into<FormTarget>) -> FormControllerBuilder {
        FormControllerBuilder {
            target: target.into(),
            options: FormOptions::default(),
            document: None,
            engine: None,
            rules: None,
            transport: None,
            spawner: None,
            encoders: EncoderRegistry::new(),
        }
    }

    pub fn form_id(&self) -> FormId {
        self.inner.form.form_id()
    }

    pub fn options(&self) -> &FormOptions {
        &self.inner.options
    }

    pub fn on<F>(&self, event_name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&FormEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(event_name, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.bus.off(id)
    }

    pub fn is_pristine(&self) -> bool {
        self.inner.session.is_pristine()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.session.is_dirty()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.session.is_pending()
    }

    pub fn errors(&self) -> Option<ErrorMap> {
        self.inner.session.errors()
    }

    pub fn custom_errors(&self) -> Vec<String> {
        self.inner.session.custom_errors()
    }

    pub fn submit_state(&self) -> SubmitState {
        self.inner.pipeline.state()
    }

    pub fn data(&self) -> FormData {
        collector::collect(self.inner.form.as_ref())
    }

    pub fn to_query_string(&self) -> String {
        self.data().to_query_string()
    }

    pub fn url(&self) -> String {
        self.inner.form.action()
    }

    pub fn action(&self) -> String {
        self.inner.form.action()
    }

    pub fn method(&self) -> Method {
        Method::parse(&self.inner.form.method())
    }

    pub fn enctype(&self) -> String {
        self.inner.enctype()
    }

    pub fn rule(&self, name: &str) -> Option<Rule> {
        self.inner.coordinator.rule(name)
    }

    pub fn elements(&self) -> Vec<ElementView> {
        self.inner
            .form
            .controls()
            .into_iter()
            .map(|control| {
                let name = control.name();
                ElementView {
                    errors: self.inner.session.field_errors(&name),
                    rule: self.inner.coordinator.rule(&name),
                    name,
                    control,
                }
            })
            .collect()
    }

    /// Selected files of a file control, most recent first.
    pub fn files(&self, name: &str) -> Vec<FileHandle> {
        match self.field(name) {
            Some(control) if control.kind() == FieldKind::File => {
                collector::recent_first(control.files())
            }
            _ => Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<Arc<dyn FormControl>> {
        self.inner.form.control(&ControlRef::Name(name.to_string()))
    }

    /// Writes `value` into the named control and fires the matching native events.
    ///
    /// Without `event_type` an input and a change event fire; otherwise exactly the
    /// given one does.
    pub fn set_field(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
        event_type: Option<EventKind>,
    ) -> FormResult<Arc<dyn FormControl>> {
        if self.inner.is_disposed() {
            return Err(FormError::Disposed);
        }
        let control = self
            .field(name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))?;
        let value: FieldValue = value.into();
        match (control.kind(), value) {
            (FieldKind::File, _) => return Err(FormError::ReadOnlyField(name.to_string())),
            (FieldKind::Checkbox, value) => control.set_checked(value.is_truthy()),
            (_, FieldValue::Text(text)) => control.set_value(text),
            (_, value) => control.set_value(value.query_values().join(",")),
        }

        let kinds = match event_type {
            Some(kind) => vec![kind],
            None => vec![EventKind::Input, EventKind::Change],
        };
        for kind in kinds {
            self.inner
                .form
                .dispatch(NativeEvent::for_control(kind, control.as_ref()));
        }
        Ok(control)
    }

    /// Focuses a control by index or name; no-op when it does not exist.
    pub fn focus(&self, target: impl Into<ControlRef>) -> &Self {
        if let Some(control) = self.inner.form.control(&target.into()) {
            control.focus();
        }
        self
    }

    pub fn set_custom_errors(&self, errors: Vec<String>) {
        self.inner.session.set_custom_errors(errors);
    }

    pub fn reset_custom_errors(&self) {
        self.inner.session.reset_custom_errors();
    }

    /// Runs the submission pipeline, exactly as a native submit event would.
    pub async fn submit(&self) -> FormResult<SubmitOutcome> {
        self.inner.run_submission().await
    }

    /// Whole-form validation applied to the session; true when the form is valid.
    pub async fn validate(&self) -> FormResult<bool> {
        if self.inner.is_disposed() {
            return Err(FormError::Disposed);
        }
        let errors = self.inner.coordinator.validate_form(self.data()).await;
        let valid = errors.is_none();
        match errors {
            Some(errors) => self.inner.session.set_errors(Some(errors)),
            None => {
                self.inner.session.clear_errors();
            }
        }
        Ok(valid)
    }

    /// Validates one field against the current values.
    ///
    /// The call is sequenced when it is made, so a later call always wins over this one.
    pub fn validate_field<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Future<Output = FormResult<FieldVerdict>> + Send + 'a {
        let call = if self.inner.is_disposed() {
            Err(FormError::Disposed)
        } else if self.field(name).is_none() {
            Err(FormError::UnknownField(name.to_string()))
        } else {
            Ok(self
                .inner
                .coordinator
                .validate_field(&self.inner.session, name, self.data()))
        };
        async move {
            match call {
                Ok(call) => Ok(call.await),
                Err(error) => Err(error),
            }
        }
    }

    /// Asks the form to reset; the resulting native reset event resets the session.
    pub fn reset(&self) {
        if !self.inner.is_disposed() {
            self.inner.form.reset();
        }
    }

    /// Detaches every listener and silences the bus. Idempotent.
    pub fn dispose(&self) {
        self.inner.teardown();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

fn effective_enctype(options: &FormOptions, form: &dyn FormElement) -> String {
    if let Some(enctype) = options.enctype.as_ref().filter(|e| !e.trim().is_empty()) {
        return enctype.clone();
    }
    let own = form.enctype();
    if own.trim().is_empty() {
        submission::URL_ENCODED.to_string()
    } else {
        own
    }
}

fn claim(form_id: FormId) -> FormResult<()> {
    let mut bound = BOUND_FORMS
        .lock()
        .map_err(|_| FormError::StatePoisoned("claiming form"))?;
    if !bound.insert(form_id) {
        return Err(FormError::AlreadyBound(form_id));
    }
    Ok(())
}

fn release(form_id: FormId) {
    let mut bound = match BOUND_FORMS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    bound.remove(&form_id);
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

/// Read access for state whose accessors cannot fail; a poisoned lock still yields its data.
pub(super) fn read_state<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(super) fn write_state<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
