use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use super::bus::{self, EventBus, FormEvent};
use super::collector::FormData;
use super::controller::{FormError, FormResult, read_state, write_lock, write_state};
use super::session::FormSession;
use super::validation::{ErrorMap, ValidationCoordinator};

pub const JSON: &str = "application/json";
pub const URL_ENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART: &str = "multipart/form-data";
pub const CONTENT_TYPE: &str = "Content-Type";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Other(String),
}

impl Method {
    /// Parses a form's method attribute; empty means GET.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "get" => Method::Get,
            "head" => Method::Head,
            "post" => Method::Post,
            "put" => Method::Put,
            "patch" => Method::Patch,
            "delete" => Method::Delete,
            _ => Method::Other(trimmed.to_ascii_uppercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Other(other) => other,
        }
    }

    /// Methods whose values travel as request parameters instead of a body.
    pub fn is_get_like(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub params: Vec<(String, String)>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Text recorded as a custom error for a non-success response.
    pub fn failure_message(&self) -> String {
        if self.status_text.trim().is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("{} ({})", self.status_text, self.status)
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

pub type BoxedTransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;

/// Sends a built request. Timeouts and retries are the transport's business.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> BoxedTransportFuture<'static>;
}

impl<F, Fut> Transport for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    fn send(&self, request: Request) -> BoxedTransportFuture<'static> {
        Box::pin((self)(request))
    }
}

/// Body encoding for an enctype the pipeline does not handle itself, e.g. multipart.
pub trait BodyEncoder: Send + Sync {
    fn encode(&self, data: &FormData) -> FormResult<Vec<u8>>;
}

impl<F> BodyEncoder for F
where
    F: Fn(&FormData) -> FormResult<Vec<u8>> + Send + Sync,
{
    fn encode(&self, data: &FormData) -> FormResult<Vec<u8>> {
        (self)(data)
    }
}

pub type EncoderRegistry = BTreeMap<String, Arc<dyn BodyEncoder>>;

/// Lower-cased MIME type without parameters.
pub fn mime_essence(enctype: &str) -> String {
    enctype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether a request for `method` with `enctype` can be built at all.
pub fn supports_encoding(method: &Method, enctype: &str, encoders: &EncoderRegistry) -> bool {
    let essence = mime_essence(enctype);
    method.is_get_like()
        || essence == JSON
        || essence == URL_ENCODED
        || encoders.contains_key(&essence)
}

pub fn build_request(
    method: Method,
    url: impl Into<String>,
    enctype: &str,
    data: &FormData,
    encoders: &EncoderRegistry,
) -> FormResult<Request> {
    let mut request = Request {
        method,
        url: url.into(),
        headers: BTreeMap::from([(CONTENT_TYPE.to_string(), enctype.to_string())]),
        body: None,
        params: Vec::new(),
    };

    if request.method.is_get_like() {
        request.params = data.query_pairs();
        return Ok(request);
    }

    let essence = mime_essence(enctype);
    request.body = Some(match essence.as_str() {
        JSON => serde_json::to_vec(data).map_err(|error| FormError::Encoding(error.to_string()))?,
        URL_ENCODED => data.to_query_string().into_bytes(),
        _ => match encoders.get(&essence) {
            Some(encoder) => encoder.encode(data)?,
            None => {
                return Err(FormError::UnsupportedEncoding {
                    enctype: enctype.to_string(),
                    method: request.method.to_string(),
                });
            }
        },
    });
    Ok(request)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Aborted,
    Requesting,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Whole-form validation failed; nothing was sent.
    Aborted(ErrorMap),
    /// Validation passed and automatic submission is off; the host submits natively.
    Native,
    Succeeded(Response),
    /// Transport or status failure; the message was appended to the custom errors.
    Failed(String),
    /// The session was reset while the request was in flight; its outcome was dropped.
    Discarded,
}

/// What one run submits: the target attributes and the snapshot it validates and sends.
#[derive(Clone, Debug)]
pub struct SubmitTarget {
    pub method: Method,
    pub url: String,
    pub enctype: String,
    pub data: FormData,
}

/// The submit state together with the run that currently owns it.
#[derive(Debug)]
struct RunSlot {
    state: SubmitState,
    run: u64,
}

pub struct SubmissionPipeline {
    slot: RwLock<RunSlot>,
    automatic: bool,
    transport: Option<Arc<dyn Transport>>,
    encoders: EncoderRegistry,
    bus: EventBus,
}

impl SubmissionPipeline {
    pub fn new(
        automatic: bool,
        transport: Option<Arc<dyn Transport>>,
        encoders: EncoderRegistry,
        bus: EventBus,
    ) -> Self {
        Self {
            slot: RwLock::new(RunSlot {
                state: SubmitState::Idle,
                run: 0,
            }),
            automatic,
            transport,
            encoders,
            bus,
        }
    }

    pub fn state(&self) -> SubmitState {
        read_state(&self.slot).state
    }

    /// Releases the pipeline from a run that a session reset orphaned.
    ///
    /// The orphaned run keeps going until its current await resolves, then discards its
    /// outcome without touching the state of whichever run owns the pipeline by then.
    pub fn abandon(&self) {
        let mut slot = write_state(&self.slot);
        slot.run += 1;
        if slot.state != SubmitState::Idle {
            tracing::debug!(state = ?slot.state, "abandoning submission after reset");
            slot.state = SubmitState::Idle;
        }
    }

    pub async fn run(
        &self,
        session: &FormSession,
        coordinator: &ValidationCoordinator,
        target: SubmitTarget,
    ) -> FormResult<SubmitOutcome> {
        let run = {
            let mut slot = write_lock(&self.slot, "starting submission")?;
            if slot.state != SubmitState::Idle || session.is_pending() {
                tracing::warn!(state = ?slot.state, "submission already in progress, rejecting");
                return Err(FormError::AlreadySubmitting);
            }
            transition(&mut slot.state, SubmitState::Validating)?;
            slot.run += 1;
            slot.run
        };
        let generation = session.generation();

        let errors = coordinator.validate_form(target.data.clone()).await;

        if session.generation() != generation {
            tracing::debug!("session reset while validating, dropping outcome");
            self.finish(run, SubmitState::Idle)?;
            return Ok(SubmitOutcome::Discarded);
        }
        if let Some(errors) = errors {
            tracing::debug!(fields = errors.len(), "submission aborted by validation");
            session.set_errors(Some(errors.clone()));
            self.finish(run, SubmitState::Aborted)?;
            return Ok(SubmitOutcome::Aborted(errors));
        }
        session.clear_errors();

        if !self.automatic {
            self.finish(run, SubmitState::Idle)?;
            return Ok(SubmitOutcome::Native);
        }

        let request = match self.prepare(&target) {
            Ok(request) => request,
            Err(error) => {
                self.finish(run, SubmitState::Idle)?;
                return Err(error);
            }
        };
        let Some(transport) = self.transport.clone() else {
            self.finish(run, SubmitState::Idle)?;
            return Err(FormError::MissingTransport);
        };

        self.advance(run, SubmitState::Requesting)?;
        session.set_pending(true);
        tracing::debug!(method = %request.method, url = %request.url, "sending form");

        let result = transport.send(request).await;

        if session.generation() != generation {
            tracing::debug!("session reset while request was in flight, dropping outcome");
            self.finish(run, SubmitState::Idle)?;
            return Ok(SubmitOutcome::Discarded);
        }

        match result {
            Ok(response) if response.is_success() => {
                session.set_pending(false);
                self.bus
                    .emit(bus::SUBMIT, &FormEvent::Submit(response.clone()));
                self.finish(run, SubmitState::Succeeded)?;
                Ok(SubmitOutcome::Succeeded(response))
            }
            Ok(response) => {
                let message = response.failure_message();
                tracing::warn!(status = response.status, "form submission rejected by server");
                self.fail(run, session, message)
            }
            Err(error) => {
                tracing::warn!(%error, "form submission failed");
                self.fail(run, session, error.to_string())
            }
        }
    }

    fn prepare(&self, target: &SubmitTarget) -> FormResult<Request> {
        build_request(
            target.method.clone(),
            target.url.clone(),
            &target.enctype,
            &target.data,
            &self.encoders,
        )
    }

    fn fail(&self, run: u64, session: &FormSession, message: String) -> FormResult<SubmitOutcome> {
        session.set_pending(false);
        session.push_custom_error(message.clone());
        self.finish(run, SubmitState::Failed)?;
        Ok(SubmitOutcome::Failed(message))
    }

    fn advance(&self, run: u64, next: SubmitState) -> FormResult<()> {
        let mut slot = write_lock(&self.slot, "advancing submission")?;
        if slot.run != run {
            return Ok(());
        }
        transition(&mut slot.state, next)
    }

    /// Moves through the terminal state (if any) back to idle, unless another run owns
    /// the pipeline by now.
    fn finish(&self, run: u64, terminal: SubmitState) -> FormResult<()> {
        let mut slot = write_lock(&self.slot, "finishing submission")?;
        if slot.run != run {
            return Ok(());
        }
        transition(&mut slot.state, terminal)?;
        transition(&mut slot.state, SubmitState::Idle)
    }
}

pub(super) fn transition(state: &mut SubmitState, next: SubmitState) -> FormResult<()> {
    let current = *state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Aborted)
            | (SubmitState::Validating, SubmitState::Requesting)
            | (SubmitState::Requesting, SubmitState::Succeeded)
            | (SubmitState::Requesting, SubmitState::Failed)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    tracing::trace!(from = ?current, to = ?next, "submit state");
    *state = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> FormData {
        let mut data = FormData::new();
        data.insert("username", "joe".into());
        data.insert("remember", true.into());
        data
    }

    #[test]
    fn method_parsing_defaults_to_get() {
        assert_eq!(Method::parse(""), Method::Get);
        assert_eq!(Method::parse("post"), Method::Post);
        assert_eq!(Method::parse(" PUT "), Method::Put);
        assert_eq!(Method::parse("purge"), Method::Other("PURGE".into()));
        assert!(Method::Head.is_get_like());
        assert!(!Method::Delete.is_get_like());
    }

    #[test]
    fn json_body_carries_every_value() {
        let request = build_request(Method::Post, "/login", JSON, &data(), &EncoderRegistry::new())
            .expect("json request");
        assert_eq!(request.headers[CONTENT_TYPE], JSON);
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"username":"joe","remember":true}"#.as_slice())
        );
        assert!(request.params.is_empty());
    }

    #[test]
    fn url_encoded_body_matches_query_string() {
        let request = build_request(
            Method::Post,
            "/login",
            "application/x-www-form-urlencoded; charset=UTF-8",
            &data(),
            &EncoderRegistry::new(),
        )
        .expect("url-encoded request");
        assert_eq!(
            request.body.as_deref(),
            Some(b"username=joe&remember=true".as_slice())
        );
    }

    #[test]
    fn get_sends_params_and_no_body_for_any_enctype() {
        let request = build_request(
            Method::Get,
            "/search",
            "text/unknown",
            &data(),
            &EncoderRegistry::new(),
        )
        .expect("get request");
        assert_eq!(request.body, None);
        assert_eq!(
            request.params,
            vec![
                ("username".to_string(), "joe".to_string()),
                ("remember".to_string(), "true".to_string())
            ]
        );
    }

    #[test]
    fn unknown_encoding_is_a_configuration_error() {
        let error = build_request(Method::Post, "/upload", MULTIPART, &data(), &EncoderRegistry::new())
            .expect_err("multipart without encoder");
        assert!(matches!(error, FormError::UnsupportedEncoding { .. }));
        assert!(!supports_encoding(&Method::Post, MULTIPART, &EncoderRegistry::new()));
    }

    #[test]
    fn registered_encoder_handles_extra_enctypes() {
        let mut encoders = EncoderRegistry::new();
        encoders.insert(
            MULTIPART.to_string(),
            Arc::new(|data: &FormData| {
                Ok::<_, FormError>(format!("{} parts", data.len()).into_bytes())
            }),
        );
        let request = build_request(Method::Post, "/upload", "Multipart/Form-Data", &data(), &encoders)
            .expect("multipart request");
        assert_eq!(request.body.as_deref(), Some(b"2 parts".as_slice()));
    }

    #[test]
    fn failure_message_combines_status_text_and_code() {
        assert_eq!(
            Response::new(503, "Service Unavailable", "").failure_message(),
            "Service Unavailable (503)"
        );
        assert_eq!(Response::new(418, "", "").failure_message(), "HTTP 418");
        assert!(Response::new(204, "No Content", "").is_success());
        assert!(!Response::new(302, "Found", "").is_success());
    }

    #[test]
    fn transitions_follow_the_pipeline() {
        let mut state = SubmitState::Idle;
        transition(&mut state, SubmitState::Validating).expect("idle -> validating");
        assert!(matches!(
            transition(&mut state, SubmitState::Succeeded),
            Err(FormError::InvalidStateTransition { .. })
        ));
        transition(&mut state, SubmitState::Requesting).expect("validating -> requesting");
        transition(&mut state, SubmitState::Failed).expect("requesting -> failed");
        transition(&mut state, SubmitState::Idle).expect("failed -> idle");
    }
}
