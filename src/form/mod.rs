mod binding;
mod bus;
mod collector;
mod controller;
mod element;
mod memory;
mod session;
mod submission;
mod validation;


pub use bus::{
    DIRTY, ERROR, EventBus, EventHandler, FormEvent, PENDING, RESET, SUBMIT, SubscriptionId,
    scoped_event_name,
};
pub use collector::{FieldValue, FormData, collect, control_value};
pub use controller::{
    ElementView, FormController, FormControllerBuilder, FormError, FormOptions, FormResult,
    FormTarget,
};
pub use element::{
    ControlRef, Document, EventKind, EventSource, FieldKind, FileHandle, FormControl, FormElement,
    FormId, ListenerId, NativeEvent, NativeListener, TargetKind,
};
pub use memory::{InMemoryControl, InMemoryDocument, InMemoryForm};
pub use session::{ErrorSnapshot, FormSession};
pub use submission::{
    BodyEncoder, BoxedTransportFuture, CONTENT_TYPE, EncoderRegistry, JSON, MULTIPART, Method,
    Request, Response, SubmissionPipeline, SubmitOutcome, SubmitState, SubmitTarget, Transport,
    TransportError, URL_ENCODED, build_request, mime_essence, supports_encoding,
};
pub use validation::{
    BoxedValidationFuture, ErrorList, ErrorMap, FieldVerdict, Rule, RuleSet, RuleSource,
    ValidationCoordinator, ValidationEngine, ValidationTicket,
};
