pub use crate::form::{
    BodyEncoder, BoxedTransportFuture, BoxedValidationFuture, CONTENT_TYPE, ControlRef, Document,
    ElementView, ErrorMap, EventKind, FieldKind, FieldValue, FileHandle, FormControl,
    FormController, FormData, FormElement, FormError, FormEvent, FormOptions, FormResult,
    FormTarget, InMemoryControl, InMemoryDocument, InMemoryForm, JSON, Method, NativeEvent,
    Request, Response, Rule, RuleSet, RuleSource, SubmitOutcome, SubmitState, Transport,
    TransportError, URL_ENCODED, ValidationEngine,
};
