//! Headless controller for client-side forms.
//!
//! A [`form::FormController`] binds to one form element supplied by the host, tracks its
//! lifecycle (pristine/dirty, pending, errors), validates fields as the user edits them and
//! drives submission through an injected transport.

pub mod form;
pub mod prelude;
