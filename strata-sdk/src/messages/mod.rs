//! Boundary messages
//!
//! Typed request payloads, the tagged response union, and the dispatcher
//! that routes an [`Envelope`] to the handler registered for its type.

mod dispatcher;
mod types;

pub use dispatcher::{Dispatcher, Handler, HandlerFuture, Services};
pub use types::*;
