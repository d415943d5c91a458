// src/core/dispatch/mod.rs

//! Correlates asynchronous replies with the requests that caused them.
//!
//! Each in-flight request registers exactly one `ResponseHandler` under its
//! `RequestKey`. The channel's read loop hands every incoming message to
//! `HandlerRegistry::dispatch`; arrival order is irrelevant, only the key
//! decides the match. Messages that match nothing are not errors: backends
//! emit unsolicited pushes, and those are returned to the read loop.

mod handler;
mod registry;

pub use handler::{
    AwaitHandler, Completion, ForwardHandler, HandlerProgress, HandlerResult, ResponseHandler,
    is_final_part,
};
pub use registry::{Generation, HandlerRegistry, RequestKey};
