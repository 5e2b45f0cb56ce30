//! # Strata Core
//!
//! The request contract shared by every Strata component.
//!
//! An *application* turns one request into one response. Every request gets a
//! single [`Env`] record that is shared by handle across the whole pipeline,
//! and every response is an `http::Response<Body>` whose [`Body`] may be a
//! finished byte sequence or a live, push-fed stream.
//!
//! ```text
//! ┌───────────┐     ┌──────────────────────────────┐     ┌────────────────┐
//! │ transport │────▶│ Env (method, uri, headers,   │────▶│  application   │
//! │ (external)│     │ input, errors, deadline, ext)│     │  graph         │
//! └───────────┘     └──────────────────────────────┘     └───────┬────────┘
//!       ▲                                                        │
//!       └──────────────── Response (status, headers, Body) ◀─────┘
//! ```
//!
//! This crate holds the data model only:
//! - [`Env`]: the per-request environment record and its [`Deadline`] field
//! - [`Body`] / [`BodySender`]: streaming payloads with push semantics
//! - [`Completion`]: the single-assignment result channel for callback-style
//!   applications
//! - [`response`]: response constructors and [`HeaderMapExt`] accessors
//!
//! Composition, timeouts and the concrete middleware live in
//! `strata-framework`.

pub mod body;
pub mod completion;
pub mod env;
pub mod error;
pub mod response;

pub use body::{Body, BodySender, BodyStream};
pub use completion::{Completion, PendingResponse, completion};
pub use env::{Deadline, Env};
pub use error::{BodyError, BodyResult, CompletionError};
pub use response::{HeaderMapExt, Response};

pub use bytes::Bytes;
pub use http;
