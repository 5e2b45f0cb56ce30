//! Single-assignment completion channel.
//!
//! Callback-style applications receive a [`Completion`] and must fulfil it
//! exactly once. Fulfilling consumes the handle, so a second call does not
//! type-check; dropping it unfulfilled is a protocol violation that is logged
//! and surfaced to the waiting side as [`CompletionError::Dropped`] rather
//! than leaving the request pending forever.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;
use tracing::{error, trace};

use crate::body::Body;
use crate::error::CompletionError;
use crate::response::Response;

/// Creates a linked completion/pending pair.
pub fn completion() -> (Completion, PendingResponse) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx: Some(tx) }, PendingResponse { rx })
}

/// The fulfilling half: invoke once with the final response.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<Response>>,
}

impl Completion {
    /// Delivers the response.
    pub fn complete(mut self, response: Response) {
        if let Some(tx) = self.tx.take() {
            if tx.send(response).is_err() {
                trace!("completion receiver gone, response discarded");
            }
        }
    }

    /// Delivers a response assembled from its parts.
    pub fn respond(self, status: StatusCode, headers: HeaderMap, body: impl Into<Body>) {
        let mut response = http::Response::new(body.into());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        self.complete(response);
    }

    /// Returns `true` if nobody is waiting for the response any more.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            error!("completion dropped without a response");
        }
    }
}

/// The waiting half: resolves once the completion is fulfilled or dropped.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl Future for PendingResponse {
    type Output = Result<Response, CompletionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| CompletionError::Dropped))
    }
}
