//! The per-request environment record.
//!
//! One [`Env`] is created for every inbound request and handed, by cheap
//! handle clone, to every application and middleware in the pipeline. All
//! holders observe the same record: a method rewritten by one middleware or a
//! deadline raised by a handler is immediately visible to everyone else.
//!
//! ```text
//! request ──▶ Env ──▶ M1 ──▶ M2 ──▶ app
//!              ▲       │      │      │
//!              └───────┴──────┴──────┘   (same record, shared by Arc)
//! ```
//!
//! Accessors return owned values rather than guards so that no caller can hold
//! a stale read of a mutable field across a suspension point.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version, header::AsHeaderName};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::error;

use crate::body::Body;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// The mutable deadline field read by the timeout supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    /// No deadline chosen yet; the supervisor applies its default.
    #[default]
    Unset,
    /// Respond within this duration of the supervisor being invoked.
    After(Duration),
    /// The watchdog is permanently inert for this request.
    Disabled,
}

impl Deadline {
    /// Returns the duration if the deadline is active.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::After(d) => Some(*d),
            _ => None,
        }
    }
}

struct Head {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

struct Inner {
    id: u64,
    version: Version,
    head: Mutex<Head>,
    input: Mutex<Option<Body>>,
    errors: Mutex<Vec<String>>,
    deadline: watch::Sender<Deadline>,
    extensions: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

/// Shared handle to the environment record of one request.
#[derive(Clone)]
pub struct Env {
    inner: Arc<Inner>,
}

impl Env {
    /// Creates the environment for an inbound request.
    pub fn new(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let (deadline, _) = watch::channel(Deadline::Unset);

        Self {
            inner: Arc::new(Inner {
                id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                version: parts.version,
                head: Mutex::new(Head {
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                }),
                input: Mutex::new(Some(body)),
                errors: Mutex::new(Vec::new()),
                deadline,
                extensions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates an environment for a body-less `GET` request, mostly useful
    /// in tests. Fails when `uri` is not a valid request target.
    pub fn get(uri: &str) -> Result<Self, http::Error> {
        let request = Request::builder().uri(uri).body(Body::empty())?;
        Ok(Self::new(request))
    }

    /// Process-unique identifier of this request, used in log events.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` if both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Env) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ─── Request line ─────────────────────────────────────────────────────────

    /// The request method.
    pub fn method(&self) -> Method {
        self.inner.head.lock().method.clone()
    }

    /// Rewrites the request method.
    pub fn set_method(&self, method: Method) {
        self.inner.head.lock().method = method;
    }

    /// The HTTP version of the request.
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// The full request URI.
    pub fn uri(&self) -> Uri {
        self.inner.head.lock().uri.clone()
    }

    /// The request path, always starting with `/`.
    pub fn path(&self) -> String {
        let head = self.inner.head.lock();
        match head.uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        }
    }

    /// The raw query string, empty if absent.
    pub fn query(&self) -> String {
        self.inner
            .head
            .lock()
            .uri
            .query()
            .unwrap_or_default()
            .to_string()
    }

    // ─── Headers ──────────────────────────────────────────────────────────────

    /// Returns a copy of the request header map.
    pub fn headers(&self) -> HeaderMap {
        self.inner.head.lock().headers.clone()
    }

    /// Returns the first value of a request header.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<HeaderValue> {
        self.inner.head.lock().headers.get(name).cloned()
    }

    /// Returns the first value of a request header as a string, if it is
    /// visible ASCII.
    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<String> {
        self.header(name)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }

    /// Mutates the request headers in place.
    pub fn with_headers_mut<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        f(&mut self.inner.head.lock().headers)
    }

    // ─── Input stream ─────────────────────────────────────────────────────────

    /// Takes the request input stream.
    ///
    /// The input can be consumed once; later calls return `None`.
    pub fn take_input(&self) -> Option<Body> {
        self.inner.input.lock().take()
    }

    /// Returns `true` if the input stream has not been taken yet.
    pub fn has_input(&self) -> bool {
        self.inner.input.lock().is_some()
    }

    // ─── Error sink ───────────────────────────────────────────────────────────

    /// Records an error against this request and logs it.
    pub fn report_error(&self, err: impl fmt::Display) {
        let message = err.to_string();
        error!(request_id = self.inner.id, error = %message, "request error");
        self.inner.errors.lock().push(message);
    }

    /// Returns every error reported for this request so far.
    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.lock().clone()
    }

    // ─── Deadline ─────────────────────────────────────────────────────────────

    /// The current value of the deadline field.
    pub fn deadline(&self) -> Deadline {
        *self.inner.deadline.borrow()
    }

    /// Sets the deadline to `duration` after the supervisor was invoked.
    pub fn set_deadline(&self, duration: Duration) {
        self.inner.deadline.send_replace(Deadline::After(duration));
    }

    /// Permanently disables the watchdog for this request.
    pub fn disable_deadline(&self) {
        self.inner.deadline.send_replace(Deadline::Disabled);
    }

    /// Applies `default` if no deadline has been chosen yet and returns the
    /// effective value.
    pub fn init_deadline(&self, default: Deadline) -> Deadline {
        self.inner.deadline.send_if_modified(|current| {
            if *current == Deadline::Unset {
                *current = default;
                true
            } else {
                false
            }
        });
        self.deadline()
    }

    /// Subscribes to changes of the deadline field.
    pub fn watch_deadline(&self) -> watch::Receiver<Deadline> {
        self.inner.deadline.subscribe()
    }

    // ─── Extensions ───────────────────────────────────────────────────────────

    /// Stores a component-owned value. Only one value per type can be stored;
    /// subsequent calls overwrite.
    pub fn insert_ext<T: Send + Sync + 'static>(&self, value: T) {
        self.inner
            .extensions
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a cloned component-owned value.
    pub fn get_ext<T: Clone + 'static>(&self) -> Option<T> {
        self.inner
            .extensions
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Retrieves the stored value of type `T`, inserting `init()` first if
    /// none exists. The check and the insert happen under one lock.
    pub fn get_or_insert_ext<T, F>(&self, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut extensions = self.inner.extensions.lock();
        extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_ref::<T>()
            .cloned()
            .unwrap_or_else(|| unreachable!("extension keyed by its own TypeId"))
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn has_ext<T: 'static>(&self) -> bool {
        self.inner
            .extensions
            .lock()
            .contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a component-owned value.
    pub fn remove_ext<T: 'static>(&self) -> Option<T> {
        self.inner
            .extensions
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl From<Request<Body>> for Env {
    fn from(request: Request<Body>) -> Self {
        Self::new(request)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.inner.head.lock();
        f.debug_struct("Env")
            .field("id", &self.inner.id)
            .field("method", &head.method)
            .field("uri", &head.uri)
            .field("deadline", &*self.inner.deadline.borrow())
            .finish_non_exhaustive()
    }
}
