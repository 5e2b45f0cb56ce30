//! Static file responder.
//!
//! [`FilesLayer`] serves regular files below a root directory and hands every
//! other request (missing paths, directories without an index, non-`GET`
//! methods) to the wrapped fallback application unchanged.
//!
//! Paths that would resolve outside the root are refused with `403`, both
//! lexically (`..` segments, NUL bytes, backslashes) and after symlink
//! resolution.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::TryStreamExt;
use http::header::{CONTENT_TYPE, HeaderValue, LAST_MODIFIED};
use http::{Method, StatusCode};
use strata_core::{Body, BodyError, Env, HeaderMapExt, Response, response};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio_util::io::ReaderStream;
use tower::{BoxError, Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::app::AppFuture;
use crate::error::FilesError;

const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Maps file extensions to media types.
pub trait MediaTypes: Send + Sync + 'static {
    /// Returns the media type for a lowercase extension without the dot.
    fn lookup(&self, extension: &str) -> Option<&str>;
}

/// A small built-in extension table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMediaTypes;

impl MediaTypes for DefaultMediaTypes {
    fn lookup(&self, extension: &str) -> Option<&str> {
        Some(match extension {
            "html" | "htm" => "text/html; charset=utf-8",
            "css" => "text/css; charset=utf-8",
            "js" | "mjs" => "text/javascript; charset=utf-8",
            "json" | "map" => "application/json",
            "txt" => "text/plain; charset=utf-8",
            "csv" => "text/csv; charset=utf-8",
            "xml" => "application/xml",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "ico" => "image/x-icon",
            "wasm" => "application/wasm",
            "pdf" => "application/pdf",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "mp4" => "video/mp4",
            _ => return None,
        })
    }
}

/// Serves files from a root directory in front of a fallback application.
#[derive(Clone)]
pub struct FilesLayer {
    root: PathBuf,
    index: Option<String>,
    media_types: Arc<dyn MediaTypes>,
}

impl FilesLayer {
    /// Serves files below `root`, without an index file.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: None,
            media_types: Arc::new(DefaultMediaTypes),
        }
    }

    /// Serves `name` when a directory is requested.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    /// Replaces the extension table.
    pub fn media_types(mut self, media_types: impl MediaTypes) -> Self {
        self.media_types = Arc::new(media_types);
        self
    }
}

impl std::fmt::Debug for FilesLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesLayer")
            .field("root", &self.root)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for FilesLayer {
    type Service = Files<S>;

    fn layer(&self, fallback: S) -> Self::Service {
        Files {
            fallback,
            config: Arc::new(FilesConfig {
                root: self.root.clone(),
                index: self.index.clone(),
                media_types: self.media_types.clone(),
            }),
        }
    }
}

struct FilesConfig {
    root: PathBuf,
    index: Option<String>,
    media_types: Arc<dyn MediaTypes>,
}

/// The service produced by [`FilesLayer`].
#[derive(Clone)]
pub struct Files<S> {
    fallback: S,
    config: Arc<FilesConfig>,
}

impl<S> Service<Env> for Files<S>
where
    S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = BoxError;
    type Future = AppFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Env) -> Self::Future {
        let fallback = self.fallback.clone();
        let method = env.method();
        if method != Method::GET && method != Method::HEAD {
            return Box::pin(fallback.oneshot(env));
        }

        let config = self.config.clone();
        Box::pin(async move {
            match config.serve(&env).await {
                Some(response) => Ok(response),
                None => fallback.oneshot(env).await,
            }
        })
    }
}

impl FilesConfig {
    /// Returns `None` when the request should go to the fallback.
    async fn serve(&self, env: &Env) -> Option<Response> {
        let relative = match sanitize(&env.path()) {
            Ok(relative) => relative,
            Err(err @ FilesError::BadPath(_)) => {
                debug!(request_id = env.id(), error = %err, "rejected request path");
                return Some(response::error(StatusCode::BAD_REQUEST));
            }
            Err(err) => {
                warn!(request_id = env.id(), error = %err, "refused path outside root");
                return Some(response::error(StatusCode::FORBIDDEN));
            }
        };

        let root = match tokio::fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(err) => return io_failure(env, &self.root, err),
        };

        let mut path = root.join(relative);
        let mut index_tried = false;
        loop {
            let canonical = match tokio::fs::canonicalize(&path).await {
                Ok(canonical) => canonical,
                Err(err) => return io_failure(env, &path, err),
            };
            if !canonical.starts_with(&root) {
                warn!(
                    request_id = env.id(),
                    path = %canonical.display(),
                    "refused symlink outside root"
                );
                return Some(response::error(StatusCode::FORBIDDEN));
            }

            let meta = match tokio::fs::metadata(&canonical).await {
                Ok(meta) => meta,
                Err(err) => return io_failure(env, &canonical, err),
            };
            if meta.is_dir() {
                match &self.index {
                    Some(index) if !index_tried => {
                        path = canonical.join(index);
                        index_tried = true;
                        continue;
                    }
                    _ => return None,
                }
            }
            if !meta.is_file() {
                return None;
            }

            return match tokio::fs::File::open(&canonical).await {
                Ok(file) => Some(self.respond(env, &canonical, file, &meta)),
                Err(err) => io_failure(env, &canonical, err),
            };
        }
    }

    fn respond(
        &self,
        env: &Env,
        path: &Path,
        file: tokio::fs::File,
        meta: &std::fs::Metadata,
    ) -> Response {
        let body = if env.method() == Method::HEAD {
            Body::empty()
        } else {
            Body::from_stream(ReaderStream::new(file).map_err(BodyError::from))
        };

        let mut response = http::Response::new(body);
        let headers = response.headers_mut();
        headers.set_content_length(meta.len());

        let media_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.media_types.lookup(&ext.to_ascii_lowercase()))
            .unwrap_or("application/octet-stream");
        headers.set_content_type(media_type);

        if let Some(modified) = meta
            .modified()
            .ok()
            .and_then(|t| OffsetDateTime::from(t).format(IMF_FIXDATE).ok())
            .and_then(|t| HeaderValue::from_str(&t).ok())
        {
            headers.insert(LAST_MODIFIED, modified);
        }

        debug!(
            request_id = env.id(),
            path = %path.display(),
            size = meta.len(),
            content_type = ?headers.get(CONTENT_TYPE),
            "serving file"
        );
        response
    }
}

fn io_failure(env: &Env, path: &Path, err: std::io::Error) -> Option<Response> {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => None,
        ErrorKind::PermissionDenied => Some(response::error(StatusCode::FORBIDDEN)),
        _ => {
            env.report_error(FilesError::Io {
                path: path.to_path_buf(),
                source: err,
            });
            Some(response::error(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Decodes a request path and normalizes it to a path relative to the root.
fn sanitize(request_path: &str) -> Result<PathBuf, FilesError> {
    let decoded = percent_decode(request_path)
        .ok_or_else(|| FilesError::BadPath(request_path.to_string()))?;
    if decoded.contains(['\0', '\\']) {
        return Err(FilesError::Forbidden(request_path.to_string()));
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if !relative.pop() {
                    return Err(FilesError::Forbidden(request_path.to_string()));
                }
            }
            segment => relative.push(segment),
        }
    }
    Ok(relative)
}

/// Percent-decodes a path. `+` is literal in paths.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
