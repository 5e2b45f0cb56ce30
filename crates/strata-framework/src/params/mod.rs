//! Parameter accumulation.
//!
//! Query and body parameters are parsed on first request and cached in the
//! [`Env`], so every component handling the same request observes one parse
//! and, if it failed, the identical error.
//!
//! ```text
//!  query string ──▶ UrlEncodedParser ───────────────┐
//!                                                   ├──▶ params(): body overrides query
//!  env input ──┬─▶ UrlEncodedParser (urlencoded) ───┤
//!              └─▶ MultipartParser  (form-data)  ───┘
//!                     └─▶ file parts streamed to <upload_dir>/<uuid>
//! ```
//!
//! Bodies with any other content type yield an empty mapping and leave the
//! input untouched.

mod multipart;
mod urlencoded;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use strata_core::{Body, BodyError, Env, HeaderMapExt, Response};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tower::{BoxError, Layer, Service};
use tracing::{debug, warn};
use uuid::Uuid;

pub use multipart::{MAX_HEADER_SIZE, MultipartEvent, MultipartParser, PartHeaders};
pub use urlencoded::{UrlEncodedParser, parse};

use crate::error::{ParamsError, ParamsResult};

/// Default body limit in bytes.
pub const DEFAULT_MAX_LENGTH: u64 = 8 * 1024 * 1024;

// ============================================================================
// Values
// ============================================================================

/// A file part stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Location of the stored contents.
    pub temp_path: PathBuf,
    /// The part's declared media type.
    pub media_type: Option<String>,
    /// The client-supplied file name.
    pub original_name: String,
    /// Number of bytes written.
    pub size: u64,
}

/// One parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// A decoded form field or query value.
    Text(String),
    /// A multipart part with a filename, stored on disk.
    File(FileUpload),
}

impl ParamValue {
    /// Returns the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File(_) => None,
        }
    }

    /// Returns the upload, if this is a file value.
    pub fn as_file(&self) -> Option<&FileUpload> {
        match self {
            Self::File(file) => Some(file),
            Self::Text(_) => None,
        }
    }
}

/// A flat mapping from parameter name to value.
///
/// Names are kept verbatim; `a[b]` is a plain key, not a nested structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Returns the value under `key` if it is text.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_text)
    }

    /// Returns the value under `key` if it is an upload.
    pub fn file(&self, key: &str) -> Option<&FileUpload> {
        self.get(key).and_then(ParamValue::as_file)
    }

    /// Returns `true` if `key` has a value.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Inserts a value, replacing any previous value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no parameter was supplied.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copies every entry of `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Params) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Limits applied while reading a request body. Stored in the env by
/// [`ParamsLayer`]; defaults apply when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsOptions {
    /// Maximum accepted body size in bytes.
    pub max_length: u64,
    /// Directory receiving uploaded files.
    pub upload_dir: PathBuf,
}

impl Default for ParamsOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            upload_dir: std::env::temp_dir(),
        }
    }
}

/// Installs [`ParamsOptions`] for every request passing through.
#[derive(Debug, Clone, Default)]
pub struct ParamsLayer {
    options: ParamsOptions,
}

impl ParamsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum body size.
    pub fn max_length(mut self, max_length: u64) -> Self {
        self.options.max_length = max_length;
        self
    }

    /// Sets the directory receiving uploaded files.
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.upload_dir = dir.into();
        self
    }
}

impl<S> Layer<S> for ParamsLayer {
    type Service = ParamsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ParamsService {
            inner,
            options: self.options.clone(),
        }
    }
}

/// The service produced by [`ParamsLayer`].
#[derive(Debug, Clone)]
pub struct ParamsService<S> {
    inner: S,
    options: ParamsOptions,
}

impl<S> Service<Env> for ParamsService<S>
where
    S: Service<Env, Response = Response, Error = BoxError>,
{
    type Response = Response;
    type Error = BoxError;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, env: Env) -> Self::Future {
        env.insert_ext(self.options.clone());
        self.inner.call(env)
    }
}

// ============================================================================
// Cached accessors
// ============================================================================

type Cached = ParamsResult<Arc<Params>>;

#[derive(Clone)]
struct QueryCache(Arc<Cached>);

#[derive(Clone, Default)]
struct BodyCache(Arc<OnceCell<Cached>>);

#[derive(Clone, Default)]
struct MergedCache(Arc<OnceCell<Cached>>);

/// Parameters of the query component.
pub fn query_params(env: &Env) -> ParamsResult<Arc<Params>> {
    if let Some(QueryCache(cached)) = env.get_ext::<QueryCache>() {
        return (*cached).clone();
    }
    let parsed = parse(&env.query(), b'&', b'=').map(Arc::new);
    let QueryCache(cached) = env.get_or_insert_ext(|| QueryCache(Arc::new(parsed)));
    (*cached).clone()
}

/// Parameters of the request body.
///
/// The first caller reads the input; concurrent callers wait for that read
/// and later callers get the cached result.
pub async fn body_params(env: &Env) -> ParamsResult<Arc<Params>> {
    let BodyCache(cell) = env.get_or_insert_ext(BodyCache::default);
    cell.get_or_init(|| async { read_body(env).await.map(Arc::new) })
        .await
        .clone()
}

/// Query and body parameters merged; body values override query values.
pub async fn params(env: &Env) -> ParamsResult<Arc<Params>> {
    let MergedCache(cell) = env.get_or_insert_ext(MergedCache::default);
    cell.get_or_init(|| async {
        let query = query_params(env)?;
        let body = body_params(env).await?;
        let mut merged = (*query).clone();
        merged.merge(&body);
        Ok::<_, ParamsError>(Arc::new(merged))
    })
    .await
    .clone()
}

// ============================================================================
// Body reading
// ============================================================================

async fn read_body(env: &Env) -> ParamsResult<Params> {
    let options = env.get_ext::<ParamsOptions>().unwrap_or_default();
    let headers = env.headers();

    let reader = match headers.media_type().as_deref() {
        Some("application/x-www-form-urlencoded") => Reader::UrlEncoded,
        Some("multipart/form-data") => {
            let boundary = headers
                .get_str(&CONTENT_TYPE)
                .and_then(boundary)
                .ok_or_else(|| ParamsError::multipart("missing boundary"))?;
            Reader::Multipart(boundary)
        }
        _ => return Ok(Params::new()),
    };

    if let Some(len) = headers.content_length()
        && len > options.max_length
    {
        return Err(ParamsError::TooLarge {
            limit: options.max_length,
        });
    }

    let input = env
        .take_input()
        .ok_or_else(|| ParamsError::Body(BodyError::InputTaken.to_string()))?;
    let input = LimitedInput {
        body: input,
        read: 0,
        limit: options.max_length,
    };

    let result = match reader {
        Reader::UrlEncoded => read_urlencoded(input).await,
        Reader::Multipart(boundary) => read_multipart(input, &boundary, &options.upload_dir).await,
    };
    if let Err(err) = &result {
        debug!(request_id = env.id(), error = %err, "body parameters rejected");
    }
    result
}

enum Reader {
    UrlEncoded,
    Multipart(String),
}

struct LimitedInput {
    body: Body,
    read: u64,
    limit: u64,
}

impl LimitedInput {
    async fn next(&mut self) -> ParamsResult<Option<Bytes>> {
        match self.body.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(ParamsError::Body(err.to_string())),
            Some(Ok(chunk)) => {
                self.read += chunk.len() as u64;
                if self.read > self.limit {
                    return Err(ParamsError::TooLarge { limit: self.limit });
                }
                Ok(Some(chunk))
            }
        }
    }
}

async fn read_urlencoded(mut input: LimitedInput) -> ParamsResult<Params> {
    let mut parser = UrlEncodedParser::default();
    while let Some(chunk) = input.next().await? {
        parser.write(&chunk);
    }
    parser.end()
}

enum Part {
    Text { name: String, value: Vec<u8> },
    File { name: String, upload: FileUpload, file: tokio::fs::File },
    Skip,
}

async fn read_multipart(
    mut input: LimitedInput,
    boundary: &str,
    upload_dir: &Path,
) -> ParamsResult<Params> {
    let mut stored = Vec::new();
    let result = drive_multipart(&mut input, boundary, upload_dir, &mut stored).await;
    if result.is_err() {
        for path in stored {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %err, "failed to remove partial upload");
            }
        }
    }
    result
}

async fn drive_multipart(
    input: &mut LimitedInput,
    boundary: &str,
    upload_dir: &Path,
    stored: &mut Vec<PathBuf>,
) -> ParamsResult<Params> {
    let upload_err = |e: std::io::Error| ParamsError::Upload(e.to_string());
    let mut parser = MultipartParser::new(boundary)?;
    let mut params = Params::new();
    let mut part = Part::Skip;

    while let Some(chunk) = input.next().await? {
        for event in parser.feed(&chunk)? {
            match event {
                MultipartEvent::PartBegin(headers) => {
                    part = match headers.filename {
                        _ if headers.name.is_empty() => Part::Skip,
                        Some(filename) if filename.is_empty() => Part::Skip,
                        Some(filename) => {
                            let temp_path = upload_dir.join(Uuid::new_v4().to_string());
                            let file = tokio::fs::File::create(&temp_path)
                                .await
                                .map_err(upload_err)?;
                            stored.push(temp_path.clone());
                            Part::File {
                                name: headers.name,
                                upload: FileUpload {
                                    temp_path,
                                    media_type: headers.content_type,
                                    original_name: filename,
                                    size: 0,
                                },
                                file,
                            }
                        }
                        None => Part::Text {
                            name: headers.name,
                            value: Vec::new(),
                        },
                    };
                }
                MultipartEvent::Data(data) => match &mut part {
                    Part::Text { value, .. } => value.extend_from_slice(&data),
                    Part::File { upload, file, .. } => {
                        file.write_all(&data).await.map_err(upload_err)?;
                        upload.size += data.len() as u64;
                    }
                    Part::Skip => {}
                },
                MultipartEvent::PartEnd => match std::mem::replace(&mut part, Part::Skip) {
                    Part::Text { name, value } => {
                        let value = String::from_utf8(value)
                            .map_err(|e| ParamsError::decode(e.to_string()))?;
                        params.insert(name, ParamValue::Text(value));
                    }
                    Part::File {
                        name,
                        upload,
                        mut file,
                    } => {
                        file.flush().await.map_err(upload_err)?;
                        params.insert(name, ParamValue::File(upload));
                    }
                    Part::Skip => {}
                },
            }
        }
    }
    parser.finish()?;
    Ok(params)
}

/// Extracts the `boundary` parameter of a `multipart/*` content type.
fn boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
    })
}
