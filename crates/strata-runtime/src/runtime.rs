//! Config-driven pipeline assembly and the request driver.
//!
//! [`StrataRuntime`] turns a [`StrataConfig`] into the standard middleware
//! stack:
//!
//! ```text
//! Catch ─▶ Logger ─▶ Timeout ─▶ Params ─▶ Head ─▶ ContentLength ─▶ Gzip ─▶ Files ─▶ app
//! ```
//!
//! `Gzip` is present only while `gzip.enabled`, `Files` only when
//! `files.root` is set. [`Server`] is the hand-off point for a transport:
//! one `http::Request` in, one `http::Response` out.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_runtime::StrataRuntime;
//!
//! let runtime = StrataRuntime::builder().profile("production").build()?;
//! let server = runtime.server(service_fn(handler));
//! runtime.block_on(async move {
//!     let response = server.call(request).await;
//! })?;
//! ```

use std::future::Future;
use std::path::Path;

use http::StatusCode;
use strata_core::{Body, Env, Response, response};
use strata_framework::{
    BoxApp, BoxError, Builder, CatchLayer, ContentLengthLayer, FilesLayer, GzipLayer, HeadLayer,
    LoggerLayer, ParamsLayer, TimeoutLayer, boxed,
};
use tower::{Service, ServiceExt};
use tracing::{debug, error, info};

use crate::config::{ConfigLoader, StrataConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// Owns the configuration and builds pipelines and executors from it.
#[derive(Debug, Clone)]
pub struct StrataRuntime {
    config: StrataConfig,
}

impl StrataRuntime {
    /// Creates a runtime from an already loaded configuration and installs
    /// the global subscriber it describes.
    ///
    /// The configuration is used as given; call
    /// [`validate_config`] first when it comes from an untrusted source.
    pub fn new(config: StrataConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            timeout_ms = config.server.timeout_ms,
            gzip = config.gzip.enabled,
            files_root = ?config.files.root,
            "Runtime initialized from configuration"
        );

        Self { config }
    }

    /// Loads, validates and applies configuration from the current
    /// directory, the user config directory and `STRATA_*` variables.
    pub fn load() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// The configured middleware stack without a terminal application.
    ///
    /// Layers added to the returned builder sit between `Files` and the
    /// application.
    pub fn pipeline_builder(&self) -> Builder {
        let StrataConfig {
            server,
            gzip,
            files,
            params,
            ..
        } = &self.config;

        let timeout = match server.timeout() {
            Some(after) => TimeoutLayer::new(after),
            None => TimeoutLayer::disabled(),
        };

        let mut params_layer = ParamsLayer::new().max_length(params.max_length);
        if let Some(dir) = &params.upload_dir {
            params_layer = params_layer.upload_dir(dir);
        }

        let builder = Builder::new()
            .layer(CatchLayer::new())
            .layer(LoggerLayer::new())
            .layer(timeout)
            .layer(params_layer)
            .layer(HeadLayer::new())
            .layer(ContentLengthLayer::new())
            .layer_if(
                gzip.enabled,
                GzipLayer::new()
                    .level(gzip.level)
                    .types(gzip.types.iter().cloned()),
            );

        match &files.root {
            Some(root) => builder.layer(files_layer(root, files.index.as_deref())),
            None => builder,
        }
    }

    /// Wraps `app` in the configured middleware stack.
    pub fn pipeline<S>(&self, app: S) -> BoxApp
    where
        S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        let builder = self.pipeline_builder();
        debug!(layers = builder.len(), "Pipeline assembled");
        builder.run(app)
    }

    /// Wraps `app` in the configured pipeline and returns its request driver.
    pub fn server<S>(&self, app: S) -> Server
    where
        S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        Server::new(self.pipeline(app))
    }

    /// Runs `future` to completion on the configured scheduler.
    ///
    /// `server.worker_threads == 0` selects the current-thread scheduler,
    /// any other value a multi-thread scheduler with that many workers.
    pub fn block_on<F: Future>(&self, future: F) -> RuntimeResult<F::Output> {
        let workers = self.config.server.worker_threads;
        let mut builder = if workers == 0 {
            tokio::runtime::Builder::new_current_thread()
        } else {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(workers);
            builder
        };
        let executor = builder.enable_all().build()?;

        debug!(worker_threads = workers, "Executor started");
        Ok(executor.block_on(future))
    }
}

impl Default for StrataRuntime {
    fn default() -> Self {
        Self::new(StrataConfig::default())
    }
}

fn files_layer(root: &Path, index: Option<&str>) -> FilesLayer {
    let layer = FilesLayer::new(root);
    match index {
        Some(name) => layer.index(name),
        None => layer,
    }
}

// =============================================================================
// Server
// =============================================================================

/// Drives requests through a pipeline, one [`Env`] per request.
#[derive(Clone)]
pub struct Server {
    app: BoxApp,
}

impl Server {
    /// Drives requests through `app` as given, without adding middleware.
    pub fn new<S>(app: S) -> Self
    where
        S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        Self { app: boxed(app) }
    }

    /// Handles one request.
    ///
    /// An error escaping the pipeline is reported to the env and answered
    /// with `500 Internal Server Error`.
    pub async fn call(&self, request: http::Request<Body>) -> http::Response<Body> {
        let env = Env::new(request);
        match self.app.clone().oneshot(env.clone()).await {
            Ok(response) => response,
            Err(err) => {
                error!(request_id = env.id(), error = %err, "Request failed");
                env.report_error(&err);
                response::error(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// The pipeline this server drives.
    pub fn app(&self) -> &BoxApp {
        &self.app
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Loads configuration and builds a validated [`StrataRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the current directory and the user config directory, with
    /// `STRATA_*` overrides.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a directory to search for config files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Applies `STRATA_*` environment overrides.
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Ignores the process environment.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Supplies programmatic values; config files and `STRATA_*` variables
    /// still override them.
    pub fn merge(mut self, config: StrataConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and applies the configuration.
    pub fn build(self) -> RuntimeResult<StrataRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(StrataRuntime::new(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::RuntimeError;
    use http::Method;
    use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use strata_framework::{params, service_fn};

    struct Site(PathBuf);

    impl Site {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("strata-runtime-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(root.join("docs")).unwrap();
            std::fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
            std::fs::write(root.join("docs/guide.txt"), "read me").unwrap();
            Self(root)
        }
    }

    impl Drop for Site {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn request(method: Method, uri: &str) -> http::Request<Body> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn echo_path() -> BoxApp {
        boxed(service_fn(|env: Env| async move {
            Ok::<_, BoxError>(response::text(StatusCode::OK, format!("app:{}", env.path())))
        }))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_files_served_before_app() {
        let site = Site::new();
        let mut config = StrataConfig::default();
        config.files.root = Some(site.0.clone());
        let server = StrataRuntime::new(config).server(echo_path());

        let response = server.call(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<h1>home</h1>");

        let response = server.call(request(Method::GET, "/docs/guide.txt")).await;
        assert_eq!(body_text(response).await, "read me");

        let response = server.call(request(Method::GET, "/missing.txt")).await;
        assert_eq!(body_text(response).await, "app:/missing.txt");
    }

    #[tokio::test]
    async fn test_files_absent_without_root() {
        let server = StrataRuntime::default().server(echo_path());
        let response = server.call(request(Method::GET, "/index.html")).await;
        assert_eq!(body_text(response).await, "app:/index.html");
    }

    #[tokio::test]
    async fn test_gzip_follows_config() {
        let mut req = request(Method::GET, "/hello");
        req.headers_mut()
            .insert(ACCEPT_ENCODING, "gzip".parse().unwrap());

        let server = StrataRuntime::default().server(echo_path());
        let response = server.call(req).await;
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
        assert!(!response.headers().contains_key(CONTENT_LENGTH));

        let mut config = StrataConfig::default();
        config.gzip.enabled = false;
        let server = StrataRuntime::new(config).server(echo_path());
        let mut req = request(Method::GET, "/hello");
        req.headers_mut()
            .insert(ACCEPT_ENCODING, "gzip".parse().unwrap());
        let response = server.call(req).await;
        assert!(!response.headers().contains_key(CONTENT_ENCODING));
        assert_eq!(body_text(response).await, "app:/hello");
    }

    #[tokio::test]
    async fn test_head_keeps_headers_and_drops_body() {
        let server = StrataRuntime::default().server(echo_path());
        let response = server.call(request(Method::HEAD, "/abc")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CONTENT_TYPE));
        assert_eq!(body_text(response).await, "");
    }

    fn streaming() -> BoxApp {
        boxed(service_fn(|_env: Env| async move {
            let (sender, body) = Body::channel();
            sender.write("first ");
            sender.end(Some("second".into()));
            let response = http::Response::builder()
                .header(CONTENT_TYPE, "text/plain")
                .body(body)?;
            Ok::<_, BoxError>(response)
        }))
    }

    async fn get_and_head(server: &Server, accept_gzip: bool) -> (Response, Response) {
        let mut responses = Vec::new();
        for method in [Method::GET, Method::HEAD] {
            let mut req = request(method, "/stream");
            if accept_gzip {
                req.headers_mut()
                    .insert(ACCEPT_ENCODING, "gzip".parse().unwrap());
            }
            responses.push(server.call(req).await);
        }
        let head = responses.pop().unwrap();
        (responses.pop().unwrap(), head)
    }

    #[tokio::test]
    async fn test_head_of_streaming_body_has_no_length() {
        let mut config = StrataConfig::default();
        config.gzip.enabled = false;
        let server = StrataRuntime::new(config).server(streaming());

        let (get, head) = get_and_head(&server, false).await;
        assert!(!get.headers().contains_key(CONTENT_LENGTH));
        assert!(!head.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(head.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(get).await, "first second");
        assert_eq!(body_text(head).await, "");
    }

    #[tokio::test]
    async fn test_head_with_gzip_matches_get_headers() {
        let server = StrataRuntime::default().server(echo_path());

        let (get, head) = get_and_head(&server, true).await;
        assert_eq!(get.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(head.headers()[CONTENT_ENCODING], "gzip");
        assert!(!get.headers().contains_key(CONTENT_LENGTH));
        assert!(!head.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(body_text(head).await, "");
    }

    #[tokio::test]
    async fn test_head_of_full_body_keeps_length() {
        let mut config = StrataConfig::default();
        config.gzip.enabled = false;
        let server = StrataRuntime::new(config).server(echo_path());

        let (get, head) = get_and_head(&server, false).await;
        assert_eq!(get.headers()[CONTENT_LENGTH], "11");
        assert_eq!(head.headers()[CONTENT_LENGTH], "11");
    }

    #[tokio::test]
    async fn test_app_error_becomes_500() {
        let server = StrataRuntime::default().server(service_fn(|_env: Env| async move {
            Err::<Response, BoxError>("database unavailable".into())
        }));
        let response = server.call(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_server_without_catch_converts_error() {
        let seen: Arc<Mutex<Option<Env>>> = Arc::default();
        let slot = seen.clone();
        let server = Server::new(service_fn(move |env: Env| {
            *slot.lock().unwrap() = Some(env);
            async move { Err::<Response, BoxError>("boom".into()) }
        }));

        let response = server.call(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let env = seen.lock().unwrap().take().unwrap();
        assert_eq!(env.errors(), vec!["boom".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout_answers_stuck_request() {
        let mut config = StrataConfig::default();
        config.server.timeout_ms = 50;
        let server = StrataRuntime::new(config).server(service_fn(|_env: Env| async move {
            std::future::pending::<()>().await;
            Ok::<_, BoxError>(response::empty(StatusCode::OK))
        }));

        let started = tokio::time::Instant::now();
        let response = server.call(request(Method::GET, "/slow")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables_watchdog() {
        let mut config = StrataConfig::default();
        config.server.timeout_ms = 0;
        let server = StrataRuntime::new(config).server(service_fn(|_env: Env| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, BoxError>(response::text(StatusCode::OK, "late"))
        }));

        let response = server.call(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "late");
    }

    #[tokio::test]
    async fn test_params_available_to_app() {
        let server = StrataRuntime::default().server(service_fn(|env: Env| async move {
            let params = params(&env).await?;
            let name = params.text("name").unwrap_or("?").to_string();
            let page = params.text("page").unwrap_or("?").to_string();
            Ok::<_, BoxError>(response::text(StatusCode::OK, format!("{name}/{page}")))
        }));

        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/form?page=2&name=query")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::full("name=ada"))
            .unwrap();
        let response = server.call(req).await;
        assert_eq!(body_text(response).await, "ada/2");
    }

    #[tokio::test]
    async fn test_params_limit_from_config() {
        let mut config = StrataConfig::default();
        config.params.max_length = 4;
        let server = StrataRuntime::new(config).server(service_fn(|env: Env| async move {
            params(&env).await?;
            Ok::<_, BoxError>(response::empty(StatusCode::NO_CONTENT))
        }));

        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::full("name=too-long"))
            .unwrap();
        let response = server.call(req).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_pipeline_layer_count() {
        let runtime = StrataRuntime::default();
        assert_eq!(runtime.pipeline_builder().len(), 7);

        let mut config = StrataConfig::default();
        config.gzip.enabled = false;
        config.files.root = Some(std::env::temp_dir());
        assert_eq!(StrataRuntime::new(config).pipeline_builder().len(), 7);
    }

    #[test]
    fn test_block_on_schedulers() {
        let runtime = StrataRuntime::default();
        assert_eq!(runtime.block_on(async { 1 + 1 }).unwrap(), 2);

        let mut config = StrataConfig::default();
        config.server.worker_threads = 2;
        let runtime = StrataRuntime::new(config);
        let flavor = runtime
            .block_on(async { tokio::runtime::Handle::current().runtime_flavor() })
            .unwrap();
        assert_eq!(flavor, tokio::runtime::RuntimeFlavor::MultiThread);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut overrides = StrataConfig::default();
        overrides.gzip.level = 12;
        let err = StrataRuntime::builder()
            .without_env()
            .search_path("/nonexistent/strata")
            .merge(overrides)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_builder_missing_file() {
        let err = StrataRuntime::builder()
            .without_env()
            .config_file("/nonexistent/strata.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Config(ConfigError::FileNotFound(_))));
    }
}
