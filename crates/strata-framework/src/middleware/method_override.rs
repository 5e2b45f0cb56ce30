use std::task::{Context, Poll};

use http::Method;
use strata_core::{Env, Response};
use tower::{BoxError, Layer, Service};
use tracing::debug;

use crate::params::query_params;

/// Header carrying the overriding method.
pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

const QUERY_PARAM: &str = "_method";

const ALLOWED: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::PATCH,
];

/// Lets clients limited to `POST` express other methods.
///
/// For `POST` requests the `X-Http-Method-Override` header, or failing that
/// the `_method` query parameter, replaces the env method when it names one
/// of `GET`, `HEAD`, `PUT`, `DELETE`, `OPTIONS` or `PATCH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodOverrideLayer;

impl MethodOverrideLayer {
    /// Creates the layer with the standard override header and query key.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for MethodOverrideLayer {
    type Service = MethodOverride<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MethodOverride { inner }
    }
}

/// The service produced by [`MethodOverrideLayer`].
#[derive(Debug, Clone)]
pub struct MethodOverride<S> {
    inner: S,
}

impl<S> Service<Env> for MethodOverride<S>
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
        if env.method() == Method::POST
            && let Some(method) = requested_method(&env)
        {
            debug!(request_id = env.id(), %method, "method overridden");
            env.set_method(method);
        }
        self.inner.call(env)
    }
}

fn requested_method(env: &Env) -> Option<Method> {
    let requested = env.header_str(METHOD_OVERRIDE_HEADER).or_else(|| {
        query_params(env)
            .ok()
            .and_then(|params| params.text(QUERY_PARAM).map(str::to_owned))
    })?;
    let method = Method::from_bytes(requested.trim().to_ascii_uppercase().as_bytes()).ok()?;
    ALLOWED.contains(&method).then_some(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request, StatusCode};
    use strata_core::{Body, response};
    use tower::{ServiceExt, service_fn};

    async fn observed(request: Request<Body>) -> Method {
        let app = MethodOverrideLayer::new().layer(service_fn(|env: Env| async move {
            let mut res = response::empty(StatusCode::OK);
            res.extensions_mut().insert(env.method());
            Ok::<_, BoxError>(res)
        }));
        let res = app.oneshot(Env::new(request)).await.unwrap();
        res.extensions().get::<Method>().cloned().unwrap()
    }

    fn post(uri: &str) -> http::request::Builder {
        Request::builder().method(Method::POST).uri(uri)
    }

    #[tokio::test]
    async fn test_header_override() {
        let req = post("/")
            .header(METHOD_OVERRIDE_HEADER, "delete")
            .body(Body::empty())
            .unwrap();
        assert_eq!(observed(req).await, Method::DELETE);
    }

    #[tokio::test]
    async fn test_query_override() {
        let req = post("/items/1?_method=PUT").body(Body::empty()).unwrap();
        assert_eq!(observed(req).await, Method::PUT);
    }

    #[tokio::test]
    async fn test_only_post_and_known_methods() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/?_method=DELETE")
            .body(Body::empty())
            .unwrap();
        assert_eq!(observed(req).await, Method::GET);

        let req = post("/?_method=CONNECT").body(Body::empty()).unwrap();
        assert_eq!(observed(req).await, Method::POST);
    }
}
