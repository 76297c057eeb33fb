//! `X-Moondream-Auth` API key middleware

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;

/// Header carrying the client's API key
pub const AUTH_HEADER: &str = "x-moondream-auth";

/// Paths served without a key: the health check and the upload page.
const PUBLIC_PATHS: &[&str] = &["/health", "/"];

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    api_key: Option<Arc<str>>,
}

impl AuthLayer {
    /// `None` or an empty key lets every request through.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.is_empty()).map(Arc::from),
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            api_key: self.api_key.clone(),
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    api_key: Option<Arc<str>>,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let Some(expected) = self.api_key.as_deref() else {
            return Box::pin(self.inner.call(request));
        };

        if PUBLIC_PATHS.contains(&request.uri().path()) {
            return Box::pin(self.inner.call(request));
        }

        let rejection = match request
            .headers()
            .get(AUTH_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            Some(key) if key == expected => None,
            Some(_) => Some("Invalid API key provided"),
            None => Some("No API key provided"),
        };

        match rejection {
            None => Box::pin(self.inner.call(request)),
            Some(reason) => {
                warn!(path = %request.uri().path(), "{}", reason);
                Box::pin(async move { Ok(AppError::AuthenticationFailed.into_response()) })
            }
        }
    }
}
