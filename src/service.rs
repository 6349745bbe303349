use crate::codec;
use crate::future::ResponseFuture;
use http::{Request, header};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that gzip-compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    excluded: Arc<[String]>,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    ///
    /// Requests whose path contains any of `excluded_routes` are never
    /// compressed.
    pub fn new<I, R>(inner: S, excluded_routes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let excluded = excluded_routes.into_iter().map(Into::into).collect();
        Self::with_excluded(inner, excluded)
    }

    pub(crate) fn with_excluded(inner: S, excluded: Arc<[String]>) -> Self {
        Self { inner, excluded }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Decides whether the response to `req` gets compressed.
    fn should_compress<B>(&self, req: &Request<B>) -> bool {
        let path = req.uri().path();
        if let Some(route) = self
            .excluded
            .iter()
            .find(|route| path.contains(route.as_str()))
        {
            tracing::trace!(path, route = %route, "route excluded from compression");
            return false;
        }

        // Only the first Accept-Encoding value is looked at
        let accepted = req
            .headers()
            .get(header::ACCEPT_ENCODING)
            .is_some_and(codec::accepts_gzip);
        if !accepted {
            tracing::trace!(path, "client does not accept gzip");
        }
        accepted
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: http_body::Body,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let compress = self.should_compress(&req);
        let inner = self.inner.call(req);

        ResponseFuture::new(inner, compress)
    }
}
