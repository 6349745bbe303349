use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzip-compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies when the
/// client's `Accept-Encoding` header mentions gzip and the request path
/// contains none of the excluded routes.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    excluded: Arc<[String]>,
}

impl CompressionLayer {
    /// Creates a new compression layer with no excluded routes.
    pub fn new() -> Self {
        Self {
            excluded: Arc::from(Vec::new()),
        }
    }

    /// Sets the routes that are never compressed, replacing any set before.
    ///
    /// A request is excluded when its path contains one of these strings.
    /// Matching is case-sensitive and the strings are used as given.
    pub fn excluded_routes<I, R>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.excluded = routes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single excluded route.
    pub fn exclude_route(mut self, route: impl Into<String>) -> Self {
        let mut routes = self.excluded.to_vec();
        routes.push(route.into());
        self.excluded = routes.into();
        self
    }

    /// Returns the configured excluded routes, in order.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::with_excluded(inner, self.excluded.clone())
    }
}
