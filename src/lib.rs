//! Gzip response compression middleware for Tower.
//!
//! This crate provides a Tower layer that gzip-compresses HTTP response
//! bodies when the client's `Accept-Encoding` header mentions gzip, except
//! for requests whose path contains one of a configured set of excluded
//! routes.
//!
//! # Example
//!
//! ```ignore
//! use http_response_gzip::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new().excluded_routes(["/health", "/metrics"]))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - The request path contains an excluded route (case-sensitive substring)
//! - The first `Accept-Encoding` value does not contain `gzip`
//!
//! The `Accept-Encoding` check is a literal substring search: quality
//! values are not parsed, so `gzip;q=0` still counts as accepting gzip.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Vary` header includes `Accept-Encoding`
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed
//! - A missing `Content-Type` is inferred from the first body frame, see
//!   [`detect_content_type`]

#![deny(missing_docs)]

mod body;
mod codec;
mod future;
mod layer;
mod service;
mod sniff;

pub use body::CompressionBody;
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use service::CompressionService;
pub use sniff::{SNIFF_LEN, detect_content_type};
