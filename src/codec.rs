use compression_codecs::gzip::GzipEncoder;
use compression_core::Level;
use http::HeaderValue;

/// The `Content-Encoding` value written on compressed responses.
pub(crate) const CONTENT_ENCODING: &str = "gzip";

/// Creates a new gzip encoder at the default compression level.
pub(crate) fn encoder() -> GzipEncoder {
    GzipEncoder::new(Level::Default.into())
}

/// Returns whether an `Accept-Encoding` value mentions gzip.
///
/// This is a plain byte substring search: quality values and token
/// boundaries are not looked at, so `gzip;q=0` and `foogzipbar` both match.
pub(crate) fn accepts_gzip(accept_encoding: &HeaderValue) -> bool {
    accept_encoding
        .as_bytes()
        .windows(CONTENT_ENCODING.len())
        .any(|w| w == CONTENT_ENCODING.as_bytes())
}
