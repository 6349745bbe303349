use crate::body::{CompressionBody, convert_frame};
use crate::{codec, sniff};
use bytes::Bytes;
use http::{HeaderValue, Response, header, response};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F, B> {
        #[pin]
        state: State<F, B>,
    }
}

pin_project! {
    #[project = StateProj]
    enum State<F, B> {
        /// Waiting on the inner service.
        Inner {
            #[pin]
            future: F,
            compress: bool,
        },
        /// Reading the first body frame to fill in `Content-Type`.
        Sniffing {
            head: Option<HeldResponse<B>>,
        },
    }
}

/// A compressed response whose head is held back until the first body frame
/// has been seen.
struct HeldResponse<B> {
    parts: response::Parts,
    body: Pin<Box<B>>,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, compress: bool) -> Self {
        Self {
            state: State::Inner {
                future: inner,
                compress,
            },
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match this.state.as_mut().project() {
                StateProj::Inner { future, compress } => {
                    let response = match future.poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(response)) => response,
                    };

                    if !*compress {
                        return Poll::Ready(Ok(response.map(CompressionBody::passthrough)));
                    }

                    let (mut parts, body) = response.into_parts();
                    set_compression_headers(&mut parts.headers);
                    tracing::debug!("compressing response with gzip");

                    if has_content_type(&parts.headers) {
                        let body = CompressionBody::compressed(body);
                        return Poll::Ready(Ok(Response::from_parts(parts, body)));
                    }

                    this.state.set(State::Sniffing {
                        head: Some(HeldResponse {
                            parts,
                            body: Box::pin(body),
                        }),
                    });
                }
                StateProj::Sniffing { head } => {
                    let Some(mut held) = head.take() else {
                        panic!("ResponseFuture polled after completion");
                    };

                    return match held.body.as_mut().poll_frame(cx) {
                        Poll::Pending => {
                            *head = Some(held);
                            Poll::Pending
                        }
                        Poll::Ready(first) => {
                            Poll::Ready(Ok(held.into_response(first.map(convert_frame))))
                        }
                    };
                }
            }
        }
    }
}

impl<B> HeldResponse<B> {
    /// Releases the response, typing it from `first` when that is a data
    /// frame. The frame is handed to the body to be compressed first.
    fn into_response(
        self,
        first: Option<io::Result<Frame<Bytes>>>,
    ) -> Response<CompressionBody<B>> {
        let HeldResponse { mut parts, body } = self;

        let data = first
            .as_ref()
            .and_then(|frame| frame.as_ref().ok())
            .and_then(Frame::data_ref);
        if let Some(data) = data {
            let content_type = sniff::detect_content_type(data);
            tracing::debug!(content_type, "sniffed response content type");
            parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        Response::from_parts(parts, CompressionBody::compressed_with_replay(body, first))
    }
}

/// Marks the response head as gzip-encoded.
fn set_compression_headers(headers: &mut header::HeaderMap) {
    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(codec::CONTENT_ENCODING),
    );

    // Remove Content-Length since compressed size is unknown
    headers.remove(header::CONTENT_LENGTH);

    // Remove Accept-Ranges since we can't support ranges on compressed content
    headers.remove(header::ACCEPT_RANGES);

    add_vary_accept_encoding(headers);
}

/// Checks if a non-empty Content-Type header is present.
fn has_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| !v.is_empty())
}

/// Adds Accept-Encoding to the Vary header if not already listed.
///
/// `Vary: *` still gets an explicit `Accept-Encoding` entry.
fn add_vary_accept_encoding(headers: &mut header::HeaderMap) {
    // Check all Vary headers to see if Accept-Encoding is already present
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let listed = vary_str
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("accept-encoding"));
            if listed {
                return;
            }
        }
    }

    headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
}
