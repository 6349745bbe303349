use crate::codec;
use bytes::{Buf, Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_codecs::gzip::GzipEncoder;
use compression_core::util::{PartialBuffer, WriteBuffer};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

pin_project! {
    /// A response body that may be gzip-compressed.
    ///
    /// This type wraps an inner body and either compresses it or passes it
    /// through unchanged.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Compressed body with encoder.
        Compressed {
            inner: Pin<Box<B>>,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// State and buffers for an actively compressed body.
pub(crate) struct CompressedBody {
    encoder: GzipEncoder,
    output_buffer: Vec<u8>,
    /// A frame read ahead of time that must be processed before polling
    /// the inner body again.
    replay: Option<io::Result<Frame<Bytes>>>,
    state: CompressState,
    pending_trailers: Option<http::HeaderMap>,
}

/// State machine for compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and compressing.
    Reading,
    /// Finishing compression after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressedBody {
    fn new(replay: Option<io::Result<Frame<Bytes>>>) -> Self {
        Self {
            encoder: codec::encoder(),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            replay,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether a read-ahead frame is waiting to be compressed.
    #[allow(dead_code)]
    pub(crate) fn has_replay(&self) -> bool {
        self.replay.is_some()
    }

    /// Polls the inner body and compresses data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        inner: &mut Pin<Box<B>>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    // Emit buffered trailers
                    let trailers = self.pending_trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }

                CompressState::Finishing => {
                    let data = match self.finish() {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::debug!(error = %e, "failed to finalize gzip stream");
                            self.state = CompressState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                    };
                    self.state = CompressState::Trailers;
                    if !data.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                }

                CompressState::Reading => {
                    let next = match self.replay.take() {
                        Some(frame) => Some(frame),
                        None => match inner.as_mut().poll_frame(cx) {
                            Poll::Pending => return Poll::Pending,
                            Poll::Ready(next) => next.map(convert_frame),
                        },
                    };

                    match next {
                        None => {
                            // Inner body is done, transition to finishing
                            self.state = CompressState::Finishing;
                        }
                        Some(Err(e)) => {
                            self.state = CompressState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Some(Ok(frame)) => match frame.into_data() {
                            Ok(data) => {
                                let compressed = match self.compress_chunk(&data) {
                                    Ok(compressed) => compressed,
                                    Err(e) => {
                                        self.state = CompressState::Done;
                                        return Poll::Ready(Some(Err(e)));
                                    }
                                };
                                // The encoder may buffer small chunks internally
                                if !compressed.is_empty() {
                                    return Poll::Ready(Some(Ok(Frame::data(compressed))));
                                }
                            }
                            Err(frame) => {
                                if let Ok(trailers) = frame.into_trailers() {
                                    // Buffer trailers and finish compression first
                                    self.pending_trailers = Some(trailers);
                                    self.state = CompressState::Finishing;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Compresses a chunk of input data, returning whatever output the
    /// encoder produced for it.
    fn compress_chunk(&mut self, input: &[u8]) -> io::Result<Bytes> {
        let mut input_buf = PartialBuffer::new(input);
        let mut all_output = BytesMut::new();

        // Keep encoding until all input is consumed
        while input_buf.written_len() < input.len() {
            let consumed = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            } else if input_buf.written_len() == consumed {
                return Err(io::Error::other("gzip encoder made no progress"));
            }
        }

        Ok(all_output.freeze())
    }

    /// Finalizes the gzip stream, returning the remaining deflate data and
    /// the trailer.
    fn finish(&mut self) -> io::Result<Bytes> {
        let mut all_output = BytesMut::new();

        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self
                .encoder
                .finish(&mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }
            if done {
                return Ok(all_output.freeze());
            }
        }
    }
}

// Only records early termination; the encoder itself is freed with the
// other fields.
impl Drop for CompressedBody {
    fn drop(&mut self) {
        if self.state != CompressState::Done {
            tracing::trace!(state = ?self.state, "gzip body dropped before completion");
        }
    }
}

impl<B> CompressionBody<B> {
    /// Creates a gzip-compressed body.
    pub fn compressed(inner: B) -> Self {
        Self::compressed_with_replay(Box::pin(inner), None)
    }

    /// Creates a compressed body around an already pinned inner body, with a
    /// frame that was read ahead and must be compressed first.
    pub(crate) fn compressed_with_replay(
        inner: Pin<Box<B>>,
        replay: Option<io::Result<Frame<Bytes>>>,
    ) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(replay),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => {
                // Pass through frames, converting data to Bytes
                inner.poll_frame(cx).map(|frame| frame.map(convert_frame))
            }
            CompressionBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            // Compressed size is unknown
            CompressionBody::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}

/// Converts a frame of the inner body into a `Bytes` frame with an
/// `io::Error`.
pub(crate) fn convert_frame<D, E>(frame: Result<Frame<D>, E>) -> io::Result<Frame<Bytes>>
where
    D: Buf,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match frame {
        Ok(frame) => Ok(frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))),
        Err(e) => Err(io::Error::other(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::collections::VecDeque;
    use std::io::Read;

    /// A test body that yields predefined frames.
    struct TestBody {
        frames: VecDeque<Frame<Bytes>>,
    }

    impl TestBody {
        fn new(frames: Vec<Frame<Bytes>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl Body for TestBody {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            match self.frames.pop_front() {
                Some(frame) => Poll::Ready(Some(Ok(frame))),
                None => Poll::Ready(None),
            }
        }
    }

    /// A test body that fails on first poll.
    struct FailingBody;

    impl Body for FailingBody {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection reset",
            ))))
        }
    }

    fn poll_body<B: Body + Unpin>(body: &mut B) -> Option<Result<Frame<B::Data>, B::Error>> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        match Pin::new(body).poll_frame(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => None,
        }
    }

    /// Drains a compressed body, returning the concatenated data and any
    /// trailers.
    fn drain<B>(body: &mut CompressionBody<B>) -> (Vec<u8>, Option<HeaderMap>)
    where
        B: Body + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(frame) = poll_body(body) {
            let frame = frame.unwrap();
            if frame.is_data() {
                data.extend_from_slice(&frame.into_data().unwrap());
            } else if frame.is_trailers() {
                trailers = Some(frame.into_trailers().unwrap());
            }
        }
        (data, trailers)
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut decoded)
            .unwrap();
        decoded
    }

    #[test]
    fn test_passthrough_data() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from("hello world"))]);
        let mut body = CompressionBody::passthrough(inner);

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_data());
        assert_eq!(frame.into_data().unwrap(), Bytes::from("hello world"));

        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_passthrough_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("data")),
            Frame::trailers(trailers.clone()),
        ]);
        let mut body = CompressionBody::passthrough(inner);

        // First frame is data
        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_data());

        // Second frame is trailers
        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_trailers());
        let received_trailers = frame.into_trailers().unwrap();
        assert_eq!(received_trailers.get("x-checksum").unwrap(), "abc123");

        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_passthrough_error() {
        let mut body = CompressionBody::passthrough(FailingBody);
        let err = poll_body(&mut body).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_compressed_round_trip() {
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello ")),
            Frame::data(Bytes::from("world")),
        ]);
        let mut body = CompressionBody::compressed(inner);

        let (data, trailers) = drain(&mut body);
        // gzip magic
        assert_eq!(&data[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&data), b"hello world");
        assert!(trailers.is_none());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_compressed_empty_body_is_valid_gzip() {
        let mut body = CompressionBody::compressed(TestBody::new(vec![]));

        let (data, _) = drain(&mut body);
        assert!(!data.is_empty());
        assert!(gunzip(&data).is_empty());
    }

    #[test]
    fn test_compressed_with_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello world")),
            Frame::trailers(trailers),
        ]);
        let mut body = CompressionBody::compressed(inner);

        let (data, trailers) = drain(&mut body);
        assert_eq!(gunzip(&data), b"hello world");

        let trailers = trailers.expect("Expected trailers frame");
        assert_eq!(trailers.get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_replayed_frame_is_compressed_first() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from(" world"))]);
        let mut body = CompressionBody::compressed_with_replay(
            Box::pin(inner),
            Some(Ok(Frame::data(Bytes::from("hello")))),
        );

        match &body {
            CompressionBody::Compressed { state, .. } => {
                assert_eq!(state.state(), CompressState::Reading);
                assert!(state.has_replay());
            }
            _ => panic!("Expected compressed body"),
        }

        let (data, _) = drain(&mut body);
        assert_eq!(gunzip(&data), b"hello world");
    }

    #[test]
    fn test_compressed_error_is_propagated() {
        let mut body = CompressionBody::compressed(FailingBody);
        let err = poll_body(&mut body).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_compressed_error_ends_stream() {
        let mut body = CompressionBody::compressed(FailingBody);
        assert!(poll_body(&mut body).unwrap().is_err());

        match &body {
            CompressionBody::Compressed { state, .. } => {
                assert_eq!(state.state(), CompressState::Done);
            }
            _ => panic!("Expected compressed body"),
        }
        assert!(body.is_end_stream());

        // The failed inner body is not polled again
        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_large_body_round_trip() {
        let chunk: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from(chunk.clone())),
            Frame::data(Bytes::from(chunk.clone())),
        ]);
        let mut body = CompressionBody::compressed(inner);

        let (data, _) = drain(&mut body);
        let decoded = gunzip(&data);
        assert_eq!(decoded.len(), chunk.len() * 2);
        assert_eq!(&decoded[..chunk.len()], chunk.as_slice());
        assert_eq!(&decoded[chunk.len()..], chunk.as_slice());
    }

    #[test]
    fn test_size_hint_unknown_when_compressed() {
        let body = CompressionBody::compressed(TestBody::new(vec![]));
        assert_eq!(body.size_hint().exact(), None);
    }
}
