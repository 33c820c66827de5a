//! Pull-based stream of decoded RESP values over any `AsyncRead`.
//!
//! [`RespStream::next`] yields one `ParseResult<RespValue>` per call. A
//! malformed frame yields an error and the stream keeps going; only end of
//! input or a read failure ends it, after which `next` returns `None`.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::parser::{ParseError, ParseResult, RespDecoder};
use super::types::RespValue;

/// Initial buffer capacity (4 KB)
const INITIAL_BUFFER_SIZE: usize = 4096;

pub struct RespStream<R> {
    reader: R,
    buffer: BytesMut,
    decoder: RespDecoder,
    closed: bool,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> RespStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: RespDecoder::new(),
            closed: false,
            bytes_read: 0,
        }
    }

    /// Waits for the next decoded value.
    ///
    /// Returns `None` once the source is exhausted or has failed.
    pub async fn next(&mut self) -> Option<ParseResult<RespValue>> {
        loop {
            if self.closed {
                return None;
            }

            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }

            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    self.closed = true;
                    if !self.buffer.is_empty() || !self.decoder.is_idle() {
                        trace!(
                            pending = self.buffer.len(),
                            "Discarding incomplete frame at end of stream"
                        );
                    }
                    return None;
                }
                Ok(n) => self.bytes_read += n as u64,
                Err(e) => {
                    self.closed = true;
                    return Some(Err(ParseError::Io(e)));
                }
            }
        }
    }

    /// Decodes the next value from already-buffered bytes without reading.
    ///
    /// Returns `None` when more input is needed.
    pub fn try_next(&mut self) -> Option<ParseResult<RespValue>> {
        if self.closed {
            return None;
        }
        self.decoder.decode(&mut self.buffer).transpose()
    }

    /// Total bytes read from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_values_split_across_reads() {
        let reader = Builder::new()
            .read(b"*2\r\n$3\r\nGE")
            .read(b"T\r\n$1\r\nA\r\n:4")
            .read(b"2\r\n")
            .build();
        let mut stream = RespStream::new(reader);

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RespValue::command(["GET", "A"])
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), RespValue::Integer(42));
        assert!(stream.next().await.is_none());
        assert!(stream.is_closed());
        assert_eq!(stream.bytes_read(), 25);
    }

    #[tokio::test]
    async fn test_protocol_error_does_not_close() {
        let reader = Builder::new().read(b":nope\r\n$2\r\nok\r\n").build();
        let mut stream = RespStream::new(reader);

        assert!(matches!(
            stream.next().await,
            Some(Err(ParseError::InvalidInteger(_)))
        ));
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RespValue::BulkString(Bytes::from("ok"))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_read_error_closes() {
        let reader = Builder::new()
            .read(b"+PONG\r\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut stream = RespStream::new(reader);

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RespValue::SimpleString("PONG".into())
        );
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_partial_frame_at_eof() {
        let reader = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let mut stream = RespStream::new(reader);
        assert!(stream.next().await.is_none());
    }
}
