//! Async stream abstraction for tokio.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::codec::{HEADER_LEN, parse_header};

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// The underlying stream, shared with the [`Disconnector`].
///
/// The lock is only held for the duration of a single poll. Once the stream
/// has been taken, reads see EOF and writes fail with `NotConnected`.
#[derive(Clone)]
struct Transport(Arc<parking_lot::Mutex<Option<Box<dyn AsyncStream>>>>);

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport was closed")
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.0.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Closes a [`Stream`]'s transport from outside the task that owns it.
#[derive(Clone)]
pub(crate) struct Disconnector(Transport);

impl Disconnector {
    /// Drop the underlying stream. Returns false if it was already gone.
    pub(crate) fn disconnect(&self) -> bool {
        let stream = self.0.0.lock().take();
        stream.is_some()
    }
}

/// Transport for one session, positioned after startup and authentication.
pub struct Stream {
    inner: BufReader<Transport>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl Stream {
    pub fn new<S: AsyncStream + 'static>(stream: S) -> Self {
        let transport = Transport(Arc::new(parking_lot::Mutex::new(Some(Box::new(stream)))));
        Self {
            inner: BufReader::new(transport),
        }
    }

    pub fn tcp(stream: TcpStream) -> Self {
        Self::new(stream)
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::new(stream)
    }

    pub(crate) fn disconnector(&self) -> Disconnector {
        Disconnector(self.inner.get_ref().clone())
    }

    /// Read one backend message into `buffer_set`.
    ///
    /// The payload buffer grows to whatever length the header announces. EOF
    /// means the server went away and is reported as `ConnectionClosed`.
    ///
    /// Cancel safe: progress through a partly received frame is kept in
    /// `buffer_set`, and the next call picks up where this one stopped.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        while buffer_set.frame_filled < HEADER_LEN {
            let filled = buffer_set.frame_filled;
            let n = self.inner.read(&mut buffer_set.header[filled..]).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buffer_set.frame_filled += n;
            if buffer_set.frame_filled == HEADER_LEN {
                let (type_byte, len) = parse_header(&buffer_set.header)?;
                buffer_set.type_byte = type_byte;
                buffer_set.read_buffer.clear();
                buffer_set.read_buffer.resize(len, 0);
            }
        }

        loop {
            let filled = buffer_set.frame_filled - HEADER_LEN;
            if filled == buffer_set.read_buffer.len() {
                break;
            }
            let n = self.inner.read(&mut buffer_set.read_buffer[filled..]).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buffer_set.frame_filled += n;
        }
        buffer_set.frame_filled = 0;
        Ok(())
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.get_mut().write_all(buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.get_mut().flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.get_mut().shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut msg = vec![tag];
        msg.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(payload);
        msg
    }

    #[tokio::test]
    async fn test_read_large_message() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut stream = Stream::new(client);

        let payload = vec![b'x'; 100 * 1024];
        let writer = tokio::spawn(async move {
            server.write_all(&frame(b'D', &payload)).await.unwrap();
            server
        });

        let mut buffer_set = BufferSet::new();
        stream.read_message(&mut buffer_set).await.unwrap();
        assert_eq!(buffer_set.type_byte, b'D');
        assert_eq!(buffer_set.read_buffer.len(), 100 * 1024);
        assert!(!buffer_set.in_frame());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut stream = Stream::new(client);
        let mut buffer_set = BufferSet::new();
        assert!(matches!(
            stream.read_message(&mut buffer_set).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_read_resumes_mid_frame() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut stream = Stream::new(client);
        let mut buffer_set = BufferSet::new();

        // payload that itself looks like a ReadyForQuery frame
        let payload = frame(b'Z', b"I");
        let mut wire = frame(b'D', &payload);
        wire.extend(frame(b'Z', b"T"));

        // header split in two, then part of the payload
        for chunk in [&wire[..2], &wire[2..7]] {
            server.write_all(chunk).await.unwrap();
            let read = tokio::time::timeout(
                Duration::from_millis(20),
                stream.read_message(&mut buffer_set),
            )
            .await;
            assert!(read.is_err());
            assert!(buffer_set.in_frame());
        }

        server.write_all(&wire[7..]).await.unwrap();
        stream.read_message(&mut buffer_set).await.unwrap();
        assert_eq!(buffer_set.type_byte, b'D');
        assert_eq!(buffer_set.read_buffer, payload);

        stream.read_message(&mut buffer_set).await.unwrap();
        assert_eq!(buffer_set.type_byte, b'Z');
        assert_eq!(buffer_set.read_buffer, b"T");
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = Stream::new(client);
        let disconnector = stream.disconnector();

        assert!(disconnector.disconnect());
        assert!(!disconnector.disconnect());

        let mut buf = [0_u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);

        let mut buffer_set = BufferSet::new();
        assert!(matches!(
            stream.read_message(&mut buffer_set).await,
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(
            stream.write_all(b"X").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }
}
