//! Stream abstraction for TCP, TLS, and Unix socket connections.
//!
//! TLS wraps whatever transport the handshake started on, so the TLS variant
//! holds a boxed `MySqlStream` rather than a bare `TcpStream`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;

/// Any byte stream the driver can speak the protocol over.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> RawStream for T {}

/// A MySQL connection stream (TCP, TLS, Unix or caller-supplied).
pub enum MySqlStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<MySqlStream>>),
    /// Unix domain socket connection
    #[cfg(unix)]
    Unix(UnixStream),
    Custom(Box<dyn RawStream>),
    /// Placeholder while the transport is being moved into a TLS session.
    Detached,
}

impl MySqlStream {
    /// Whether the transport is already private without TLS.
    pub fn is_secure(&self) -> bool {
        match self {
            MySqlStream::Tls(_) => true,
            #[cfg(unix)]
            MySqlStream::Unix(_) => true,
            _ => false,
        }
    }

    /// Move the transport out, leaving [`MySqlStream::Detached`] behind.
    pub fn detach(&mut self) -> MySqlStream {
        std::mem::replace(self, MySqlStream::Detached)
    }
}

impl std::fmt::Debug for MySqlStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            MySqlStream::Tcp(_) => "Tcp",
            MySqlStream::Tls(_) => "Tls",
            #[cfg(unix)]
            MySqlStream::Unix(_) => "Unix",
            MySqlStream::Custom(_) => "Custom",
            MySqlStream::Detached => "Detached",
        };
        f.debug_tuple("MySqlStream").field(&kind).finish()
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream detached during TLS upgrade")
}

impl AsyncRead for MySqlStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MySqlStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            MySqlStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            MySqlStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            MySqlStream::Custom(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            MySqlStream::Detached => Poll::Ready(Err(detached())),
        }
    }
}

impl AsyncWrite for MySqlStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MySqlStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            MySqlStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            MySqlStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            MySqlStream::Custom(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            MySqlStream::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MySqlStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            MySqlStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            MySqlStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
            MySqlStream::Custom(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            MySqlStream::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MySqlStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            MySqlStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            MySqlStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            MySqlStream::Custom(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            MySqlStream::Detached => Poll::Ready(Ok(())),
        }
    }
}
