use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream a connection runs over: a TCP socket in production, an
/// in-memory duplex pipe in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;
