use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Adapts a WebSocket connection to the duplex byte-stream contract of a TCP
/// socket, so the bridge can treat both legs uniformly.
///
/// Inbound data frames become readable bytes; writes are sent as binary
/// frames. A Close frame (or the end of the message stream) reads as EOF, and
/// writing after the connection is closed fails with an `io::Error` instead
/// of panicking. Payloads are opaque bytes throughout; nothing is re-encoded.
pub struct WsStream<S> {
    inner: WebSocketStream<S>,
    /// Remainder of an inbound frame the reader has not consumed yet.
    read_buf: Bytes,
}

impl<S> WsStream<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            read_buf: Bytes::new(),
        }
    }
}

fn into_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::NotConnected, err)
        }
        other => io::Error::other(other),
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_buf.is_empty() {
                let n = this.read_buf.len().min(buf.remaining());
                buf.put_slice(&this.read_buf[..n]);
                this.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => this.read_buf = Bytes::from(data),
                // Text frames are still opaque payload bytes to the relay.
                Some(Ok(Message::Text(text))) => this.read_buf = Bytes::from(text.into_bytes()),
                // tungstenite queues the pong reply internally.
                Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_))) => {
                    continue
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        "WebSocket closed by peer: {:?}",
                        frame.map(|f| f.reason.to_string())
                    );
                    return Poll::Ready(Ok(()));
                }
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return Poll::Ready(Ok(()))
                }
                Some(Err(e)) => return Poll::Ready(Err(into_io(e))),
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.inner).poll_ready(cx)).map_err(into_io)?;
        Pin::new(&mut this.inner)
            .start_send(Message::Binary(buf.to_vec()))
            .map_err(into_io)?;
        // tungstenite holds queued frames in its write buffer until flushed,
        // so push the frame toward the socket now. Interactive sessions send
        // small frames that must not wait for the buffer to fill. A Pending
        // flush is fine: the frame is queued and the next write or flush
        // completes it.
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(into_io(e))),
            _ => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(into_io)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match ready!(Pin::new(&mut self.get_mut().inner).poll_close(cx)) {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(into_io(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot WebSocket server that echoes data frames back to the client.
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() || msg.is_text() {
                    if ws.send(msg).await.is_err() {
                        break;
                    }
                } else if msg.is_close() {
                    break;
                }
            }
        });
        addr
    }

    async fn connect(addr: SocketAddr) -> WsStream<impl AsyncRead + AsyncWrite + Unpin> {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        WsStream::new(ws)
    }

    #[tokio::test]
    async fn writes_come_back_as_readable_bytes() {
        let addr = spawn_echo_server().await;
        let mut stream = connect(addr).await;

        stream.write_all(b"hello over websocket").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 20];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello over websocket");
    }

    #[tokio::test]
    async fn binary_payloads_survive_unmodified() {
        let addr = spawn_echo_server().await;
        let mut stream = connect(addr).await;

        // Every byte value, including ones invalid as UTF-8.
        let payload: Vec<u8> = (0..=255u8).collect();
        stream.write_all(&payload).await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, payload);
    }

    #[tokio::test]
    async fn write_alone_delivers_the_frame() {
        let addr = spawn_echo_server().await;
        let mut stream = connect(addr).await;

        // No explicit flush: delivery must not depend on the caller flushing,
        // or small frames sit in the WebSocket write buffer indefinitely.
        stream.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
            .await
            .expect("frame was never delivered")
            .unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn partial_reads_drain_a_frame_across_calls() {
        let addr = spawn_echo_server().await;
        let mut stream = connect(addr).await;

        stream.write_all(b"abcdef").await.unwrap();
        stream.flush().await.unwrap();

        let mut first = [0u8; 2];
        stream.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"ab");

        let mut rest = [0u8; 4];
        stream.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"cdef");
    }

    #[tokio::test]
    async fn server_close_reads_as_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut stream = connect(addr).await;
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn write_after_shutdown_fails_cleanly() {
        let addr = spawn_echo_server().await;
        let mut stream = connect(addr).await;

        stream.shutdown().await.unwrap();
        let result = stream.write_all(b"too late").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn abrupt_tcp_close_surfaces_on_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Drop without a close handshake.
            drop(ws);
        });

        let mut stream = connect(addr).await;
        let mut buf = [0u8; 8];
        // Either a clean EOF or a protocol error is acceptable; it must not
        // hang or panic.
        let result = stream.read(&mut buf).await;
        assert!(matches!(result, Ok(0) | Err(_)));
    }
}
