use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const RELAY_BUFFER_SIZE: usize = 8192;

/// Byte totals for a finished bridge, one counter per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeSummary {
    /// Bytes relayed from the first stream to the second.
    pub a_to_b: u64,
    /// Bytes relayed from the second stream to the first.
    pub b_to_a: u64,
}

/// Splices two duplex streams together: each side's inbound data becomes the
/// other side's outbound data, in order, until either side reaches EOF or
/// errors. Both write halves are then shut down, so neither leg keeps
/// relaying after the other is gone.
///
/// No flow control is added beyond the transports' own backpressure: each
/// direction awaits the write before reading more, so at most one buffer per
/// direction is in flight.
pub async fn bridge<A, B>(a: A, b: B) -> BridgeSummary
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let mut a_buf = [0u8; RELAY_BUFFER_SIZE];
    let mut b_buf = [0u8; RELAY_BUFFER_SIZE];
    let mut summary = BridgeSummary::default();

    loop {
        tokio::select! {
            res = a_read.read(&mut a_buf) => match res {
                Ok(0) => {
                    debug!("first leg closed");
                    break;
                }
                Ok(n) => {
                    // Flush per chunk: the WebSocket leg buffers frames until
                    // flushed, and a stalled frame stalls the whole session.
                    if b_write.write_all(&a_buf[..n]).await.is_err()
                        || b_write.flush().await.is_err()
                    {
                        break;
                    }
                    summary.a_to_b += n as u64;
                }
                Err(e) => {
                    debug!("first leg read error: {}", e);
                    break;
                }
            },
            res = b_read.read(&mut b_buf) => match res {
                Ok(0) => {
                    debug!("second leg closed");
                    break;
                }
                Ok(n) => {
                    if a_write.write_all(&b_buf[..n]).await.is_err()
                        || a_write.flush().await.is_err()
                    {
                        break;
                    }
                    summary.b_to_a += n as u64;
                }
                Err(e) => {
                    debug!("second leg read error: {}", e);
                    break;
                }
            },
        }
    }

    // Fail-together: tear down both sides regardless of which one ended.
    // Shutdown on an already-closed stream is a no-op here.
    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relays_bytes_in_both_directions() {
        let (mut left, bridge_a) = tokio::io::duplex(64);
        let (bridge_b, mut right) = tokio::io::duplex(64);

        let handle = tokio::spawn(bridge(bridge_a, bridge_b));

        left.write_all(b"SSH-2.0-OpenSSH\r\n").await.unwrap();
        let mut buf = [0u8; 17];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SSH-2.0-OpenSSH\r\n");

        right.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(left);
        let summary = handle.await.unwrap();
        assert_eq!(summary.a_to_b, 17);
        assert_eq!(summary.b_to_a, 4);
    }

    #[tokio::test]
    async fn closing_one_leg_closes_the_other() {
        let (left, bridge_a) = tokio::io::duplex(64);
        let (bridge_b, mut right) = tokio::io::duplex(64);

        let handle = tokio::spawn(bridge(bridge_a, bridge_b));

        // Closing the first leg must propagate EOF to the second.
        drop(left);

        let mut buf = [0u8; 16];
        let n = right.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn content_is_preserved_across_chunk_boundaries() {
        let (mut left, bridge_a) = tokio::io::duplex(16);
        let (bridge_b, mut right) = tokio::io::duplex(16);

        tokio::spawn(bridge(bridge_a, bridge_b));

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            left.write_all(&payload).await.unwrap();
            left
        });

        let mut received = vec![0u8; expected.len()];
        right.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        writer.await.unwrap();
    }
}
