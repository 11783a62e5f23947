//! Raw bidirectional piping between the downstream connection and a
//! proxied upstream.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Per-direction inactivity limits for an established tunnel.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TunnelTimeouts {
    pub(crate) read: Option<Duration>,
    pub(crate) write: Option<Duration>,
}

/// Pipes bytes both ways until either side closes or errors. The two
/// directions are independent; byte order is preserved per direction.
pub(crate) async fn run<R, W>(
    mut client_read: R,
    mut client_write: W,
    upstream: TcpStream,
    timeouts: TunnelTimeouts,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let downstream_to_upstream = async {
        let result = copy_with_timeout(&mut client_read, &mut upstream_write, timeouts.write).await;
        let _ = upstream_write.shutdown().await;
        result
    };
    let upstream_to_downstream = async {
        let result = copy_with_timeout(&mut upstream_read, &mut client_write, timeouts.read).await;
        let _ = client_write.shutdown().await;
        result
    };

    // either direction finishing tears the whole tunnel down; the shutdown
    // above unblocks the peer copy
    let (up, down) = tokio::join!(downstream_to_upstream, upstream_to_downstream);
    match (up, down) {
        (Ok(sent), Ok(received)) => debug!(sent, received, "tunnel finished"),
        (up, down) => debug!(up_result = ?up, down_result = ?down, "tunnel closed with error"),
    }
}

/// `tokio::io::copy` with an optional per-chunk inactivity timeout.
async fn copy_with_timeout<R, W>(reader: &mut R, writer: &mut W, limit: Option<Duration>) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;
    loop {
        let read = async { reader.read(&mut buf).await };
        let n = match limit {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result?,
                Err(_) => {
                    trace!("tunnel direction idle past its timeout");
                    return Err(std::io::Error::from(std::io::ErrorKind::TimedOut));
                }
            },
            None => read.await?,
        };
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
