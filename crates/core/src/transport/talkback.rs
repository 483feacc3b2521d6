use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, StreamError};

const RELAY_CHUNK: usize = 4096;

/// TCP connection to the camera's talkback endpoint.
///
/// Carries decoded return audio (ADTS AAC from the return-audio
/// transcoder) to the camera speaker. The relay owns the connection and
/// closes it when the source reaches EOF or a send fails.
pub struct TalkbackRelay {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TalkbackRelay {
    /// Open the talkback connection, giving up after `timeout`.
    pub async fn connect(endpoint: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(StreamError::TalkbackChannelUnavailable(format!(
                    "{endpoint}: {e}"
                )));
            }
            Err(_) => {
                return Err(StreamError::TalkbackChannelUnavailable(format!(
                    "{endpoint}: connect timed out after {timeout:?}"
                )));
            }
        };
        stream.set_nodelay(true)?;

        tracing::info!(peer_addr = %endpoint, "talkback connected");
        Ok(Self {
            stream,
            peer_addr: endpoint,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Copy `source` to the camera until EOF or a send error.
    ///
    /// Returns the reason the relay ended.
    pub async fn relay<R>(mut self, mut source: R) -> &'static str
    where
        R: AsyncRead + Unpin,
    {
        let reason = self.run(&mut source).await;
        let _ = self.stream.shutdown().await;
        tracing::info!(peer_addr = %self.peer_addr, reason, "talkback closed");
        reason
    }

    async fn run<R>(&mut self, source: &mut R) -> &'static str
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; RELAY_CHUNK];
        let mut total = 0usize;
        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => return "transcoder output closed",
                Ok(n) => n,
                Err(_) => return "transcoder read error",
            };

            if self.stream.write_all(&buf[..n]).await.is_err() {
                return "write error";
            }

            if total == 0 {
                tracing::debug!(peer_addr = %self.peer_addr, "first talkback bytes relayed");
            }
            total += n;
            tracing::trace!(peer_addr = %self.peer_addr, len = n, total, "talkback chunk");
        }
    }
}
