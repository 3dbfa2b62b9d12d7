//! Tokio-based receiver, for hosts that already run an async runtime.

use std::future::poll_fn;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use depthlink_frame::{encode_ack, Ack, FrameError, PayloadCodec};
use futures_core::Stream;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_util::codec::FramedRead;
use tracing::info;

use crate::error::{PeerError, Result};
use crate::receiver::{ReceivedFrame, ReceiverConfig};

/// Async counterpart of [`FrameReceiver`](crate::FrameReceiver).
pub struct AsyncFrameReceiver {
    listener: TcpListener,
    config: ReceiverConfig,
}

impl AsyncFrameReceiver {
    pub async fn bind(addr: &str, config: ReceiverConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            depthlink_transport::TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        Ok(Self { listener, config })
    }

    pub async fn accept(&self) -> Result<AsyncReceiverSession> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(depthlink_transport::TransportError::Accept)?;
        stream
            .set_nodelay(true)
            .map_err(depthlink_transport::TransportError::Io)?;
        info!(%peer, "sender connected");

        let (read, write) = stream.into_split();
        Ok(AsyncReceiverSession {
            frames: FramedRead::new(
                read,
                PayloadCodec::with_max_payload(self.config.max_payload_size),
            ),
            acks: write,
            ack_buf: BytesMut::with_capacity(4),
            config: self.config.clone(),
            peer,
            received: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| depthlink_transport::TransportError::Io(e).into())
    }
}

/// A connected sender, read through [`PayloadCodec`].
pub struct AsyncReceiverSession {
    frames: FramedRead<OwnedReadHalf, PayloadCodec>,
    acks: OwnedWriteHalf,
    ack_buf: BytesMut,
    config: ReceiverConfig,
    peer: SocketAddr,
    received: u64,
}

impl AsyncReceiverSession {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Receive one frame: color, ack, depth, ack.
    pub async fn recv_frame(&mut self) -> Result<ReceivedFrame> {
        let color = self.next_payload().await?;
        let started = Instant::now();
        self.send_ack(Ack::Success).await?;
        let depth = self.next_payload().await?;
        self.send_ack(Ack::Success).await?;

        self.received += 1;
        Ok(ReceivedFrame {
            sequence: self.received,
            color,
            depth,
            elapsed: started.elapsed(),
        })
    }

    async fn next_payload(&mut self) -> Result<Bytes> {
        let next = poll_fn(|cx| Pin::new(&mut self.frames).poll_next(cx));
        let item = match self.config.io_timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| PeerError::Timeout(limit))?,
            None => next.await,
        };
        match item {
            Some(payload) => Ok(payload?),
            None => Err(FrameError::ConnectionClosed.into()),
        }
    }

    async fn send_ack(&mut self, ack: Ack) -> Result<()> {
        self.ack_buf.clear();
        encode_ack(ack, &mut self.ack_buf);
        self.acks
            .write_all(&self.ack_buf)
            .await
            .map_err(FrameError::Io)?;
        Ok(())
    }
}
