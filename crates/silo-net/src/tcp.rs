//! TCP transport implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use silo_proto::Frame;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::decoder::{Decoder, TagDecoder};
use crate::peer::TcpPeer;
use crate::transport::{HandshakeFn, PeerHooks, Transport, TransportError};

/// Capacity of the shared frame channel.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Per-connection context handed to accept and read-loop tasks.
#[derive(Clone)]
struct ConnContext {
    frames_tx: mpsc::Sender<Frame>,
    handshake: HandshakeFn,
    hooks: Arc<dyn PeerHooks>,
    decoder: Arc<dyn Decoder>,
}

/// TCP transport: accepts and dials connections, runs the handshake and
/// peer hooks, and feeds parsed frames onto one bounded channel.
pub struct TcpTransport {
    listen_addr: SocketAddr,
    ctx: ConnContext,
    frames_rx: parking_lot::Mutex<Option<mpsc::Receiver<Frame>>>,
    bound_addr: parking_lot::Mutex<Option<SocketAddr>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TcpTransport {
    /// Creates a transport that will listen on `listen_addr`.
    pub fn new(
        listen_addr: SocketAddr,
        handshake: HandshakeFn,
        hooks: Arc<dyn PeerHooks>,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            listen_addr,
            ctx: ConnContext {
                frames_tx,
                handshake,
                hooks,
                decoder: Arc::new(TagDecoder),
            },
            frames_rx: parking_lot::Mutex::new(Some(frames_rx)),
            bound_addr: parking_lot::Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Replaces the default frame decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.ctx.decoder = decoder;
        self
    }

    /// Runs the handshake and hooks for a new connection, then spawns its
    /// read loop.
    fn setup_conn(
        stream: TcpStream,
        outbound: bool,
        ctx: ConnContext,
    ) -> Result<(), TransportError> {
        let peer = Arc::new(TcpPeer::new(stream, outbound)?);

        (ctx.handshake)(&peer)?;
        ctx.hooks.on_peer(Arc::clone(&peer))?;

        tokio::spawn(Self::read_loop(peer, ctx));
        Ok(())
    }

    /// Per-connection read loop. Produces frames until the connection
    /// fails; unknown tags are logged and skipped, keeping the connection.
    async fn read_loop(peer: Arc<TcpPeer>, ctx: ConnContext) {
        let remote = peer.remote_addr();

        loop {
            let result = {
                let mut guard = peer.lock_reader().await;
                let reader: &mut (dyn AsyncRead + Unpin + Send) = &mut *guard;
                ctx.decoder.decode(reader).await
            };

            match result {
                Ok(raw) if raw.stream => {
                    peer.begin_stream();
                    if ctx.frames_tx.send(Frame::stream(remote)).await.is_err() {
                        break;
                    }
                    peer.wait_stream_done().await;
                }
                Ok(raw) => {
                    if ctx
                        .frames_tx
                        .send(Frame::message(remote, raw.payload))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(TransportError::Protocol { tag }) => {
                    warn!(peer = %remote, tag, "unexpected frame tag, skipping");
                }
                Err(e) => {
                    debug!(peer = %remote, error = %e, "connection closed");
                    break;
                }
            }
        }

        ctx.hooks.on_peer_closed(remote);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    async fn listen_and_accept(&self) -> Result<SocketAddr, TransportError> {
        let listener =
            TcpListener::bind(self.listen_addr)
                .await
                .map_err(|e| TransportError::Bind {
                    addr: self.listen_addr,
                    source: e,
                })?;

        let addr = listener.local_addr()?;
        *self.bound_addr.lock() = Some(addr);
        info!(%addr, "transport listening");

        let ctx = self.ctx.clone();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!(%addr, "listener closed");
                        break;
                    }
                    res = listener.accept() => match res {
                        Ok((stream, remote)) => {
                            debug!(%remote, "accepted connection");
                            if let Err(e) = Self::setup_conn(stream, false, ctx.clone()) {
                                warn!(peer = %remote, error = %e, "dropping connection");
                            }
                        }
                        Err(e) => {
                            // Transient accept failures keep the loop alive.
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        });

        Ok(addr)
    }

    async fn dial(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect { addr, source: e })?;

        debug!(peer = %addr, "dialed peer");
        Self::setup_conn(stream, true, self.ctx.clone())
    }

    fn take_frames(&self) -> Option<mpsc::Receiver<Frame>> {
        self.frames_rx.lock().take()
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::nop_handshake;
    use silo_proto::{MESSAGE_TAG, STREAM_TAG};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Hooks that collect admitted peers.
    struct CollectHooks {
        peers: parking_lot::Mutex<Vec<Arc<TcpPeer>>>,
    }

    impl CollectHooks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                peers: parking_lot::Mutex::new(Vec::new()),
            })
        }

        async fn wait_for_peer(&self) -> Arc<TcpPeer> {
            for _ in 0..100 {
                if let Some(peer) = self.peers.lock().first().cloned() {
                    return peer;
                }
                sleep(Duration::from_millis(10)).await;
            }
            panic!("no peer admitted in time");
        }
    }

    impl PeerHooks for CollectHooks {
        fn on_peer(&self, peer: Arc<TcpPeer>) -> Result<(), TransportError> {
            self.peers.lock().push(peer);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_message_frame_delivery() {
        let listen_hooks = CollectHooks::new();
        let listening = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            listen_hooks.clone(),
        );
        let addr = listening.listen_and_accept().await.unwrap();
        let mut frames = listening.take_frames().unwrap();

        let dial_hooks = CollectHooks::new();
        let dialing = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            dial_hooks.clone(),
        );
        dialing.dial(addr).await.unwrap();

        let peer = dial_hooks.wait_for_peer().await;
        assert!(peer.is_outbound());

        peer.send(&[MESSAGE_TAG]).await.unwrap();
        peer.send(b"payload").await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert!(!frame.stream);
        assert_eq!(frame.payload.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_stream_gate_sequencing() {
        let listen_hooks = CollectHooks::new();
        let listening = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            listen_hooks.clone(),
        );
        let addr = listening.listen_and_accept().await.unwrap();
        let mut frames = listening.take_frames().unwrap();

        let dial_hooks = CollectHooks::new();
        let dialing = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            dial_hooks.clone(),
        );
        dialing.dial(addr).await.unwrap();
        let sender = dial_hooks.wait_for_peer().await;

        // Stream: tag, then raw length-prefixed bytes.
        sender.send(&[STREAM_TAG]).await.unwrap();
        sender.send(&4u64.to_le_bytes()).await.unwrap();
        sender.send(b"body").await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert!(frame.stream);

        // The receiving side reads the raw bytes under the gate.
        let receiver = listen_hooks.wait_for_peer().await;
        let gate = receiver.await_stream().await;
        assert_eq!(receiver.read_u64_le().await.unwrap(), 4);
        let mut body = [0u8; 4];
        receiver.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"body");
        drop(gate);

        // The read loop resumes and parses the next control frame.
        sender.send(&[MESSAGE_TAG]).await.unwrap();
        sender.send(b"after").await.unwrap();
        let frame = frames.recv().await.unwrap();
        assert!(!frame.stream);
        assert_eq!(frame.payload.as_ref(), b"after");
    }

    #[tokio::test]
    async fn test_unknown_tag_keeps_connection() {
        let listen_hooks = CollectHooks::new();
        let listening = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            listen_hooks.clone(),
        );
        let addr = listening.listen_and_accept().await.unwrap();
        let mut frames = listening.take_frames().unwrap();

        let dial_hooks = CollectHooks::new();
        let dialing = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            nop_handshake(),
            dial_hooks.clone(),
        );
        dialing.dial(addr).await.unwrap();
        let peer = dial_hooks.wait_for_peer().await;

        peer.send(&[0x7F]).await.unwrap();
        sleep(Duration::from_millis(20)).await;

        peer.send(&[MESSAGE_TAG]).await.unwrap();
        peer.send(b"still alive").await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.payload.as_ref(), b"still alive");
    }
}
