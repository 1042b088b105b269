//! Peer connection handle and stream gate.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, Semaphore};

use crate::transport::TransportError;

/// A connected remote peer.
///
/// The transport's read loop owns frame parsing; raw stream bytes are read
/// directly through this handle under the stream gate. The gate is a pair
/// of counters local to the peer: the read loop releases `stream_begun`
/// after consuming a stream tag and then parks on `stream_done` until the
/// consumer calls [`TcpPeer::close_stream`]. A consumer acquires
/// `stream_begun` (via [`TcpPeer::await_stream`]) before touching the
/// connection, which serializes the handoff.
pub struct TcpPeer {
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    outbound: bool,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    stream_begun: Semaphore,
    stream_done: Semaphore,
}

impl TcpPeer {
    /// Wraps an established connection.
    pub fn new(stream: TcpStream, outbound: bool) -> std::io::Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            remote_addr,
            local_addr,
            outbound,
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            stream_begun: Semaphore::new(0),
            stream_done: Semaphore::new(0),
        })
    }

    /// Remote address of the connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True for dialed connections, false for accepted ones.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Writes `bytes` to the connection as one call. No framing is added;
    /// the caller is responsible for emitting the correct tag byte.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(())
    }

    /// Writes every slice in `parts` under a single writer lock. A
    /// logical message (tag, length, payload) must go through one call so
    /// concurrent senders to the same peer cannot interleave their bytes
    /// on the wire.
    pub async fn send_framed(&self, parts: &[&[u8]]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        for part in parts {
            writer.write_all(part).await?;
        }
        Ok(())
    }

    /// Reads exactly `buf.len()` raw bytes from the connection.
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut reader = self.reader.lock().await;
        reader.read_exact(buf).await?;
        Ok(())
    }

    /// Reads a little-endian u64 from the connection.
    pub async fn read_u64_le(&self) -> Result<u64, TransportError> {
        let mut reader = self.reader.lock().await;
        Ok(reader.read_u64_le().await?)
    }

    /// Waits until the read loop has consumed a stream tag and parked,
    /// i.e. the connection is ready for raw reads. The returned guard
    /// releases the gate when dropped, so no error path can leave the
    /// read loop parked.
    pub async fn await_stream(&self) -> StreamGuard<'_> {
        self.stream_begun
            .acquire()
            .await
            .expect("stream gate semaphore closed")
            .forget();
        StreamGuard { peer: self }
    }

    /// Releases the stream gate, letting the read loop resume frame
    /// parsing.
    pub fn close_stream(&self) {
        self.stream_done.add_permits(1);
    }

    /// Read-loop side: announces that a stream tag has been consumed.
    pub(crate) fn begin_stream(&self) {
        self.stream_begun.add_permits(1);
    }

    /// Read-loop side: parks until the consumer calls
    /// [`TcpPeer::close_stream`].
    pub(crate) async fn wait_stream_done(&self) {
        self.stream_done
            .acquire()
            .await
            .expect("stream gate semaphore closed")
            .forget();
    }

    /// Locks the read half for frame parsing.
    pub(crate) async fn lock_reader(&self) -> MutexGuard<'_, OwnedReadHalf> {
        self.reader.lock().await
    }
}

/// Holds the stream gate open while raw bytes are being consumed.
/// Dropping it calls [`TcpPeer::close_stream`].
pub struct StreamGuard<'a> {
    peer: &'a TcpPeer,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.peer.close_stream();
    }
}

impl std::fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeer")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("outbound", &self.outbound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn peer_pair() -> (TcpPeer, TcpPeer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialed = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        (
            TcpPeer::new(dialed, true).unwrap(),
            TcpPeer::new(accepted, false).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_send_and_read() {
        let (a, b) = peer_pair().await;

        a.send(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_read_u64_le() {
        let (a, b) = peer_pair().await;

        a.send(&42u64.to_le_bytes()).await.unwrap();
        assert_eq!(b.read_u64_le().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_stream_gate_handoff() {
        let (a, _b) = peer_pair().await;

        // Consumer parks until the read loop side opens the gate.
        a.begin_stream();
        let gate = a.await_stream().await;

        // Dropping the guard releases the read loop.
        drop(gate);
        a.wait_stream_done().await;
    }

    #[tokio::test]
    async fn test_send_framed_writes_all_parts() {
        let (a, b) = peer_pair().await;

        a.send_framed(&[&[0x02], &7u64.to_le_bytes(), b"payload"])
            .await
            .unwrap();

        let mut tag = [0u8; 1];
        b.read_exact(&mut tag).await.unwrap();
        assert_eq!(tag, [0x02]);
        assert_eq!(b.read_u64_le().await.unwrap(), 7);

        let mut body = [0u8; 7];
        b.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"payload");
    }
}
