//! UDP dispatcher (C4).
//!
//! A single UDP socket is shared between every in-flight query of the
//! same IP family: IPv4 queries go out of one socket, IPv6 queries go out
//! of another.  Responses are demultiplexed by the 16-bit transaction id
//! in the DNS header, which doubles as the key for the pending-request
//! map.  This is the same model as a TCP connection pool, just for a
//! connectionless protocol: one socket, many outstanding requests.
//!
//! The dispatcher does not parse or validate the response: it hands back
//! raw bytes and lets the client (C6) decide whether they form a valid
//! answer to the question that was asked.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::transaction::TransactionIdPool;

type PendingMap = Mutex<HashMap<u16, oneshot::Sender<BytesMut>>>;

/// An error that can occur while dispatching a UDP request.
#[derive(Debug)]
pub enum DispatchError {
    /// Every transaction id is currently in flight on this socket.
    NoTransactionId,
    Io(io::Error),
    /// No response arrived within the timeout.
    Timeout,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DispatchError::NoTransactionId => write!(f, "no free transaction id"),
            DispatchError::Io(err) => write!(f, "i/o error: {err}"),
            DispatchError::Timeout => write!(f, "timed out waiting for response"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Multiplexes outstanding UDP requests over a single socket.
pub struct UdpDispatcher {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    ids: Mutex<TransactionIdPool>,
}

impl UdpDispatcher {
    /// Bind a fresh socket for the given local address (use `0.0.0.0:0`
    /// or `[::]:0` to pick an ephemeral port for the appropriate family)
    /// and start its background receive loop.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, io::Error> {
        let socket = Arc::new(UdpSocket::bind(local_addr).await?);
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        let recv_socket = Arc::clone(&socket);
        let recv_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            recv_loop(recv_socket, recv_pending).await;
        });

        Ok(Self {
            socket,
            pending,
            ids: Mutex::new(TransactionIdPool::new()),
        })
    }

    /// Send `bytes` (a fully-serialised DNS message, with the transaction
    /// id already written into the first two bytes of the header) to
    /// `address` and wait up to `timeout_duration` for a datagram tagged
    /// with the same id.
    ///
    /// `bytes` must have a fresh id allocated from this dispatcher
    /// written into its header; see [`UdpDispatcher::allocate_id`].
    pub async fn send(
        &self,
        id: u16,
        bytes: &mut [u8],
        address: SocketAddr,
        timeout_duration: Duration,
    ) -> Result<BytesMut, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let send_result = crate::util::net::send_udp_bytes_to(&self.socket, address, bytes).await;
        if let Err(err) = send_result {
            self.pending.lock().await.remove(&id);
            self.release_id(id).await;
            return Err(DispatchError::Io(err));
        }

        let result = match timeout(timeout_duration, rx).await {
            Ok(Ok(datagram)) => Ok(datagram),
            Ok(Err(_)) => Err(DispatchError::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DispatchError::Timeout)
            }
        };

        self.release_id(id).await;
        result
    }

    /// Allocate a fresh transaction id from this dispatcher's pool.
    pub async fn allocate_id(&self) -> Result<u16, DispatchError> {
        self.ids.lock().await.get().ok_or(DispatchError::NoTransactionId)
    }

    async fn release_id(&self, id: u16) {
        self.ids.lock().await.put(id);
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, pending: Arc<PendingMap>) {
    let mut buf = vec![0u8; 65535];
    loop {
        let (len, _from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(?err, "udp dispatcher recv error");
                continue;
            }
        };

        if len < 2 {
            continue;
        }
        let id = u16::from_be_bytes([buf[0], buf[1]]);

        let sender = pending.lock().await.remove(&id);
        if let Some(sender) = sender {
            let _ = sender.send(BytesMut::from(&buf[..len]));
        }
        // Unsolicited or late datagrams (no matching pending request) are
        // silently dropped.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn loopback_dispatcher() -> (UdpDispatcher, SocketAddr) {
        let dispatcher = UdpDispatcher::bind((Ipv4Addr::LOCALHOST, 0).into())
            .await
            .unwrap();
        let addr = dispatcher.socket.local_addr().unwrap();
        (dispatcher, addr)
    }

    #[tokio::test]
    async fn times_out_when_nothing_answers() {
        let (dispatcher, _addr) = loopback_dispatcher().await;
        let other = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0).into())
            .await
            .unwrap();
        let other_addr = other.local_addr().unwrap();

        let id = dispatcher.allocate_id().await.unwrap();
        let mut bytes = vec![0u8; 12];
        bytes[0..2].copy_from_slice(&id.to_be_bytes());

        let result = dispatcher
            .send(id, &mut bytes, other_addr, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(DispatchError::Timeout)));
    }

    #[tokio::test]
    async fn receives_matching_response() {
        let (dispatcher, _addr) = loopback_dispatcher().await;
        let responder = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0).into())
            .await
            .unwrap();
        let responder_addr = responder.local_addr().unwrap();

        let id = dispatcher.allocate_id().await.unwrap();
        let mut bytes = vec![0u8; 12];
        bytes[0..2].copy_from_slice(&id.to_be_bytes());
        let sent = bytes.clone();

        let responder_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            responder.send_to(&buf[..len], from).await.unwrap();
        });

        let response = dispatcher
            .send(id, &mut bytes, responder_addr, Duration::from_secs(2))
            .await
            .unwrap();
        responder_task.await.unwrap();
        assert_eq!(response.as_ref(), sent.as_slice());
    }
}
