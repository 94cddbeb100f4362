//! Byte-stream transport.  Accepted and dialed TCP connections run a read
//! loop and a write loop; everything they produce lands in one event queue
//! that the peer manager drains.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{read_message, write_message};
use crate::error::NetworkError;
use crate::message::NetMessage;

const EVENT_QUEUE_SIZE: usize = 4096;
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Events the transport delivers to its consumer, in per-connection FIFO
/// order.
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened(ConnectionHandle),
    Message(ConnectionId, NetMessage),
    Closed(ConnectionId),
    /// The queue is shutting down; the receiver should stop draining.
    Shutdown,
}

/// Cheap clonable reference to a live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("inbound", &self.inner.inbound)
            .finish()
    }
}

struct HandleInner {
    id: ConnectionId,
    remote: SocketAddr,
    inbound: bool,
    outbound: mpsc::Sender<NetMessage>,
    valid: AtomicBool,
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    fn new(
        id: ConnectionId,
        remote: SocketAddr,
        inbound: bool,
        outbound: mpsc::Sender<NetMessage>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                id,
                remote,
                inbound,
                outbound,
                valid: AtomicBool::new(true),
                closed,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn is_inbound(&self) -> bool {
        self.inner.inbound
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Queue a message for the write loop.  Never blocks; a full queue is
    /// reported so the caller can treat the peer as stalled.
    pub fn send_message(&self, message: NetMessage) -> Result<(), NetworkError> {
        if !self.is_valid() {
            return Err(NetworkError::ConnectionGone(self.id()));
        }
        self.inner.outbound.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => NetworkError::QueueFull(self.id()),
            mpsc::error::TrySendError::Closed(_) => NetworkError::ConnectionGone(self.id()),
        })
    }

    /// Initiate teardown.  Both loops observe the closed flag; the read
    /// loop emits the `Closed` event once it unwinds.
    pub fn close(&self) {
        if self.inner.valid.swap(false, Ordering::AcqRel) {
            let _ = self.inner.closed.send(true);
        }
    }

    fn closed_rx(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn loopback_for_tests(
        id: u64,
        remote: SocketAddr,
        inbound: bool,
        queue: usize,
    ) -> (Self, mpsc::Receiver<NetMessage>) {
        let (tx, rx) = mpsc::channel(queue);
        (Self::new(ConnectionId(id), remote, inbound, tx), rx)
    }
}

/// Owns the listener and all connection tasks.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnMgrInner>,
}

struct ConnMgrInner {
    magic: u32,
    max_frame_bytes: usize,
    outbound_queue: usize,
    next_id: AtomicU64,
    outbound_count: AtomicUsize,
    event_tx: mpsc::Sender<ConnectionEvent>,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        magic: u32,
        max_frame_bytes: usize,
        outbound_queue: usize,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let manager = Self {
            inner: Arc::new(ConnMgrInner {
                magic,
                max_frame_bytes,
                outbound_queue,
                next_id: AtomicU64::new(1),
                outbound_count: AtomicUsize::new(0),
                event_tx,
                connections: RwLock::new(HashMap::new()),
                listener_task: Mutex::new(None),
            }),
        };
        (manager, event_rx)
    }

    /// Bind and start accepting.  Returns the bound address; failure here
    /// is fatal at startup.
    pub async fn listen(&self, bind: SocketAddr) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening for peers");
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        ConnMgrInner::install(&inner, stream, remote, true).await;
                    }
                    Err(err) => {
                        warn!(error = ?err, "listener accept failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        *self.inner.listener_task.lock() = Some(task);
        Ok(local)
    }

    /// Dial an address.  Counts toward the outbound total on success.
    pub async fn connect(&self, addr: SocketAddr) -> Result<ConnectionId, NetworkError> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                NetworkError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "dial timed out",
                ))
            })??;
        self.inner.outbound_count.fetch_add(1, Ordering::AcqRel);
        let id = ConnMgrInner::install(&self.inner, stream, addr, false).await;
        Ok(id)
    }

    pub fn outbound_count(&self) -> usize {
        self.inner.outbound_count.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(handle) = self.inner.connections.read().get(&id) {
            handle.close();
        }
    }

    /// Unblock the event-queue receiver.
    pub async fn quit_queue(&self) {
        let _ = self.inner.event_tx.send(ConnectionEvent::Shutdown).await;
    }

    /// Tear down the listener and every connection.
    pub fn stop(&self) {
        if let Some(task) = self.inner.listener_task.lock().take() {
            task.abort();
        }
        let handles: Vec<ConnectionHandle> =
            self.inner.connections.read().values().cloned().collect();
        for handle in handles {
            handle.close();
        }
    }
}

impl ConnMgrInner {
    async fn install(
        inner: &Arc<ConnMgrInner>,
        stream: TcpStream,
        remote: SocketAddr,
        inbound: bool,
    ) -> ConnectionId {
        let _ = stream.set_nodelay(true);
        let id = ConnectionId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(inner.outbound_queue);
        let handle = ConnectionHandle::new(id, remote, inbound, tx);
        inner.connections.write().insert(id, handle.clone());
        let _ = inner
            .event_tx
            .send(ConnectionEvent::Opened(handle.clone()))
            .await;
        tokio::spawn(Self::write_loop(inner.clone(), handle.clone(), write_half, rx));
        tokio::spawn(Self::read_loop(inner.clone(), handle, read_half));
        id
    }

    async fn read_loop(
        inner: Arc<ConnMgrInner>,
        handle: ConnectionHandle,
        mut reader: OwnedReadHalf,
    ) {
        let id = handle.id();
        let mut closed = handle.closed_rx();
        loop {
            if *closed.borrow() {
                break;
            }
            tokio::select! {
                _ = closed.changed() => {}
                result = read_message(&mut reader, inner.magic, inner.max_frame_bytes) => {
                    match result {
                        Ok(message) => {
                            if inner
                                .event_tx
                                .send(ConnectionEvent::Message(id, message))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(conn = %id, error = %err, "connection read ended");
                            break;
                        }
                    }
                }
            }
        }
        handle.close();
        if inner.connections.write().remove(&id).is_some() {
            if !handle.is_inbound() {
                inner.outbound_count.fetch_sub(1, Ordering::AcqRel);
            }
            let _ = inner.event_tx.send(ConnectionEvent::Closed(id)).await;
        }
    }

    async fn write_loop(
        inner: Arc<ConnMgrInner>,
        handle: ConnectionHandle,
        mut writer: OwnedWriteHalf,
        mut rx: mpsc::Receiver<NetMessage>,
    ) {
        let id = handle.id();
        let mut closed = handle.closed_rx();
        loop {
            if *closed.borrow() {
                break;
            }
            tokio::select! {
                _ = closed.changed() => {}
                message = rx.recv() => {
                    match message {
                        Some(message) => {
                            if let Err(err) =
                                write_message(&mut writer, inner.magic, inner.max_frame_bytes, &message)
                                    .await
                            {
                                warn!(conn = %id, error = %err, "failed to send message");
                                handle.close();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        // Dropping the write half sends FIN; the read loop finishes the
        // cleanup when the stream ends.
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn loopback_handle_delivers_and_reports_full_queue() {
        let (handle, mut rx) = ConnectionHandle::loopback_for_tests(1, test_addr(), true, 2);
        handle.send_message(NetMessage::Ping(1)).unwrap();
        handle.send_message(NetMessage::Ping(2)).unwrap();
        assert!(matches!(
            handle.send_message(NetMessage::Ping(3)),
            Err(NetworkError::QueueFull(_))
        ));
        assert_eq!(rx.recv().await, Some(NetMessage::Ping(1)));
    }

    #[tokio::test]
    async fn closed_handle_rejects_sends() {
        let (handle, _rx) = ConnectionHandle::loopback_for_tests(2, test_addr(), false, 4);
        assert!(handle.is_valid());
        handle.close();
        assert!(!handle.is_valid());
        assert!(matches!(
            handle.send_message(NetMessage::Ping(1)),
            Err(NetworkError::ConnectionGone(_))
        ));
    }

    #[tokio::test]
    async fn transport_round_trip_over_tcp() {
        let (server, mut server_events) = ConnectionManager::new(0x5445_5354, 1 << 20, 64);
        let bound = server.listen(test_addr()).await.expect("listen");

        let (client, mut client_events) = ConnectionManager::new(0x5445_5354, 1 << 20, 64);
        client.connect(bound).await.expect("connect");
        assert_eq!(client.outbound_count(), 1);

        let client_handle = match client_events.recv().await {
            Some(ConnectionEvent::Opened(handle)) => handle,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert!(!client_handle.is_inbound());

        let server_handle = match server_events.recv().await {
            Some(ConnectionEvent::Opened(handle)) => handle,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert!(server_handle.is_inbound());

        client_handle.send_message(NetMessage::Ping(77)).unwrap();
        match server_events.recv().await {
            Some(ConnectionEvent::Message(id, NetMessage::Ping(77))) => {
                assert_eq!(id, server_handle.id());
            }
            other => panic!("expected ping, got {other:?}"),
        }

        // Closing one side surfaces Closed events on both.
        client_handle.close();
        loop {
            match server_events.recv().await {
                Some(ConnectionEvent::Closed(id)) => {
                    assert_eq!(id, server_handle.id());
                    break;
                }
                Some(_) => {}
                None => panic!("server event queue closed early"),
            }
        }
        loop {
            match client_events.recv().await {
                Some(ConnectionEvent::Closed(id)) => {
                    assert_eq!(id, client_handle.id());
                    break;
                }
                Some(_) => {}
                None => panic!("client event queue closed early"),
            }
        }
        assert_eq!(client.outbound_count(), 0);
    }
}
