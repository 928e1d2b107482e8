//! Upstream forwarding.
//!
//! Provides abstraction over forwarding to enable:
//! - Testing with mock forwarders
//! - Pooled UDP sockets shared by concurrent queries

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dns::codec::{self, Query};
use crate::error::ForwardError;

/// Largest UDP payload; a smaller receive buffer silently cuts answers short.
pub const MAX_UPSTREAM_RESPONSE: usize = 65_535;

/// Random ids tried before a forward is rejected as busy.
const ID_ATTEMPTS: usize = 64;

/// Trait for relaying a query to an upstream resolver.
///
/// Implementations return the raw upstream answer; its transaction id is the
/// forwarder's own and must be rewritten before reaching the client.
pub trait Forwarder: Send + Sync + Clone + 'static {
    fn forward(
        &self,
        query: &Query,
        upstream: SocketAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, ForwardError>> + Send;
}

struct Pending {
    upstream: SocketAddr,
    token: u64,
    reply: oneshot::Sender<Vec<u8>>,
}

type InFlight = Arc<Mutex<HashMap<u16, Pending>>>;

struct UpstreamSocket {
    socket: Arc<UdpSocket>,
    in_flight: InFlight,
    reader: JoinHandle<()>,
}

impl Drop for UpstreamSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

struct Inner {
    sockets: Vec<UpstreamSocket>,
    next_socket: AtomicUsize,
    next_token: AtomicU64,
}

/// UDP forwarder over a small pool of sockets.
///
/// Every socket has a reader task that hands replies to the waiting forward
/// call matching the reply's transaction id and source address.
#[derive(Clone)]
pub struct UdpForwarder {
    inner: Arc<Inner>,
}

impl UdpForwarder {
    /// Bind `pool_size` sockets on the unspecified address of the given family.
    pub async fn bind(pool_size: usize, ipv6: bool) -> io::Result<Self> {
        let local = if ipv6 {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };

        let mut sockets = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let socket = Arc::new(UdpSocket::bind(local).await?);
            let in_flight: InFlight = Arc::default();
            let reader = tokio::spawn(read_replies(Arc::clone(&socket), Arc::clone(&in_flight)));
            sockets.push(UpstreamSocket {
                socket,
                in_flight,
                reader,
            });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                sockets,
                next_socket: AtomicUsize::new(0),
                next_token: AtomicU64::new(0),
            }),
        })
    }

    /// Number of forwards currently waiting for an answer.
    pub fn in_flight(&self) -> usize {
        self.inner
            .sockets
            .iter()
            .map(|s| s.in_flight.lock().len())
            .sum()
    }

    fn pick(&self) -> &UpstreamSocket {
        let idx = self.inner.next_socket.fetch_add(1, Ordering::Relaxed) % self.inner.sockets.len();
        &self.inner.sockets[idx]
    }
}

/// Removes an in-flight entry when the forward finishes or is dropped,
/// unless the id has since been reused by another forward.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    id: u16,
    token: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.in_flight.lock();
        if pending.get(&self.id).is_some_and(|p| p.token == self.token) {
            pending.remove(&self.id);
        }
    }
}

fn register(
    in_flight: &InFlight,
    upstream: SocketAddr,
    token: u64,
) -> Result<(u16, oneshot::Receiver<Vec<u8>>), ForwardError> {
    let mut pending = in_flight.lock();
    for _ in 0..ID_ATTEMPTS {
        let id = rand::random::<u16>();
        if pending.contains_key(&id) {
            continue;
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            id,
            Pending {
                upstream,
                token,
                reply: tx,
            },
        );
        return Ok((id, rx));
    }
    warn!(in_flight = pending.len(), "no free upstream transaction id");
    Err(ForwardError::Busy)
}

impl Forwarder for UdpForwarder {
    async fn forward(
        &self,
        query: &Query,
        upstream: SocketAddr,
        timeout: Duration,
    ) -> Result<Vec<u8>, ForwardError> {
        let slot = self.pick();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (id, reply) = register(&slot.in_flight, upstream, token)?;
        let _guard = InFlightGuard {
            in_flight: &slot.in_flight,
            id,
            token,
        };

        let packet = codec::with_id(query.raw(), id);
        slot.socket.send_to(&packet, upstream).await?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(ForwardError::Closed),
            Err(_) => Err(ForwardError::Timeout(timeout)),
        }
    }
}

async fn read_replies(socket: Arc<UdpSocket>, in_flight: InFlight) {
    let mut buf = vec![0u8; MAX_UPSTREAM_RESPONSE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!("upstream socket receive failed: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let reply = &buf[..len];
        let Some(id) = codec::read_id(reply).filter(|_| codec::is_response(reply)) else {
            debug!(%from, len, "discarding non-response upstream datagram");
            continue;
        };

        let mut pending = in_flight.lock();
        if pending.get(&id).is_some_and(|p| p.upstream == from) {
            if let Some(waiter) = pending.remove(&id) {
                // The receiver is gone if the forward already timed out.
                let _ = waiter.reply.send(reply.to_vec());
            }
        } else {
            debug!(%from, id, "discarding unsolicited upstream reply");
        }
    }
}
