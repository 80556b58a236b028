//! DNS client (C6).
//!
//! Sits between the query planner and the transports: given a question
//! and an upstream [`Address`], it builds a request message, sends it
//! over whichever transport the address's protocol calls for (C4 for
//! UDP, C5 for TCP/TLS/DoH), and returns the parsed response.
//!
//! Identical requests in flight at the same time (same fqdn, qtype and
//! upstream) share a single attempt rather than each dialling out
//! separately; this matters most for UDP fan-out during a cache
//! stampede.  The client does not follow CNAMEs, consult the cache, or
//! retry a failed upstream with another one -- all of that is the
//! planner's job.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::timeout;

use dns_types::protocol::types::*;

use crate::dispatch::{DispatchError, UdpDispatcher};
use crate::pool::{ConnectionPool, PoolError};
use crate::util::address::{Address, Protocol};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// An error that can occur while querying an upstream nameserver.
#[derive(Debug)]
pub enum ClientError {
    /// `address.host` does not parse as an IP address.
    InvalidHost,
    Dispatch(DispatchError),
    Pool(PoolError),
    /// The message could not be serialised (eg an oversized RDATA).
    Serialise(dns_types::protocol::serialise::Error),
    /// The reply could not be parsed as a DNS message.
    Deserialise(dns_types::protocol::deserialise::Error),
    Timeout,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ClientError::InvalidHost => write!(f, "upstream host is not a valid IP address"),
            ClientError::Dispatch(err) => write!(f, "{err}"),
            ClientError::Pool(err) => write!(f, "{err}"),
            ClientError::Serialise(err) => write!(f, "could not serialise query: {err}"),
            ClientError::Deserialise(err) => write!(f, "could not parse response: {err:?}"),
            ClientError::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

type InFlightKey = (DomainName, QueryType, Address);
pub type InFlightResult = Result<Message, Arc<ClientError>>;
type InFlightMap = Mutex<HashMap<InFlightKey, Arc<OnceCell<InFlightResult>>>>;

/// Sends one query to one upstream nameserver over whichever transport
/// the address calls for.
pub struct DnsClient {
    dispatcher_v4: UdpDispatcher,
    dispatcher_v6: UdpDispatcher,
    pool: ConnectionPool,
    inflight: InFlightMap,
}

impl DnsClient {
    pub async fn new() -> Result<Self, std::io::Error> {
        Ok(Self {
            dispatcher_v4: UdpDispatcher::bind((IpAddr::from([0, 0, 0, 0]), 0).into()).await?,
            dispatcher_v6: UdpDispatcher::bind((IpAddr::from([0u16; 8]), 0).into()).await?,
            pool: ConnectionPool::new(),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Query `upstream` for `question`, deduplicating against any
    /// identical in-flight request.
    ///
    /// The error side is `Arc`-wrapped rather than plain `ClientError`:
    /// concurrent callers that arrive while a request is already in
    /// flight share the same `OnceCell`, and `ClientError` itself isn't
    /// `Clone` (it wraps `std::io::Error`, among other things), so
    /// cloning the cell's contents out to each waiter clones the `Arc`
    /// rather than the error.
    pub async fn query(&self, question: &Question, upstream: &Address) -> InFlightResult {
        let key = (question.name.clone(), question.qtype, upstream.clone());

        let cell = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_init(|| async { self.query_uncached(question, upstream).await.map_err(Arc::new) })
            .await
            .clone();

        // Only the request that actually populated the cell removes it;
        // later arrivals that found it already resolved leave it alone.
        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.get(&key) {
            if Arc::ptr_eq(existing, &cell) && Arc::strong_count(&cell) <= 2 {
                inflight.remove(&key);
            }
        }

        result
    }

    async fn query_uncached(&self, question: &Question, upstream: &Address) -> Result<Message, ClientError> {
        let response_bytes = match upstream.protocol {
            Protocol::Udp => self.send_udp(question, upstream).await?,
            Protocol::Tcp | Protocol::Tcps => {
                let mut bytes = self.serialise(question)?;
                self.send_tcp(&mut bytes, upstream).await?
            }
            Protocol::Https => {
                let bytes = self.serialise(question)?;
                self.send_doh(&bytes, upstream).await?
            }
        };

        Message::from_octets(&response_bytes).map_err(ClientError::Deserialise)
    }

    fn serialise(&self, question: &Question) -> Result<Vec<u8>, ClientError> {
        let id = rand::thread_rng().gen();
        Message::from_question(id, question.clone())
            .to_octets()
            .map_err(ClientError::Serialise)
    }

    /// Send over UDP, using a transaction id drawn from the target
    /// dispatcher's own pool so it can never collide with another
    /// in-flight request sharing the same socket.
    async fn send_udp(&self, question: &Question, upstream: &Address) -> Result<Vec<u8>, ClientError> {
        let ip: IpAddr = upstream.host.parse().map_err(|_| ClientError::InvalidHost)?;
        let address = SocketAddr::new(ip, upstream.port);
        let dispatcher = match ip {
            IpAddr::V4(_) => &self.dispatcher_v4,
            IpAddr::V6(_) => &self.dispatcher_v6,
        };

        let id = dispatcher.allocate_id().await.map_err(ClientError::Dispatch)?;
        let mut bytes = Message::from_question(id, question.clone())
            .to_octets()
            .map_err(ClientError::Serialise)?;

        dispatcher
            .send(id, &mut bytes, address, DEFAULT_TIMEOUT)
            .await
            .map(|b| b.to_vec())
            .map_err(ClientError::Dispatch)
    }

    async fn send_tcp(&self, bytes: &mut [u8], upstream: &Address) -> Result<Vec<u8>, ClientError> {
        let mut conn = self.pool.checkout(upstream).await.map_err(ClientError::Pool)?;

        match timeout(DEFAULT_TIMEOUT, conn.query_tcp_framed(bytes)).await {
            Ok(Ok(response)) => {
                self.pool.checkin(upstream, conn).await;
                Ok(response.to_vec())
            }
            Ok(Err(err)) => {
                self.pool.discard(upstream).await;
                Err(ClientError::Pool(err))
            }
            Err(_) => {
                self.pool.discard(upstream).await;
                Err(ClientError::Timeout)
            }
        }
    }

    async fn send_doh(&self, bytes: &[u8], upstream: &Address) -> Result<Vec<u8>, ClientError> {
        let mut conn = self.pool.checkout(upstream).await.map_err(ClientError::Pool)?;

        // POST by default; GET is used when the caller needs a
        // cache-friendly (idempotent, URL-embedded) request, which this
        // client does not currently need to distinguish.
        match timeout(DEFAULT_TIMEOUT, conn.query_doh(upstream, bytes, false)).await {
            Ok(Ok(response)) => {
                self.pool.checkin(upstream, conn).await;
                Ok(response)
            }
            Ok(Err(err)) => {
                self.pool.discard(upstream).await;
                Err(ClientError::Pool(err))
            }
            Err(_) => {
                self.pool.discard(upstream).await;
                Err(ClientError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn queries_udp_upstream_and_parses_response() {
        let client = DnsClient::new().await.unwrap();

        let responder = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        let question = Question {
            name: domain("www.example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        let expected_answer = a_record("www.example.com.", Ipv4Addr::new(1, 2, 3, 4));
        let q_for_task = question.clone();
        let expected_for_task = expected_answer.clone();

        let responder_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            let request = Message::from_octets(&buf[..len]).unwrap();
            assert_eq!(request.questions[0], q_for_task);
            let mut response = request.make_response();
            response.answers = vec![expected_for_task];
            let bytes = response.to_octets().unwrap();
            responder.send_to(&bytes, from).await.unwrap();
        });

        let upstream = Address::udp(responder_addr.ip().to_string(), responder_addr.port());
        let response = client.query(&question, &upstream).await.unwrap();
        assert_eq!(response.answers, vec![expected_answer]);
        responder_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_ip_host_for_udp() {
        let client = DnsClient::new().await.unwrap();
        let question = Question {
            name: domain("www.example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        let upstream = Address::udp("not-an-ip", 53);
        let result = client.query(&question, &upstream).await;
        assert!(matches!(result, Err(err) if matches!(*err, ClientError::InvalidHost)));
    }
}
