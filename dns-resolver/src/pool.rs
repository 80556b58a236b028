//! TCP and DNS-over-HTTPS connection pool (C5).
//!
//! Unlike UDP, TCP (and the TLS/HTTPS transports built on top of it) is
//! connection-oriented, so it pays to reuse a connection for more than
//! one query rather than dialing fresh for every request.  The pool is
//! keyed by [`Address::pool_key`]: distinct (host, port, transport)
//! tuples never share a connection.
//!
//! Idle connections are not actively timed out by a background task;
//! instead, a connection's idle deadline is checked the next time it is
//! checked out, and stale ones are dropped lazily.  This avoids needing
//! a timer task per idle connection while still bounding how long a
//! connection is kept open doing nothing.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{rustls, TlsConnector};

use crate::util::address::{Address, Protocol};

pub const DEFAULT_MAX_SIZE: usize = 6;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// An error that can occur while using the connection pool.
#[derive(Debug)]
pub enum PoolError {
    AtCapacity,
    InvalidServerName,
    Io(io::Error),
    /// The upstream's HTTP response did not look like a valid DoH reply.
    MalformedHttpResponse,
    /// The upstream returned a non-2xx HTTP status.
    HttpStatus(u16),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PoolError::AtCapacity => write!(f, "connection pool is at capacity"),
            PoolError::InvalidServerName => write!(f, "invalid TLS server name"),
            PoolError::Io(err) => write!(f, "i/o error: {err}"),
            PoolError::MalformedHttpResponse => write!(f, "malformed HTTP response from DoH server"),
            PoolError::HttpStatus(code) => write!(f, "DoH server returned HTTP status {code}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// A pooled connection: either a plain TCP stream or one wrapped in TLS
/// (used for both `tcps://` and `https://` upstreams).
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    /// Send one RFC 1035 §4.2.2-framed DNS message and read the framed
    /// reply.
    pub async fn query_tcp_framed(&mut self, bytes: &mut [u8]) -> Result<BytesMut, PoolError> {
        match self {
            Connection::Plain(s) => query_tcp_framed(s, bytes).await,
            Connection::Tls(s) => query_tcp_framed(s.as_mut(), bytes).await,
        }
    }

    /// Send one DNS-over-HTTPS request (RFC 8484) and return the
    /// response body.
    pub async fn query_doh(
        &mut self,
        address: &Address,
        message: &[u8],
        use_get: bool,
    ) -> Result<Vec<u8>, PoolError> {
        match self {
            Connection::Plain(s) => query_doh(s, address, message, use_get).await,
            Connection::Tls(s) => query_doh(s.as_mut(), address, message, use_get).await,
        }
    }
}

async fn query_tcp_framed<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    bytes: &mut [u8],
) -> Result<BytesMut, PoolError> {
    write_tcp_framed(stream, bytes).await.map_err(PoolError::Io)?;
    read_tcp_framed(stream).await.map_err(PoolError::Io)
}

async fn write_tcp_framed<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &mut [u8]) -> io::Result<()> {
    let len = if let Ok(len) = u16::try_from(bytes.len()) {
        bytes[2] &= 0b11111101;
        len
    } else {
        bytes[2] |= 0b00000010;
        u16::MAX
    };

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes[..(len as usize)]).await?;
    stream.flush().await
}

async fn read_tcp_framed<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<BytesMut> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let expected = u16::from_be_bytes(len_buf) as usize;

    let mut bytes = BytesMut::zeroed(expected);
    stream.read_exact(&mut bytes).await?;
    Ok(bytes)
}

async fn query_doh<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    address: &Address,
    message: &[u8],
    use_get: bool,
) -> Result<Vec<u8>, PoolError> {
    let request = if use_get {
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message);
        format!(
            "GET {}?dns={encoded} HTTP/1.1\r\nHost: {}\r\nAccept: application/dns-message\r\nConnection: keep-alive\r\n\r\n",
            address.doh_path(),
            address.host,
        )
    } else {
        format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/dns-message\r\nAccept: application/dns-message\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            address.doh_path(),
            address.host,
            message.len(),
        )
    };

    stream.write_all(request.as_bytes()).await.map_err(PoolError::Io)?;
    if !use_get {
        stream.write_all(message).await.map_err(PoolError::Io)?;
    }
    stream.flush().await.map_err(PoolError::Io)?;

    read_http_response(stream).await
}

async fn read_http_response<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, PoolError> {
    let headers = read_http_headers(stream).await?;
    let mut lines = headers.split("\r\n");

    let status_line = lines.next().ok_or(PoolError::MalformedHttpResponse)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or(PoolError::MalformedHttpResponse)?;
    if !(200..300).contains(&status) {
        return Err(PoolError::HttpStatus(status));
    }

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.trim().eq_ignore_ascii_case("chunked")
            {
                chunked = true;
            }
        }
    }

    if chunked {
        read_chunked_body(stream).await
    } else {
        let len = content_length.ok_or(PoolError::MalformedHttpResponse)?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(PoolError::Io)?;
        Ok(body)
    }
}

/// Read until the blank line terminating the HTTP header block,
/// returning the headers (without the trailing `\r\n\r\n`) as a string.
async fn read_http_headers<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, PoolError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.map_err(PoolError::Io)?;
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            buf.truncate(buf.len() - 4);
            break;
        }
        if buf.len() > 64 * 1024 {
            return Err(PoolError::MalformedHttpResponse);
        }
    }
    String::from_utf8(buf).map_err(|_| PoolError::MalformedHttpResponse)
}

async fn read_chunked_body<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, PoolError> {
    let mut body = Vec::new();
    loop {
        let mut size_line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.map_err(PoolError::Io)?;
            size_line.push(byte[0]);
            if size_line.ends_with(b"\r\n") {
                size_line.truncate(size_line.len() - 2);
                break;
            }
        }
        let size_str = std::str::from_utf8(&size_line).map_err(|_| PoolError::MalformedHttpResponse)?;
        let size = usize::from_str_radix(size_str.trim(), 16).map_err(|_| PoolError::MalformedHttpResponse)?;
        if size == 0 {
            let mut trailer = [0u8; 2];
            let _ = stream.read_exact(&mut trailer).await;
            break;
        }
        let mut chunk = vec![0u8; size];
        stream.read_exact(&mut chunk).await.map_err(PoolError::Io)?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await.map_err(PoolError::Io)?;
    }
    Ok(body)
}

struct PerKeyPool {
    idle: Vec<(Connection, Instant)>,
    size: usize,
}

impl PerKeyPool {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            size: 0,
        }
    }
}

/// A pool of TCP (and TLS-wrapped TCP) connections, keyed by upstream
/// address.
pub struct ConnectionPool {
    pools: Mutex<HashMap<(String, u16, bool, bool), PerKeyPool>>,
    max_size: usize,
    idle_timeout: Duration,
    tls_config: Arc<rustls::ClientConfig>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SIZE, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_limits(max_size: usize, idle_timeout: Duration) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let tls_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            pools: Mutex::new(HashMap::new()),
            max_size,
            idle_timeout,
            tls_config: Arc::new(tls_config),
        }
    }

    /// Hand out a connection to `address`: an idle one if available and
    /// not stale, otherwise a freshly-dialled one if under the per-key
    /// capacity.
    pub async fn checkout(&self, address: &Address) -> Result<Connection, PoolError> {
        let key = address.pool_key();

        {
            let mut pools = self.pools.lock().await;
            let entry = pools.entry(key.clone()).or_insert_with(PerKeyPool::new);
            while let Some((conn, idle_since)) = entry.idle.pop() {
                if idle_since.elapsed() < self.idle_timeout {
                    return Ok(conn);
                }
                entry.size = entry.size.saturating_sub(1);
            }
            if entry.size >= self.max_size {
                return Err(PoolError::AtCapacity);
            }
            entry.size += 1;
        }

        match self.connect(address).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                let mut pools = self.pools.lock().await;
                if let Some(entry) = pools.get_mut(&key) {
                    entry.size = entry.size.saturating_sub(1);
                }
                Err(err)
            }
        }
    }

    /// Return a connection to the idle set for reuse.
    pub async fn checkin(&self, address: &Address, connection: Connection) {
        let key = address.pool_key();
        let mut pools = self.pools.lock().await;
        let entry = pools.entry(key).or_insert_with(PerKeyPool::new);
        entry.idle.push((connection, Instant::now()));
    }

    /// Discard a connection that errored in use, freeing its capacity
    /// slot without returning it to the idle set.
    pub async fn discard(&self, address: &Address) {
        let key = address.pool_key();
        let mut pools = self.pools.lock().await;
        if let Some(entry) = pools.get_mut(&key) {
            entry.size = entry.size.saturating_sub(1);
        }
    }

    /// The number of connections (idle + leased) currently tracked for
    /// `address`. Exposed for tests that check pooling behaviour.
    pub async fn size(&self, address: &Address) -> usize {
        let key = address.pool_key();
        self.pools.lock().await.get(&key).map_or(0, |e| e.size)
    }

    async fn connect(&self, address: &Address) -> Result<Connection, PoolError> {
        let tcp = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(PoolError::Io)?;

        match address.protocol {
            Protocol::Tcp => Ok(Connection::Plain(tcp)),
            Protocol::Tcps | Protocol::Https => {
                let connector = TlsConnector::from(Arc::clone(&self.tls_config));
                let server_name = rustls::ServerName::try_from(address.host.as_str())
                    .map_err(|_| PoolError::InvalidServerName)?;
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(PoolError::Io)?;
                Ok(Connection::Tls(Box::new(tls)))
            }
            Protocol::Udp => unreachable!("connection pool is never used for UDP addresses"),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn checkout_dials_fresh_connection_when_idle_empty() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let pool = ConnectionPool::new();
        let address = Address::new(addr.ip().to_string(), addr.port(), Protocol::Tcp);
        let conn = pool.checkout(&address).await.unwrap();
        assert!(matches!(conn, Connection::Plain(_)));
        assert_eq!(pool.size(&address).await, 1);
    }

    #[tokio::test]
    async fn checkin_then_checkout_reuses_connection() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::new();
        let address = Address::new(addr.ip().to_string(), addr.port(), Protocol::Tcp);
        let conn = pool.checkout(&address).await.unwrap();
        pool.checkin(&address, conn).await;
        assert_eq!(pool.size(&address).await, 1);

        let _conn = pool.checkout(&address).await.unwrap();
        assert_eq!(pool.size(&address).await, 1);
    }

    #[tokio::test]
    async fn checkout_fails_at_capacity() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::with_limits(1, DEFAULT_IDLE_TIMEOUT);
        let address = Address::new(addr.ip().to_string(), addr.port(), Protocol::Tcp);
        let _conn = pool.checkout(&address).await.unwrap();
        let result = pool.checkout(&address).await;
        assert!(matches!(result, Err(PoolError::AtCapacity)));
    }

    #[tokio::test]
    async fn discard_frees_capacity_slot() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::with_limits(1, DEFAULT_IDLE_TIMEOUT);
        let address = Address::new(addr.ip().to_string(), addr.port(), Protocol::Tcp);
        let conn = pool.checkout(&address).await.unwrap();
        pool.discard(&address).await;
        drop(conn);
        assert_eq!(pool.size(&address).await, 0);

        let _conn = pool.checkout(&address).await.unwrap();
        assert_eq!(pool.size(&address).await, 1);
    }
}
