use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use dns_types::protocol::types::*;

use crate::util::address::Address;
use crate::util::net::{read_tcp_bytes, send_tcp_bytes, send_udp_bytes};

/// Send a message to a remote nameserver, preferring UDP if the request is
/// small enough.  If the request is too large, or if the UDP response is
/// truncated, tries again using TCP.
///
/// If an error occurs while sending the message or receiving the response, or
/// the response does not match the request, `None` is returned.
///
/// This has a 5s timeout for each request, so 10s in total.
pub async fn query_nameserver(
    address: SocketAddr,
    question: &Question,
    recursion_desired: bool,
) -> Option<Message> {
    let mut request = Message::from_question(rand::thread_rng().gen(), question.clone());
    request.header.recursion_desired = recursion_desired;

    match request.clone().to_octets() {
        Ok(mut serialised_request) => {
            tracing::trace!(message = ?request, ?address, "forwarding query to nameserver");

            if let Some(response) = query_nameserver_udp(address, &mut serialised_request).await {
                if response_matches_request(&request, &response) {
                    return Some(response);
                }
            }

            if let Some(response) = query_nameserver_tcp(address, &mut serialised_request).await {
                if response_matches_request(&request, &response) {
                    return Some(response);
                }
            }

            None
        }
        Err(error) => {
            tracing::warn!(message = ?request, ?error, "could not serialise message");
            None
        }
    }
}

/// Send a message to a remote nameserver over UDP, returning the
/// response.  If the message would be truncated, or an error occurs
/// while sending it, `None` is returned.  Otherwise the deserialised
/// response message is: but this response is NOT validated -
/// consumers MUST validate the response before using it!
///
/// This has a 5s timeout.
pub async fn query_nameserver_udp(
    address: SocketAddr,
    serialised_request: &mut [u8],
) -> Option<Message> {
    match timeout(
        Duration::from_secs(5),
        query_nameserver_udp_notimeout(address, serialised_request),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => None,
    }
}

/// Timeout-less version of `query_nameserver_udp`.
async fn query_nameserver_udp_notimeout(
    address: SocketAddr,
    serialised_request: &mut [u8],
) -> Option<Message> {
    if serialised_request.len() > 512 {
        return None;
    }

    let mut buf = vec![0u8; 512];
    let sock = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    sock.connect(address).await.ok()?;
    send_udp_bytes(&sock, serialised_request).await.ok()?;
    sock.recv(&mut buf).await.ok()?;

    Message::from_octets(&buf).ok()
}

/// Send a message to a remote nameserver over TCP, returning the
/// response.  This has the same return value caveats as
/// `query_nameserver_udp`.
///
/// This has a 5s timeout.
pub async fn query_nameserver_tcp(
    address: SocketAddr,
    serialised_request: &mut [u8],
) -> Option<Message> {
    match timeout(
        Duration::from_secs(5),
        query_nameserver_tcp_notimeout(address, serialised_request),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => None,
    }
}

/// Timeout-less version of `query_nameserver_tcp`.
async fn query_nameserver_tcp_notimeout(
    address: SocketAddr,
    serialised_request: &mut [u8],
) -> Option<Message> {
    let mut stream = TcpStream::connect(address).await.ok()?;
    send_tcp_bytes(&mut stream, serialised_request).await.ok()?;
    let bytes = read_tcp_bytes(&mut stream).await.ok()?;

    Message::from_octets(bytes.as_ref()).ok()
}

/// Very basic validation that a nameserver response matches a
/// message:
///
/// - Check the ID, opcode, and questions match the question.
///
/// - Check it is a response.
///
/// - Check the response code is either `NoError` or `NameError`.
///
/// - Check it is not truncated.
pub fn response_matches_request(request: &Message, response: &Message) -> bool {
    if request.header.id != response.header.id {
        return false;
    }
    if !response.header.is_response {
        return false;
    }
    if request.header.opcode != response.header.opcode {
        return false;
    }
    if response.header.is_truncated {
        return false;
    }
    if !(response.header.rcode == Rcode::NoError || response.header.rcode == Rcode::NameError) {
        return false;
    }
    if request.questions != response.questions {
        return false;
    }

    true
}

/// Check if this is an NXDOMAIN or NODATA response and return the SOA if so.
///
/// Also sanity checks that the SOA record could be authoritative for the query
/// domain: the domain has to be a subdomain of the SOA, and the SOA has to have
/// at least the current match count.
pub fn get_nxdomain_nodata_soa(
    question: &Question,
    response: &Message,
    current_match_count: usize,
) -> Option<ResourceRecord> {
    if !response.answers.is_empty() {
        return None;
    }
    if !(response.header.rcode == Rcode::NameError || response.header.rcode == Rcode::NoError) {
        return None;
    }

    let mut soa_rr = None;
    for rr in &response.authority {
        if rr.rtype_with_data.rtype() == RecordType::SOA {
            // multiple SOAs: abort, abort!
            if soa_rr.is_some() {
                return None;
            }

            soa_rr = Some(rr);
        }
    }

    if let Some(rr) = soa_rr {
        if !question.name.is_subdomain_of(&rr.name) {
            return None;
        }

        if rr.name.labels.len().cmp(&current_match_count) == Ordering::Less {
            return None;
        }

        return Some(rr.clone());
    }

    None
}

/// How long an address is taken out of rotation after a failed query.
const DISABLE_DURATION: Duration = Duration::from_secs(1);

/// An ordered set of candidate upstream addresses for a domain, such as
/// the proxy list for a forwarding zone.  Addresses that fail a query
/// are disabled for a short deadline rather than removed outright, so a
/// server that comes back up is retried automatically.
pub struct NameserverSet {
    state: Mutex<NameserverSetState>,
}

struct NameserverSetState {
    addresses: Vec<Address>,
    disabled_until: HashMap<Address, Instant>,
    cursor: usize,
}

impl NameserverSet {
    /// `addresses` must be non-empty.
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            state: Mutex::new(NameserverSetState {
                addresses,
                disabled_until: HashMap::new(),
                cursor: 0,
            }),
        }
    }

    /// Pick the next eligible address, round-robin, skipping any whose
    /// disable deadline has not yet passed.  Returns `None` if every
    /// address is currently disabled.
    pub fn get(&self) -> Option<Address> {
        let mut state = self.state.lock().expect("nameserver set lock poisoned");
        let len = state.addresses.len();
        if len == 0 {
            return None;
        }

        let now = Instant::now();
        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            let candidate = state.addresses[idx].clone();
            let is_disabled = state
                .disabled_until
                .get(&candidate)
                .is_some_and(|deadline| *deadline > now);
            if !is_disabled {
                state.cursor = (idx + 1) % len;
                return Some(candidate);
            }
        }

        None
    }

    /// Mark `address` as having answered successfully, clearing any
    /// outstanding disable deadline.
    pub fn success(&self, address: &Address) {
        let mut state = self.state.lock().expect("nameserver set lock poisoned");
        state.disabled_until.remove(address);
    }

    /// Disable `address` for `DISABLE_DURATION` after a failed query.
    pub fn fail(&self, address: &Address) {
        let mut state = self.state.lock().expect("nameserver set lock poisoned");
        state
            .disabled_until
            .insert(address.clone(), Instant::now() + DISABLE_DURATION);
    }
}


#[cfg(test)]
mod nameserver_set_tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::udp(format!("10.0.0.{n}"), 53)
    }

    #[test]
    fn round_robins_through_addresses() {
        let set = NameserverSet::new(vec![addr(1), addr(2), addr(3)]);
        assert_eq!(set.get(), Some(addr(1)));
        assert_eq!(set.get(), Some(addr(2)));
        assert_eq!(set.get(), Some(addr(3)));
        assert_eq!(set.get(), Some(addr(1)));
    }

    #[test]
    fn fail_disables_an_address_temporarily() {
        let set = NameserverSet::new(vec![addr(1), addr(2)]);
        set.fail(&addr(1));
        assert_eq!(set.get(), Some(addr(2)));
        assert_eq!(set.get(), Some(addr(2)));
    }

    #[test]
    fn success_clears_a_disable() {
        let set = NameserverSet::new(vec![addr(1), addr(2)]);
        set.fail(&addr(1));
        set.success(&addr(1));
        assert_eq!(set.get(), Some(addr(1)));
    }

    #[test]
    fn returns_none_when_every_address_disabled() {
        let set = NameserverSet::new(vec![addr(1), addr(2)]);
        set.fail(&addr(1));
        set.fail(&addr(2));
        assert_eq!(set.get(), None);
    }
}

#[cfg(test)]
pub mod test_util {
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;

    use super::*;

    pub fn matching_nameserver_response() -> (Message, Message) {
        nameserver_response(
            "www.example.com.",
            &[a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
            &[],
            &[],
        )
    }

    pub fn nameserver_response(
        name: &str,
        answers: &[ResourceRecord],
        authority: &[ResourceRecord],
        additional: &[ResourceRecord],
    ) -> (Message, Message) {
        let request = Message::from_question(
            1234,
            Question {
                name: domain(name),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );

        let mut response = request.make_response();
        response.answers = answers.into();
        response.authority = authority.into();
        response.additional = additional.into();

        (request, response)
    }
}
