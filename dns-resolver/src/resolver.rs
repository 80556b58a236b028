//! The public resolver facade (C8).
//!
//! This is the entry point external callers use: build a [`Resolver`]
//! (either [`Resolver::recursive`] or [`Resolver::proxy`]), seed it with
//! hosts/root-hint records if needed, then call [`Resolver::query`].
//!
//! The facade never reads a file path itself -- hosts files, zone
//! files, and root hints are all supplied as pre-parsed records by the
//! caller (see `dnsq`'s loader for an example), keeping file I/O and
//! path handling out of the library.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, RwLock};

use dns_types::protocol::types::*;
use dns_types::zones::types::{Zone, Zones};

use crate::cache::SharedCache;
use crate::client::DnsClient;
use crate::forwarding::{ProxyPredicate, ProxyTable};
use crate::util::address::Address;
use crate::util::types::{ProtocolMode, ResolutionError, ResolvedRecord};
use crate::{resolve, UpstreamMode};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One rule in a proxy configuration: either a bare list of upstreams
/// (applies to every name) or a predicate plus the upstreams to use
/// when it matches.
pub enum ProxyRule {
    Fallback(Vec<Address>),
    Exact(DomainName, Vec<Address>),
    Suffix(DomainName, Vec<Address>),
}

enum Mode {
    Recursive {
        protocol_mode: ProtocolMode,
        upstream_dns_port: u16,
    },
    Proxy {
        client: Arc<DnsClient>,
        proxies: RwLock<ProxyTable>,
    },
    LocalOnly,
}

type MemoKey = (DomainName, QueryType);
type MemoValue = Arc<OnceCell<Result<ResolvedRecord, ResolutionError>>>;

/// A DNS resolver: owns a cache, a zone set, and (depending on mode) a
/// client for talking to upstream nameservers.
pub struct Resolver {
    cache: SharedCache,
    zones: RwLock<Zones>,
    mode: Mode,
    inflight: Mutex<HashMap<MemoKey, MemoValue>>,
}

impl Resolver {
    /// A resolver that walks the DNS hierarchy itself, starting from
    /// `root_hints` (NS + glue A/AAAA records for the root zone).
    pub fn recursive(protocol_mode: ProtocolMode, upstream_dns_port: u16, root_hints: &[ResourceRecord]) -> Self {
        let cache = SharedCache::new();
        cache.insert_all(root_hints);

        Self {
            cache,
            zones: RwLock::new(Zones::new()),
            mode: Mode::Recursive {
                protocol_mode,
                upstream_dns_port,
            },
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// A resolver that forwards anything it cannot answer locally to an
    /// upstream nameserver chosen from a proxy table.
    pub async fn proxy() -> Result<Self, std::io::Error> {
        let client = Arc::new(DnsClient::new().await?);

        Ok(Self {
            cache: SharedCache::new(),
            zones: RwLock::new(Zones::new()),
            mode: Mode::Proxy {
                client,
                proxies: RwLock::new(ProxyTable::new()),
            },
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// A resolver which never leaves local zones/cache: anything it
    /// cannot answer from what it has already been given fails with
    /// [`ResolutionError::NoNameserver`] rather than being looked up
    /// anywhere else.
    pub fn local_only() -> Self {
        Self {
            cache: SharedCache::new(),
            zones: RwLock::new(Zones::new()),
            mode: Mode::LocalOnly,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the resolver with records from a hosts file or similar
    /// source (typically `ttl = u32::MAX`, ie "pinned").
    pub fn seed(&self, records: &[ResourceRecord]) {
        self.cache.insert_all(records);
    }

    /// Mark suffixes (eg `"lan"`) under which this resolver considers
    /// itself authoritative: queries under these domains get AA=1 and,
    /// if nothing is found, NXDOMAIN rather than a remote lookup.
    ///
    /// This works by inserting an empty authoritative zone for each
    /// domain; records already present in the cache or added with
    /// [`Resolver::insert_zone`] still apply as normal.
    pub async fn set_zone_domains(&self, domains: Vec<DomainName>) {
        let mut zones = self.zones.write().await;
        for apex in domains {
            let soa = dns_types::zones::types::SOA {
                mname: apex.clone(),
                rname: apex.clone(),
                serial: 0,
                refresh: 0,
                retry: 0,
                expire: 0,
                minimum: 0,
            };
            zones.insert_merge(Zone::new(apex, Some(soa)));
        }
    }

    /// Insert or replace a locally-authoritative zone (used alongside
    /// or instead of `set_zone_domains` for static answers).
    pub async fn insert_zone(&self, zone: Zone) {
        self.zones.write().await.insert(zone);
    }

    /// Merge a whole collection of zones in one go, eg everything
    /// loaded from a directory of zone files.
    pub async fn insert_zones(&self, zones: Zones) {
        self.zones.write().await.merge(zones);
    }

    /// Replace the proxy routing table.  Only meaningful for a resolver
    /// built with [`Resolver::proxy`]; a panic indicates a programming
    /// error (calling this on a recursive resolver).
    pub async fn set_proxies(&self, rules: Vec<ProxyRule>) {
        let Mode::Proxy { proxies, .. } = &self.mode else {
            panic!("set_proxies called on a non-proxy resolver");
        };

        let mut table = ProxyTable::new();
        for rule in rules {
            match rule {
                ProxyRule::Fallback(addresses) => table.set_fallback(addresses),
                ProxyRule::Exact(name, addresses) => table.add(ProxyPredicate::Exact(name), addresses),
                ProxyRule::Suffix(name, addresses) => table.add(ProxyPredicate::Suffix(name), addresses),
            }
        }
        *proxies.write().await = table;
    }

    /// Resolve `fqdn` for `qtype`, returning the answer as a `Message`
    /// and whether it was answered entirely without contacting an
    /// upstream nameserver.
    ///
    /// `fqdn` is normalized (trailing dot stripped, lower-cased) before
    /// use.  If `qtype` is `ANY` and `fqdn` parses as an IP address, the
    /// query is rewritten to the equivalent `in-addr.arpa`/`ip6.arpa`
    /// PTR lookup.
    ///
    /// # Errors
    ///
    /// See `ResolutionError`.
    pub async fn query(
        &self,
        fqdn: &str,
        qtype: QueryType,
        request_timeout: Option<Duration>,
    ) -> Result<(Message, bool), ResolutionError> {
        let question = self.normalize_question(fqdn, qtype)?;
        let request_timeout = request_timeout.unwrap_or(DEFAULT_TIMEOUT);

        let result = match tokio::time::timeout(request_timeout, self.query_memoized(&question)).await {
            Ok(result) => result,
            Err(_) => return Err(ResolutionError::Timeout),
        };

        let from_cache = matches!(
            &result,
            Ok(ResolvedRecord::Authoritative { .. } | ResolvedRecord::AuthoritativeNameError { .. })
        );

        let response = build_response(&question, result)?;
        Ok((response, from_cache))
    }

    fn normalize_question(&self, fqdn: &str, qtype: QueryType) -> Result<Question, ResolutionError> {
        let normalized = fqdn.trim_end_matches('.').to_ascii_lowercase();

        let (name, qtype) = if qtype == QueryType::Wildcard {
            if let Ok(ip) = normalized.parse::<IpAddr>() {
                (ptr_name(ip), QueryType::Record(RecordType::PTR))
            } else {
                (parse_domain(&normalized)?, qtype)
            }
        } else {
            (parse_domain(&normalized)?, qtype)
        };

        Ok(Question {
            name,
            qtype,
            qclass: QueryClass::Record(RecordClass::IN),
        })
    }

    async fn query_memoized(&self, question: &Question) -> Result<ResolvedRecord, ResolutionError> {
        let key = (question.name.clone(), question.qtype);

        let cell = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let result = cell
            .get_or_init(|| async { self.resolve_one(question).await })
            .await
            .clone();

        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.get(&key) {
            if Arc::ptr_eq(existing, &cell) && Arc::strong_count(&cell) <= 2 {
                inflight.remove(&key);
            }
        }

        result
    }

    async fn resolve_one(&self, question: &Question) -> Result<ResolvedRecord, ResolutionError> {
        let zones = self.zones.read().await;

        match &self.mode {
            Mode::Recursive {
                protocol_mode,
                upstream_dns_port,
            } => {
                let (_metrics, result) = resolve(
                    UpstreamMode::Recursive {
                        protocol_mode: *protocol_mode,
                        upstream_dns_port: *upstream_dns_port,
                    },
                    &zones,
                    &self.cache,
                    question,
                )
                .await;
                result
            }
            Mode::Proxy { client, proxies } => {
                let proxies = proxies.read().await;
                let (_metrics, result) = resolve(
                    UpstreamMode::Forwarding {
                        client,
                        proxies: &proxies,
                    },
                    &zones,
                    &self.cache,
                    question,
                )
                .await;
                result
            }
            Mode::LocalOnly => {
                let (_metrics, result) =
                    resolve(UpstreamMode::LocalOnly, &zones, &self.cache, question).await;
                result
            }
        }
    }
}

/// Build the final response `Message` for `question` from a resolution
/// result, setting `rcode`/`AA` appropriately.
fn build_response(
    question: &Question,
    result: Result<ResolvedRecord, ResolutionError>,
) -> Result<Message, ResolutionError> {
    let mut response = Message::from_question(rand_id(), question.clone()).make_response();

    match result? {
        ResolvedRecord::Authoritative { rrs, soa_rr } => {
            response.header.is_authoritative = true;
            response.answers = rrs;
            response.authority = vec![soa_rr];
        }
        ResolvedRecord::AuthoritativeNameError { soa_rr } => {
            response.header.is_authoritative = true;
            response.header.rcode = Rcode::NameError;
            response.authority = vec![soa_rr];
        }
        ResolvedRecord::NonAuthoritative { rrs, soa_rr } => {
            response.answers = rrs;
            if let Some(soa_rr) = soa_rr {
                response.authority = vec![soa_rr];
            }
        }
    }

    Ok(response)
}

fn rand_id() -> u16 {
    rand::random()
}

fn parse_domain(s: &str) -> Result<DomainName, ResolutionError> {
    let dotted = if s.is_empty() { ".".to_string() } else { format!("{s}.") };
    DomainName::from_dotted_string(&dotted).ok_or_else(|| ResolutionError::InvalidDomainName {
        input: s.to_string(),
    })
}

/// Build the `in-addr.arpa.`/`ip6.arpa.` name for reverse DNS lookups
/// of `ip`.
fn ptr_name(ip: IpAddr) -> DomainName {
    let dotted = match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!(
                "{}.{}.{}.{}.in-addr.arpa.",
                octets[3], octets[2], octets[1], octets[0]
            )
        }
        IpAddr::V6(v6) => {
            let segments = v6.octets();
            let nibbles: Vec<String> = segments
                .iter()
                .rev()
                .flat_map(|byte| vec![format!("{:x}", byte & 0xf), format!("{:x}", byte >> 4)])
                .collect();
            format!("{}.ip6.arpa.", nibbles.join("."))
        }
    };

    DomainName::from_dotted_string(&dotted).expect("constructed PTR name is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_name_for_ipv4() {
        let name = ptr_name("93.184.216.34".parse().unwrap());
        assert_eq!(name.to_dotted_string(), "34.216.184.93.in-addr.arpa.");
    }

    #[test]
    fn ptr_name_for_ipv6() {
        let name = ptr_name("::1".parse().unwrap());
        assert!(name.to_dotted_string().ends_with("ip6.arpa."));
        assert!(name.to_dotted_string().starts_with("1.0.0.0."));
    }

    #[tokio::test]
    async fn query_normalizes_trailing_dot_and_case() {
        let resolver = Resolver::recursive(ProtocolMode::PreferV4, 53, &[]);
        let a = resolver
            .normalize_question("Example.COM.", QueryType::Record(RecordType::A))
            .unwrap();
        let b = resolver
            .normalize_question("example.com", QueryType::Record(RecordType::A))
            .unwrap();
        assert_eq!(a.name, b.name);
    }

    #[tokio::test]
    async fn query_rewrites_ip_literal_to_ptr() {
        let resolver = Resolver::recursive(ProtocolMode::PreferV4, 53, &[]);
        let question = resolver
            .normalize_question("1.1.1.1", QueryType::Wildcard)
            .unwrap();
        assert_eq!(question.qtype, QueryType::Record(RecordType::PTR));
        assert_eq!(question.name.to_dotted_string(), "1.1.1.1.in-addr.arpa.");
    }
}
