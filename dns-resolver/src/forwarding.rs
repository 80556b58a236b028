use async_recursion::async_recursion;
use std::time::Duration;
use tokio::time::timeout;
use tracing::Instrument;

use dns_types::protocol::types::*;

use crate::client::DnsClient;
use crate::context::Context;
use crate::local::{resolve_local, LocalResolutionResult};
use crate::util::address::Address;
use crate::util::nameserver::NameserverSet;
use crate::util::types::*;

/// Where to send a question that cannot be answered locally, in
/// forwarding (proxy) mode.
///
/// A predicate matches either one exact domain or every domain under a
/// suffix (`*.lan` style).  The first matching entry wins; if nothing
/// matches, the fallback set is used, if there is one.
pub enum ProxyPredicate {
    Exact(DomainName),
    Suffix(DomainName),
}

impl ProxyPredicate {
    fn matches(&self, name: &DomainName) -> bool {
        match self {
            ProxyPredicate::Exact(domain) => name == domain,
            ProxyPredicate::Suffix(domain) => name == domain || name.is_subdomain_of(domain),
        }
    }
}

/// An ordered table of proxy rules: which upstream nameservers to use
/// for which domains.
#[derive(Default)]
pub struct ProxyTable {
    entries: Vec<(ProxyPredicate, NameserverSet)>,
    fallback: Option<NameserverSet>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with just a single fallback, used for every domain.
    pub fn with_fallback(addresses: Vec<Address>) -> Self {
        Self {
            entries: Vec::new(),
            fallback: Some(NameserverSet::new(addresses)),
        }
    }

    pub fn add(&mut self, predicate: ProxyPredicate, addresses: Vec<Address>) {
        self.entries.push((predicate, NameserverSet::new(addresses)));
    }

    pub fn set_fallback(&mut self, addresses: Vec<Address>) {
        self.fallback = Some(NameserverSet::new(addresses));
    }

    fn lookup(&self, name: &DomainName) -> Option<&NameserverSet> {
        for (predicate, servers) in &self.entries {
            if predicate.matches(name) {
                return Some(servers);
            }
        }
        self.fallback.as_ref()
    }
}

/// Per-query state for forwarding resolution: a shared DNS client (which
/// owns the UDP dispatchers and connection pool) and the proxy routing
/// table.
pub struct ForwardingContextInner<'a> {
    pub client: &'a DnsClient,
    pub proxies: &'a ProxyTable,
}

type ForwardingContext<'a> = Context<'a, ForwardingContextInner<'a>>;

/// Forwarding DNS resolution.
///
/// Attempts to resolve a query locally and, if it cannot, calls out to
/// an upstream nameserver selected by the proxy table and returns its
/// response.  As an upstream nameserver can answer with whatever it
/// wants, very little validation is done of its responses beyond the
/// question-section check the client already performs.
///
/// This has a 60s timeout.
///
/// # Errors
///
/// See `ResolutionError`.
pub async fn resolve_forwarding<'a>(
    context: &mut ForwardingContext<'a>,
    question: &Question,
) -> Result<ResolvedRecord, ResolutionError> {
    if let Ok(res) = timeout(
        Duration::from_secs(60),
        resolve_forwarding_notimeout(context, question),
    )
    .await
    {
        res
    } else {
        tracing::debug!("timed out");
        Err(ResolutionError::Timeout)
    }
}

/// Timeout-less version of `resolve_forwarding`.
#[async_recursion]
async fn resolve_forwarding_notimeout<'a>(
    context: &mut ForwardingContext<'a>,
    question: &Question,
) -> Result<ResolvedRecord, ResolutionError> {
    if context.at_recursion_limit() {
        tracing::debug!("hit recursion limit");
        return Err(ResolutionError::RecursionLimit);
    }
    if context.is_duplicate_question(question) {
        tracing::debug!("hit duplicate question");
        return Err(ResolutionError::DuplicateQuestion {
            question: question.clone(),
        });
    }

    let mut combined_rrs = Vec::new();

    // This is almost the same as the recursive resolver's local phase,
    // but delegations are ignored (forwarding always asks the upstream
    // rather than following NS records itself), and CNAMEs are resolved
    // by calling the forwarding resolver recursively.
    match resolve_local(context, question) {
        Ok(LocalResolutionResult::Done { resolved }) => return Ok(resolved),
        Ok(LocalResolutionResult::Partial { rrs }) => combined_rrs = rrs,
        Ok(LocalResolutionResult::Delegation { .. }) => (),
        Ok(LocalResolutionResult::CNAME {
            mut rrs,
            cname_question,
        }) => {
            context.push_question(question);
            let answer = match resolve_forwarding_notimeout(context, &cname_question)
                .instrument(tracing::error_span!("resolve_forwarding", %cname_question))
                .await
            {
                Ok(resolved) => {
                    let soa_rr = resolved.soa_rr().cloned();
                    let mut r_rrs = resolved.rrs();
                    rrs.append(&mut r_rrs);
                    Ok(ResolvedRecord::NonAuthoritative { rrs, soa_rr })
                }
                Err(_) => Err(ResolutionError::DeadEnd {
                    question: cname_question,
                }),
            };
            context.pop_question();
            return answer;
        }
        Err(_) => (),
    }

    let Some(servers) = context.r.proxies.lookup(&question.name) else {
        tracing::debug!("no proxy configured for domain");
        return Err(ResolutionError::NoNameserver {
            question: question.clone(),
        });
    };

    let mut last_error = None;
    for _attempt in 0..3 {
        let Some(address) = servers.get() else {
            break;
        };

        match context
            .r
            .client
            .query(question, &address)
            .instrument(tracing::error_span!("query_nameserver", %address))
            .await
        {
            Ok(response) if response.questions.first().map(|q| &q.name) == Some(&question.name) => {
                servers.success(&address);
                context.metrics().nameserver_hit();
                tracing::trace!(%address, "nameserver HIT");

                let rrs = response.answers;
                context.cache.insert_all(&rrs);
                context.cache.insert_all(&response.authority);
                context.cache.insert_all(&response.additional);
                prioritising_merge(&mut combined_rrs, rrs);

                return Ok(ResolvedRecord::NonAuthoritative {
                    rrs: combined_rrs,
                    soa_rr: None,
                });
            }
            Ok(_) => {
                servers.fail(&address);
                last_error = Some("response did not match question");
            }
            Err(err) => {
                tracing::debug!(%address, %err, "upstream query failed");
                servers.fail(&address);
                last_error = Some("upstream query failed");
            }
        }
    }

    context.metrics().nameserver_miss();
    tracing::trace!(?last_error, "nameserver MISS");
    Err(ResolutionError::DeadEnd {
        question: question.clone(),
    })
}
