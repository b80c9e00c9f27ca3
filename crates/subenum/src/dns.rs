use crate::hostname::normalize;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, trace, warn};

pub const DEFAULT_MAX_CNAME_DEPTH: usize = 3;
const DNS_PORT: u16 = 53;

// region:        --- Models

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
    Cname,
}

impl RecordKind {
    fn record_type(self) -> RecordType {
        match self {
            RecordKind::A => RecordType::A,
            RecordKind::Aaaa => RecordType::AAAA,
            RecordKind::Cname => RecordType::CNAME,
        }
    }

    fn extract(self, rdata: &RData) -> Option<String> {
        match (self, rdata) {
            (RecordKind::A, RData::A(a)) => Some(a.0.to_string()),
            (RecordKind::Aaaa, RData::AAAA(aaaa)) => Some(aaaa.0.to_string()),
            (RecordKind::Cname, RData::CNAME(cname)) => Some(normalize(&cname.0.to_utf8())),
            _ => None,
        }
    }
}

/// Outcome of a single record-type query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(Vec<String>),
    NotFound,
    ServerError(String),
    Timeout,
}

impl LookupOutcome {
    fn from_error(err: &ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. }
                if *response_code == ResponseCode::ServFail =>
            {
                LookupOutcome::ServerError(response_code.to_string())
            }
            ResolveErrorKind::NoRecordsFound { .. } => LookupOutcome::NotFound,
            ResolveErrorKind::Timeout => LookupOutcome::Timeout,
            _ => LookupOutcome::ServerError(err.to_string()),
        }
    }

    /// Default policy: everything except `Found` means no records.
    pub fn into_records(self) -> Vec<String> {
        match self {
            LookupOutcome::Found(records) => records,
            _ => Vec::new(),
        }
    }

    fn log(&self, name: &str, kind: RecordKind) {
        match self {
            LookupOutcome::Found(records) => trace!("{:?} {} -> {:?}", kind, name, records),
            LookupOutcome::NotFound => trace!("{:?} {} -> no records", kind, name),
            LookupOutcome::ServerError(reason) => {
                debug!("{:?} lookup failed for {}: {}", kind, name, reason)
            }
            LookupOutcome::Timeout => debug!("{:?} lookup timed out for {}", kind, name),
        }
    }
}

/// Addresses and CNAME targets of one hostname, deduplicated in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionResult {
    records: Vec<String>,
    seen: HashSet<String>,
}

impl ResolutionResult {
    pub fn push(&mut self, record: String) {
        if self.seen.insert(record.clone()) {
            self.records.push(record);
        }
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, records: I) {
        for record in records {
            self.push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    pub fn into_records(self) -> Vec<String> {
        self.records
    }
}

// endregion:     --- Models

// region:        --- Resolver configuration

/// Resolution context shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct DnsSettings {
    pub nameservers: Vec<IpAddr>,
    pub timeout: Duration,
}

pub fn parse_nameservers(raw: &[String]) -> Result<Vec<IpAddr>> {
    raw.iter()
        .map(|server| {
            server
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| Error::InvalidNameserver(server.to_string()))
        })
        .collect()
}

/// Explicit list first, then the run-level list. An empty slice means system default.
pub fn select_nameservers<'a>(
    explicit: Option<&'a [IpAddr]>,
    configured: &'a [IpAddr],
) -> &'a [IpAddr] {
    explicit.unwrap_or(configured)
}

#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn query(&self, name: &str, kind: RecordKind) -> LookupOutcome;
}

pub type SharedDnsClient = Arc<dyn DnsClient>;

pub struct HickoryClient {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl HickoryClient {
    pub fn new(nameservers: &[IpAddr], timeout: Duration) -> Result<Self> {
        let resolver = if nameservers.is_empty() {
            debug!("DNS resolver uses the system configuration");
            TokioAsyncResolver::tokio_from_system_conf()?
        } else {
            let group = NameServerConfigGroup::from_ips_clear(nameservers, DNS_PORT, true);
            let config = ResolverConfig::from_parts(None, vec![], group);
            let mut opts = ResolverOpts::default();
            opts.timeout = timeout;
            debug!("DNS resolver options: {:?}", opts);
            TokioAsyncResolver::tokio(config, opts)
        };

        debug!("DNS resolver created with nameservers {:?}", nameservers);
        Ok(Self { resolver, timeout })
    }
}

pub fn new_client(settings: &DnsSettings, explicit: Option<&[IpAddr]>) -> Result<SharedDnsClient> {
    let nameservers = select_nameservers(explicit, &settings.nameservers);
    let client = HickoryClient::new(nameservers, settings.timeout)?;
    Ok(Arc::new(client))
}

#[async_trait]
impl DnsClient for HickoryClient {
    async fn query(&self, name: &str, kind: RecordKind) -> LookupOutcome {
        // fully qualified so no search domain gets appended
        let fqdn = format!("{}.", normalize(name));
        let lookup = self.resolver.lookup(fqdn.as_str(), kind.record_type());

        match tokio::time::timeout(self.timeout, lookup).await {
            Err(_) => LookupOutcome::Timeout,
            Ok(Err(err)) => LookupOutcome::from_error(&err),
            Ok(Ok(lookup)) => {
                let records: Vec<String> =
                    lookup.iter().filter_map(|rdata| kind.extract(rdata)).collect();
                if records.is_empty() {
                    LookupOutcome::NotFound
                } else {
                    LookupOutcome::Found(records)
                }
            }
        }
    }
}

// endregion:     --- Resolver configuration

// region:        --- Resolution

async fn lookup_addresses(client: &dyn DnsClient, name: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    for kind in [RecordKind::A, RecordKind::Aaaa] {
        let outcome = client.query(name, kind).await;
        outcome.log(name, kind);
        addresses.extend(outcome.into_records());
    }
    addresses
}

/// Resolves A/AAAA records of `name`, then follows its CNAME chain for at most `max_depth` hops.
///
/// `name` itself counts as visited, so a chain pointing back to it adds nothing.
pub async fn resolve_name(client: &dyn DnsClient, name: &str, max_depth: usize) -> ResolutionResult {
    let name = normalize(name);
    let mut result = ResolutionResult::default();
    result.extend(lookup_addresses(client, &name).await);

    let mut visited: HashSet<String> = HashSet::from([name.clone()]);
    let mut frontier = vec![name];
    let mut depth = 0;

    while depth < max_depth && !frontier.is_empty() {
        let mut next = Vec::new();
        for current in &frontier {
            let outcome = client.query(current, RecordKind::Cname).await;
            outcome.log(current, RecordKind::Cname);

            for target in outcome.into_records() {
                let target = normalize(&target);
                if target.is_empty() || !visited.insert(target.clone()) {
                    continue;
                }
                result.push(target.clone());
                result.extend(lookup_addresses(client, &target).await);
                next.push(target);
            }
        }
        frontier = next;
        depth += 1;
    }

    result
}

/// Runs one resolution in its own task, a panicking lookup yields an empty result.
pub async fn resolve_isolated(
    client: SharedDnsClient,
    name: String,
    max_depth: usize,
) -> ResolutionResult {
    let task_name = name.clone();
    let task =
        tokio::spawn(async move { resolve_name(client.as_ref(), &task_name, max_depth).await });

    match task.await {
        Ok(result) => result,
        Err(err) => {
            warn!("Resolution task for {} failed: {}", name, err);
            ResolutionResult::default()
        }
    }
}

/// One entry per canonical name. Callers pass distinct names, inputs that normalize
/// to the same name share a single entry.
#[instrument(name = "bulk_resolve", level = "info", skip_all)]
pub async fn resolve_many(
    client: &SharedDnsClient,
    names: Vec<String>,
    concurrency: usize,
    max_depth: usize,
) -> HashMap<String, ResolutionResult> {
    let results: HashMap<String, ResolutionResult> =
        stream::iter(names.into_iter().map(|name| normalize(&name)))
            .map(|name| {
                let client = Arc::clone(client);
                async move {
                    let result = resolve_isolated(client, name.clone(), max_depth).await;
                    (name, result)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let resolved = results.values().filter(|result| !result.is_empty()).count();
    info!("{} of {} names resolved", resolved, results.len());
    results
}

// endregion:     --- Resolution
