use crate::bruteforce::{bruteforce_stream, open_wordlist, BruteforceOptions};
use crate::dns::{self, DnsSettings, ResolutionResult, SharedDnsClient};
use crate::hostname::dedupe;
use crate::model::ResolvedHost;
use crate::modules::subdomains::{self, crtsh::DEFAULT_CALLS_PER_MINUTE};
use crate::wildcard::{detect_wildcard, WildcardProfile};
use crate::Result;
use futures::StreamExt;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

// region:        --- Constants

// timeouts
pub const HTTP_REQUEST_TIMEOUT_MS: u64 = 15000;
pub const RESOLVE_DNS_TIMEOUT_MS: u64 = 5000;

// concurrency numbers
pub const RESOLVE_DNS_CONCURRENCY: usize = 30;
pub const BRUTEFORCE_MAX_PENDING: usize = 1000;

pub const WILDCARD_TRIES: usize = 2;
pub const DEFAULT_NAMESERVERS: &[&str] = &["8.8.8.8", "1.1.1.1"];

// endregion:     --- Constants

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub domain: String,
    pub wordlist: PathBuf,
    pub concurrency: usize,
    pub max_pending: usize,
    pub dns_timeout: Duration,
    pub http_timeout: Duration,
    pub nameservers: Vec<IpAddr>,
    pub passive: bool,
    pub calls_per_minute: u32,
    pub progress_every: usize,
}

impl ScanOptions {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            wordlist: PathBuf::from("wordlists/subdomains.txt"),
            concurrency: RESOLVE_DNS_CONCURRENCY,
            max_pending: BRUTEFORCE_MAX_PENDING,
            dns_timeout: Duration::from_millis(RESOLVE_DNS_TIMEOUT_MS),
            http_timeout: Duration::from_millis(HTTP_REQUEST_TIMEOUT_MS),
            nameservers: Vec::new(),
            passive: true,
            calls_per_minute: DEFAULT_CALLS_PER_MINUTE,
            progress_every: 0,
        }
    }

    fn dns_settings(&self) -> DnsSettings {
        DnsSettings {
            nameservers: self.nameservers.clone(),
            timeout: self.dns_timeout,
        }
    }
}

// region:        --- Scan main function

#[instrument(name = "scan", level = "info", skip_all)]
pub async fn scan(options: &ScanOptions) -> Result<Vec<ResolvedHost>> {
    trace!("Start scan on {}", options.domain);

    // create http client
    let http_client = Client::builder().timeout(options.http_timeout).build()?;
    debug!("HTTP Client created: {:?}", http_client);

    // resolver misconfiguration is the only fatal DNS error
    let dns_client = dns::new_client(&options.dns_settings(), None)?;

    run(&http_client, dns_client, options).await
}

// endregion:     --- Scan main function

// region:        --- Scan subfunctions

pub async fn run(
    http_client: &Client,
    dns_client: SharedDnsClient,
    options: &ScanOptions,
) -> Result<Vec<ResolvedHost>> {
    let passive = scan_passive(http_client, options).await;
    let names = scan_bruteforce(&dns_client, options, passive).await?;

    let wildcard = detect_wildcard(
        dns_client.as_ref(),
        &options.domain,
        WILDCARD_TRIES,
        dns::DEFAULT_MAX_CNAME_DEPTH,
    )
    .await;

    let resolved = dns::resolve_many(
        &dns_client,
        names,
        options.concurrency,
        dns::DEFAULT_MAX_CNAME_DEPTH,
    )
    .await;

    Ok(filter_results(resolved, &wildcard))
}

#[instrument(name = "passive", level = "info", skip_all)]
async fn scan_passive(http_client: &Client, options: &ScanOptions) -> Vec<String> {
    if !options.passive {
        info!("Passive collectors disabled");
        return Vec::new();
    }

    let modules = subdomains::subdomains_modules(options.calls_per_minute);
    subdomains::collect_passive(http_client, &modules, &options.domain).await
}

/// Merges the passive names with the bruteforce discoveries, sorted and deduplicated.
#[instrument(name = "bruteforce", level = "info", skip_all)]
async fn scan_bruteforce(
    dns_client: &SharedDnsClient,
    options: &ScanOptions,
    passive: Vec<String>,
) -> Result<Vec<String>> {
    let mut collected: HashSet<String> = dedupe(passive).collect();

    let Some(wordlist) = open_wordlist(&options.wordlist).await else {
        return Ok(sorted(collected));
    };

    let bruteforce_options = BruteforceOptions {
        concurrency: options.concurrency,
        max_pending: options.max_pending,
        max_depth: dns::DEFAULT_MAX_CNAME_DEPTH,
        progress_every: options.progress_every,
    };
    let skip_set = Arc::new(collected.clone());

    let mut found = bruteforce_stream(
        Arc::clone(dns_client),
        &options.domain,
        wordlist,
        bruteforce_options,
        skip_set,
    );

    let mut discovered = 0;
    while let Some(name) = found.next().await {
        if collected.insert(name.clone()) {
            debug!("Bruteforce discovered: {}", name);
            discovered += 1;
        }
    }
    info!("{} names discovered by bruteforce", discovered);

    Ok(sorted(collected))
}

fn sorted(names: HashSet<String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort();
    info!("{} unique candidates", names.len());
    names
}

fn filter_results(
    resolved: HashMap<String, ResolutionResult>,
    wildcard: &WildcardProfile,
) -> Vec<ResolvedHost> {
    let mut hosts: Vec<ResolvedHost> = resolved
        .into_iter()
        .filter(|(_, result)| !result.is_empty())
        .filter(|(name, result)| {
            let is_wildcard = wildcard.is_wildcard(result.records());
            if is_wildcard {
                debug!("Skipping likely wildcard result: {} -> {:?}", name, result.records());
            }
            !is_wildcard
        })
        .map(|(name, result)| ResolvedHost {
            name,
            ips: result.into_records(),
        })
        .collect();

    hosts.sort_by(|a, b| a.name.cmp(&b.name));
    info!("{} subdomains resolved", hosts.len());
    hosts
}

// endregion:     --- Scan subfunctions
