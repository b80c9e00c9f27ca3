use crate::dns::{resolve_name, DnsClient};
use futures::{stream, StreamExt};
use rand::Rng;
use std::collections::HashSet;
use tracing::{info, instrument};

pub const PROBE_LABEL_LEN: usize = 14;
const PROBE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// What random labels under a domain resolve to.
#[derive(Debug, Clone, Default)]
pub struct WildcardProfile {
    pub has_wildcard: bool,
    pub ips: HashSet<String>,
}

impl WildcardProfile {
    /// A name is a wildcard false positive when all of its records belong to the wildcard
    /// universe. A single record outside of it keeps the name.
    pub fn is_wildcard(&self, records: &[String]) -> bool {
        self.has_wildcard
            && !records.is_empty()
            && records.iter().all(|record| self.ips.contains(record))
    }
}

pub fn random_label(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| PROBE_CHARSET[rng.gen_range(0..PROBE_CHARSET.len())] as char)
        .collect()
}

#[instrument(name = "wildcard", level = "info", skip(client))]
pub async fn detect_wildcard(
    client: &dyn DnsClient,
    domain: &str,
    tries: usize,
    max_depth: usize,
) -> WildcardProfile {
    let probes: Vec<HashSet<String>> = stream::iter(0..tries)
        .map(|_| async move {
            let host = format!("{}.{}", random_label(PROBE_LABEL_LEN), domain);
            let result = resolve_name(client, &host, max_depth).await;
            result.into_records().into_iter().collect::<HashSet<String>>()
        })
        .buffer_unordered(tries.max(1))
        .collect()
        .await;

    let profile = WildcardProfile {
        has_wildcard: probes.iter().any(|ips| !ips.is_empty()),
        ips: probes.into_iter().flatten().collect(),
    };

    if profile.has_wildcard {
        info!("Wildcard detected for {}, records: {:?}", domain, profile.ips);
    } else {
        info!("No wildcard detected for {}", domain);
    }
    profile
}
