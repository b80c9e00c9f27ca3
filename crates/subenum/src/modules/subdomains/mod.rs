pub mod crtsh;

use self::crtsh::CrtSh;
use super::Module;
use crate::hostname::dedupe;
use crate::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::Client;
use tracing::{debug, error, info, instrument};

#[async_trait]
pub trait SubdomainModule: Module {
    async fn enumerate(&self, http_client: &Client, domain: &str) -> Result<Vec<String>>;
}

pub fn subdomains_modules(calls_per_minute: u32) -> Vec<Box<dyn SubdomainModule>> {
    vec![Box::new(CrtSh::new().with_calls_per_minute(calls_per_minute))]
}

/// Runs every passive module, a failing module contributes nothing.
#[instrument(name = "modules", level = "info", skip_all)]
pub async fn collect_passive(
    http_client: &Client,
    modules: &[Box<dyn SubdomainModule>],
    domain: &str,
) -> Vec<String> {
    let collected: Vec<Vec<String>> = stream::iter(modules.iter())
        .map(|module| async move {
            debug!("Running {}: {}", module.name(), module.description());
            match module.enumerate(http_client, domain).await {
                Ok(subdomains) => subdomains,
                Err(err) => {
                    error!("{}: {}", module.name(), err);
                    Vec::new()
                }
            }
        })
        .buffer_unordered(modules.len().max(1))
        .collect()
        .await;

    let subdomains: Vec<String> = dedupe(collected.into_iter().flatten()).collect();
    info!("{} passive subdomains collected", subdomains.len());
    subdomains
}
