mod bruteforce;
mod dns;
mod error;
mod hostname;
mod model;
mod modules;
mod scan;
mod wildcard;

pub use error::{Error, Result};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use model::{ensure_dir, export, safe_path, OutputFormat};
use reqwest::Client;
use scan::{scan, ScanOptions, DEFAULT_NAMESERVERS};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

const DOWNLOADED_WORDLIST: &str = "wordlists/subdomains.txt";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = command().get_matches();

    let domain = cli
        .get_one::<String>("domain")
        .map(|domain| domain.trim().to_lowercase())
        .ok_or_else(|| Error::CliUsage("A target domain is required".into()))?;

    // create filename
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let filename = format!("{}", timestamp);
    let output_dir = format!("output/subenum/{}", domain);

    let save_logs = cli.get_flag("logs");
    if save_logs {
        ensure_dir(output_dir.as_ref())?;
    }
    init_tracing_subscriber(
        save_logs,
        cli.get_flag("verbose"),
        output_dir.as_ref(),
        &filename,
    );

    if !hostname::is_valid_domain(&domain) {
        error!("Invalid domain: {}", domain);
        return Err(Error::InvalidDomain(domain));
    }
    info!("Target domain: {} (run_{})", domain, timestamp);

    let mut options = scan_options(&cli, &domain)?;
    if let Some(url) = cli.get_one::<String>("download-wordlist") {
        let dest = PathBuf::from(DOWNLOADED_WORDLIST);
        download_wordlist(url, &dest, options.http_timeout).await?;
        options.wordlist = dest;
    }

    // validate the output path before the scan
    let out = cli
        .get_one::<String>("out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("results.json"));
    let out_path = safe_path(&out)?;

    // run the scan
    let result = scan(&options).await?;

    // write result
    export(&result, &out_path, OutputFormat::from_path(&out_path))?;
    info!("Wrote {} results to {}", result.len(), out.display());

    Ok(())
}

fn command() -> Command {
    Command::new(clap::crate_name!())
        .version(clap::crate_version!())
        .about("Passive and bruteforce subdomain enumeration")
        .arg(
            Arg::new("domain")
                .short('d')
                .long("domain")
                .value_name("DOMAIN")
                .help("Target domain (e.g., example.com)")
                .required(true),
        )
        .arg(
            Arg::new("wordlist")
                .short('w')
                .long("wordlist")
                .value_name("PATH")
                .help("Path to wordlist file")
                .default_value(DOWNLOADED_WORDLIST),
        )
        .arg(
            Arg::new("download-wordlist")
                .short('D')
                .long("download-wordlist")
                .value_name("URL")
                .help("Download a wordlist into wordlists/ and use it"),
        )
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .value_name("PATH")
                .help("Output file (.json for JSON, .csv for CSV, anything else for text)")
                .default_value("results.json"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("N")
                .help("Concurrent DNS resolutions (1-100)")
                .value_parser(value_parser!(u64).range(1..=100))
                .default_value("30"),
        )
        .arg(
            Arg::new("max-pending")
                .long("max-pending")
                .value_name("N")
                .help("Candidates queued ahead of the bruteforce workers")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("1000"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .help("DNS resolution timeout in seconds")
                .value_parser(value_parser!(f64))
                .default_value("5.0"),
        )
        .arg(
            Arg::new("http-timeout")
                .long("http-timeout")
                .value_name("SECS")
                .help("HTTP request timeout in seconds")
                .value_parser(value_parser!(f64))
                .default_value("15.0"),
        )
        .arg(
            Arg::new("dns-servers")
                .long("dns-servers")
                .value_name("IP")
                .help("DNS servers to query, none for the system configuration")
                .num_args(0..)
                .default_values(DEFAULT_NAMESERVERS.iter().copied()),
        )
        .arg(
            Arg::new("no-passive")
                .long("no-passive")
                .action(ArgAction::SetTrue)
                .help("Disable passive collectors (crt.sh)"),
        )
        .arg(
            Arg::new("progress-every")
                .long("progress-every")
                .value_name("N")
                .help("Log progress every N words processed (0=off)")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logs"),
        )
        .arg(
            Arg::new("logs")
                .short('s')
                .long("logs")
                .action(ArgAction::SetTrue)
                .help("Save logs into a .log file"),
        )
}

fn scan_options(cli: &ArgMatches, domain: &str) -> Result<ScanOptions> {
    let mut options = ScanOptions::new(domain);

    if let Some(wordlist) = cli.get_one::<String>("wordlist") {
        options.wordlist = PathBuf::from(wordlist);
    }
    if let Some(concurrency) = cli.get_one::<u64>("concurrency") {
        options.concurrency = *concurrency as usize;
    }
    if let Some(max_pending) = cli.get_one::<u64>("max-pending") {
        options.max_pending = *max_pending as usize;
    }
    if let Some(progress_every) = cli.get_one::<u64>("progress-every") {
        options.progress_every = *progress_every as usize;
    }
    options.dns_timeout = seconds(cli, "timeout", options.dns_timeout)?;
    options.http_timeout = seconds(cli, "http-timeout", options.http_timeout)?;

    let servers: Vec<String> = cli
        .get_many::<String>("dns-servers")
        .map(|servers| servers.cloned().collect())
        .unwrap_or_default();
    options.nameservers = dns::parse_nameservers(&servers)?;
    options.passive = !cli.get_flag("no-passive");

    Ok(options)
}

fn seconds(cli: &ArgMatches, id: &str, default: Duration) -> Result<Duration> {
    match cli.get_one::<f64>(id) {
        Some(secs) => Duration::try_from_secs_f64(*secs)
            .map_err(|_| Error::CliUsage(format!("--{} must be a positive number", id))),
        None => Ok(default),
    }
}

async fn download_wordlist(url: &str, dest: &Path, timeout: Duration) -> Result<()> {
    let http_client = Client::builder().timeout(timeout).build()?;
    info!("Downloading wordlist from: {}", url);

    let res = modules::http_request(&http_client, url).await?;
    let body = res.error_for_status()?.text().await?;

    if let Some(dir) = dest.parent() {
        ensure_dir(dir)?;
    }
    tokio::fs::write(dest, body).await?;
    info!("Saved wordlist to: {}", dest.display());
    Ok(())
}

fn init_tracing_subscriber(save_logs_file: bool, verbose: bool, output_dir: &Path, filename: &str) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // base for the subscriber
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::CLOSE);

    if save_logs_file {
        let filename = format!("{}.log", filename);
        let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, filename);
        let suscriber = subscriber
            .with_ansi(false)
            .with_file(false)
            .with_target(false)
            .with_writer(file_appender)
            .finish();

        // add log in terminal as an additional layer
        let stdout_layer = layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_file(false)
            .with_target(false);

        // init the subscriber
        tracing::subscriber::set_global_default(suscriber.with(stdout_layer))
            .expect("Unable to set global subscriber with 2 layer");
    } else {
        let suscriber = subscriber
            .with_ansi(true)
            .with_file(false)
            .with_target(false)
            .finish();

        // init the subscriber
        tracing::subscriber::set_global_default(suscriber)
            .expect("Unable to set global subscriber");
    }
}
