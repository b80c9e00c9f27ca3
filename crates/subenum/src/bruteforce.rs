use crate::dns::{resolve_isolated, SharedDnsClient};
use crate::hostname::normalize;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct BruteforceOptions {
    /// number of workers resolving candidates
    pub concurrency: usize,
    /// capacity of the candidate queue, the reader waits when it is full
    pub max_pending: usize,
    pub max_depth: usize,
    /// log progress every N words read, 0 disables it
    pub progress_every: usize,
}

pub async fn open_wordlist(path: &Path) -> Option<BufReader<File>> {
    match File::open(path).await {
        Ok(file) => Some(BufReader::new(file)),
        Err(err) => {
            warn!("Wordlist not found: {} ({})", path.display(), err);
            None
        }
    }
}

fn progress_due(processed: usize, every: usize) -> bool {
    every > 0 && processed % every == 0
}

/// Streams every `<word>.<domain>` candidate that resolves to at least one record.
///
/// Candidates flow through a bounded queue of `max_pending` entries drained by
/// `concurrency` workers, so the reader blocks instead of piling up work. Names are
/// yielded in completion order, not wordlist order. The stream ends once the wordlist
/// is exhausted and every queued candidate has been resolved. Dropping it stops the
/// workers and then the reader, in-flight lookups still run to completion.
pub fn bruteforce_stream<R>(
    client: SharedDnsClient,
    domain: &str,
    wordlist: R,
    options: BruteforceOptions,
    skip_set: Arc<HashSet<String>>,
) -> ReceiverStream<String>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let concurrency = options.concurrency.max(1);
    let max_depth = options.max_depth;

    // create 2 channels, one for the candidates to resolve and the other for
    // the names that resolved
    let (candidates_tx, candidates_rx) = mpsc::channel(options.max_pending.max(1));
    let (found_tx, found_rx) = mpsc::channel(concurrency);

    tokio::spawn(produce_candidates(
        domain.to_string(),
        wordlist,
        candidates_tx,
        skip_set,
        options.progress_every,
    ));

    tokio::spawn(async move {
        let mut resolved = ReceiverStream::new(candidates_rx)
            .map(|candidate: String| {
                let client = Arc::clone(&client);
                async move {
                    let result = resolve_isolated(client, candidate.clone(), max_depth).await;
                    (candidate, result)
                }
            })
            .buffer_unordered(concurrency);

        // dropping `resolved` closes the candidate queue, which stops the reader
        loop {
            let next = tokio::select! {
                next = resolved.next() => next,
                _ = found_tx.closed() => {
                    debug!("Result stream dropped, stop workers");
                    break;
                }
            };
            let Some((candidate, result)) = next else {
                break;
            };
            if result.is_empty() {
                continue;
            }

            let name = normalize(&candidate);
            debug!("{:12} - {:?}", "RESOLVED", name);
            if found_tx.send(name).await.is_err() {
                debug!("Result stream dropped, stop workers");
                break;
            }
        }
        debug!("Bruteforce workers finished");
    });

    ReceiverStream::new(found_rx)
}

async fn produce_candidates<R>(
    domain: String,
    mut wordlist: R,
    candidates_tx: mpsc::Sender<String>,
    skip_set: Arc<HashSet<String>>,
    progress_every: usize,
) where
    R: AsyncBufRead + Unpin,
{
    let start = Instant::now();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut submitted = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        match wordlist.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("Stopped reading wordlist: {}", err);
                break;
            }
        }
        processed += 1;

        let raw = String::from_utf8_lossy(&line);
        let word = raw.trim();
        if !word.is_empty() && !word.starts_with('#') {
            let candidate = format!("{}.{}", word, domain);
            if skip_set.contains(&normalize(&candidate)) {
                skipped += 1;
            } else if candidates_tx.send(candidate).await.is_err() {
                debug!("Candidate queue closed, stop reading");
                break;
            } else {
                submitted += 1;
            }
        }

        if progress_due(processed, progress_every) {
            info!(
                "processed={}, pending={}, elapsed={:.1}s",
                processed,
                candidates_tx.max_capacity() - candidates_tx.capacity(),
                start.elapsed().as_secs_f64()
            );
        }
    }

    info!(
        "{} words read, {} candidates submitted, {} already known",
        processed, submitted, skipped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::mock::MockDns;
    use crate::dns::{RecordKind, DEFAULT_MAX_CNAME_DEPTH};
    use std::time::Duration;

    fn words(count: usize) -> std::io::Cursor<Vec<u8>> {
        let words: String = (0..count).map(|i| format!("w{}\n", i)).collect();
        std::io::Cursor::new(words.into_bytes())
    }

    fn options(concurrency: usize, max_pending: usize) -> BruteforceOptions {
        BruteforceOptions {
            concurrency,
            max_pending,
            max_depth: DEFAULT_MAX_CNAME_DEPTH,
            progress_every: 0,
        }
    }

    #[tokio::test]
    async fn yields_only_resolved_candidates() {
        let dns = Arc::new(
            MockDns::new()
                .with("www.example.com", RecordKind::A, &["10.0.0.1"])
                .with("mail.example.com", RecordKind::A, &[]),
        );
        let wordlist: &'static [u8] = b"www\n#comment\n\nmail\n";

        let found: Vec<String> = bruteforce_stream(
            dns.clone(),
            "example.com",
            wordlist,
            options(4, 10),
            Arc::new(HashSet::new()),
        )
        .collect()
        .await;

        assert_eq!(found, vec!["www.example.com".to_string()]);
    }

    #[tokio::test]
    async fn known_names_are_never_resolved() {
        let dns = Arc::new(MockDns::new().with("www.example.com", RecordKind::A, &["10.0.0.1"]));
        let skip_set: HashSet<String> = ["www.example.com", "api.example.com"]
            .into_iter()
            .map(String::from)
            .collect();
        let wordlist: &'static [u8] = b"WWW\napi\n# only known names\n";

        let found: Vec<String> = bruteforce_stream(
            dns.clone(),
            "example.com",
            wordlist,
            options(4, 10),
            Arc::new(skip_set),
        )
        .collect()
        .await;

        assert!(found.is_empty());
        assert_eq!(dns.calls(), 0);
    }

    #[tokio::test]
    async fn bounded_queue_drains_every_success() {
        let mut dns = MockDns::new().with_delay(Duration::from_millis(10));
        for word in ["a", "b", "c", "d", "e"] {
            dns = dns.with(&format!("{}.example.com", word), RecordKind::A, &["192.0.2.10"]);
        }
        let dns = Arc::new(dns);
        let wordlist: &'static [u8] = b"a\nb\nc\nd\ne";

        let mut found: Vec<String> = bruteforce_stream(
            dns.clone(),
            "example.com",
            wordlist,
            options(2, 2),
            Arc::new(HashSet::new()),
        )
        .collect()
        .await;
        found.sort();

        assert_eq!(
            found,
            ["a", "b", "c", "d", "e"]
                .iter()
                .map(|w| format!("{}.example.com", w))
                .collect::<Vec<String>>()
        );
        assert!(dns.max_active() <= 2);
        assert_eq!(dns.calls(), 5 * 3);
    }

    #[tokio::test]
    async fn consumer_drives_backpressure() {
        let mut dns = MockDns::new();
        for i in 0..50 {
            dns = dns.with(&format!("w{}.example.com", i), RecordKind::A, &["192.0.2.20"]);
        }
        let dns = Arc::new(dns);
        let words: String = (0..50).map(|i| format!("w{}\n", i)).collect();
        let wordlist = std::io::Cursor::new(words.into_bytes());

        let mut stream = bruteforce_stream(
            dns.clone(),
            "example.com",
            wordlist,
            options(1, 2),
            Arc::new(HashSet::new()),
        );

        // nobody reads the results: at most one result buffered, one in flight
        // and two queued before everything stalls
        assert!(stream.next().await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dns.calls() <= 6 * 3);

        let rest: Vec<String> = stream.collect().await;
        assert_eq!(rest.len(), 49);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_work() {
        let mut dns = MockDns::new();
        for i in 0..200 {
            dns = dns.with(&format!("w{}.example.com", i), RecordKind::A, &["192.0.2.30"]);
        }
        let dns = Arc::new(dns);

        let mut stream = bruteforce_stream(
            dns.clone(),
            "example.com",
            words(200),
            options(1, 2),
            Arc::new(HashSet::new()),
        );
        assert!(stream.next().await.is_some());
        drop(stream);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // one taken, one buffered, one being sent, one in flight and two queued
        assert!(dns.calls() <= 6 * 3, "{} lookups after drop", dns.calls());
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_workers_without_results() {
        let dns = Arc::new(MockDns::new().with_delay(Duration::from_millis(5)));

        let stream = bruteforce_stream(
            dns.clone(),
            "example.com",
            words(200),
            options(1, 2),
            Arc::new(HashSet::new()),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(stream);
        // let the lookup in flight at drop time finish
        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls_at_drop = dns.calls();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(calls_at_drop < 200 * 3);
        assert_eq!(dns.calls(), calls_at_drop);
    }

    #[test]
    fn progress_every_n_words() {
        assert!(!progress_due(3, 0));
        assert!(!progress_due(3, 2));
        assert!(progress_due(4, 2));
        assert!(progress_due(1, 1));
    }

    #[tokio::test]
    async fn progress_logging_keeps_every_result() {
        let mut dns = MockDns::new();
        for i in 0..10 {
            dns = dns.with(&format!("w{}.example.com", i), RecordKind::A, &["192.0.2.40"]);
        }
        let mut opts = options(2, 2);
        opts.progress_every = 3;

        let found: Vec<String> = bruteforce_stream(
            Arc::new(dns),
            "example.com",
            words(10),
            opts,
            Arc::new(HashSet::new()),
        )
        .collect()
        .await;
        assert_eq!(found.len(), 10);
    }

    #[tokio::test]
    async fn missing_wordlist_is_none() {
        let path = Path::new("does/not/exist/wordlist.txt");
        assert!(open_wordlist(path).await.is_none());
    }
}
