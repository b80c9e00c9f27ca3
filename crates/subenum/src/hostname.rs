use lazy_regex::regex_is_match;
use std::collections::HashSet;

/// Canonical form of a hostname: trimmed, lowercased, without the trailing dot.
pub fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Lazily yields every non-empty canonical name once, in first-seen order.
pub fn dedupe<I, S>(names: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    names.into_iter().filter_map(move |name| {
        let name = normalize(name.as_ref());
        if name.is_empty() || !seen.insert(name.clone()) {
            None
        } else {
            Some(name)
        }
    })
}

pub fn is_likely_hostname(name: &str) -> bool {
    regex_is_match!(r"^[a-z0-9\-.]+$", name)
}

pub fn is_valid_domain(domain: &str) -> bool {
    regex_is_match!(
        r"^[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?)+$"i,
        domain
    )
}
