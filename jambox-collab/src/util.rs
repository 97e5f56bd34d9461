use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use regex::Regex;
use url::Url;

lazy_static! {
    pub static ref URL_SCHEME_REGEX: Regex = Regex::new(r"^(?i:https?://)?").unwrap();
}

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Turns user input into an https url, or nothing if it isn't one.
pub fn normalize_source_url(input: &str) -> Option<String> {
    let input = input.trim();

    if input.is_empty() {
        return None;
    }

    let normalized = URL_SCHEME_REGEX.replace(input, "https://");
    let url = Url::parse(&normalized).ok()?;

    url.host_str()
        .filter(|host| host.contains('.') || *host == "localhost")?;

    Some(url.into())
}
