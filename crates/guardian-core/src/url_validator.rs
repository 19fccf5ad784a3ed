use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Longest normalized URL accepted for downstream lookups.
pub const MAX_URL_LEN: usize = 2048;

const DANGEROUS_PROTOCOLS: [&str; 5] = ["javascript:", "data:", "vbscript:", "file:", "about:"];
const INVALID_HOST_CHARS: [char; 11] = ['<', '>', '"', '{', '}', '|', '\\', '^', '`', '[', ']'];

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+\-.]*:").expect("scheme prefix regex"));

static DNS_HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("hostname regex")
});

static IPV4_HOSTNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").expect("ipv4 regex"));

static IPV6_HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[([0-9a-fA-F]{0,4}:){2,7}[0-9a-fA-F]{0,4}\]$").expect("ipv6 regex")
});

/// Reasons a piece of user input was refused as a scannable URL.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UrlValidationError {
    #[error("URL cannot be empty. Please enter a valid URL.")]
    Empty,
    #[error("URLs starting with \"{protocol}\" are not allowed for security reasons.")]
    DangerousProtocol { protocol: String },
    #[error("Invalid URL format. Multiple \"://\" found.")]
    MultipleSchemeSeparators,
    #[error("URL must contain a domain name.")]
    MissingDomain,
    #[error("URL contains invalid characters. Please check the domain name.")]
    InvalidCharacters,
    #[error("Invalid URL format. Please include a protocol (http:// or https://) or a valid domain name.")]
    NotADomain,
    #[error("Invalid URL format. Please check that the URL is correctly formatted.\n\nExample: https://example.com")]
    Malformed,
    #[error("Protocol \"{scheme}:\" is not supported. Only http:// and https:// are allowed.")]
    UnsupportedScheme { scheme: String },
    #[error("URL must contain a valid domain name.")]
    MissingHost,
    #[error("\"{host}\" is not a valid domain name, IP address, or localhost.")]
    InvalidHost { host: String },
    #[error("URL is too long. Maximum length is {max} characters.")]
    TooLong { max: usize, actual: usize },
}

/// Flattened outcome of [`validate_and_normalize`], suitable for display layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<String, UrlValidationError>> for ValidationResult {
    fn from(outcome: Result<String, UrlValidationError>) -> Self {
        match outcome {
            Ok(url) => Self {
                is_valid: true,
                normalized_url: Some(url),
                error: None,
            },
            Err(err) => Self {
                is_valid: false,
                normalized_url: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Validate free-form input (typed text or a QR payload) and return the
/// canonical `http(s)://` URL used for downstream lookups.
///
/// Rules are applied in a fixed order and the first failing rule wins, so a
/// long URL with a bad hostname reports the hostname.
pub fn normalize_url(input: &str) -> Result<String, UrlValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();

    let lower = cleaned.to_lowercase();
    if let Some(protocol) = DANGEROUS_PROTOCOLS
        .iter()
        .find(|protocol| lower.starts_with(*protocol))
    {
        return Err(UrlValidationError::DangerousProtocol {
            protocol: (*protocol).to_string(),
        });
    }

    let candidate = match cleaned.split_once("://") {
        Some((_, rest)) if rest.contains("://") => {
            return Err(UrlValidationError::MultipleSchemeSeparators)
        }
        Some((_, rest)) => rest,
        None => cleaned.as_str(),
    };
    if candidate.is_empty() {
        return Err(UrlValidationError::MissingDomain);
    }
    let host_part = candidate.split('/').next().unwrap_or_default();
    if host_part.contains(&INVALID_HOST_CHARS[..]) {
        return Err(UrlValidationError::InvalidCharacters);
    }

    let mut normalized = if SCHEME_PREFIX.is_match(&cleaned) {
        cleaned
    } else if cleaned.contains('.') || lower.starts_with("localhost") {
        format!("https://{cleaned}")
    } else {
        return Err(UrlValidationError::NotADomain);
    };

    let parsed = Url::parse(&normalized).map_err(|_| UrlValidationError::Malformed)?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(UrlValidationError::UnsupportedScheme {
            scheme: scheme.to_string(),
        });
    }
    // `http:example.com` parses, but the canonical form must carry `://`.
    if !normalized[scheme.len()..].starts_with("://") {
        return Err(UrlValidationError::Malformed);
    }
    if !normalized.starts_with(scheme) {
        normalized = format!("{scheme}{}", &normalized[scheme.len()..]);
    }

    let host = parsed.host_str().unwrap_or_default();
    if host.is_empty() {
        return Err(UrlValidationError::MissingHost);
    }
    if !is_acceptable_host(host) {
        return Err(UrlValidationError::InvalidHost {
            host: host.to_string(),
        });
    }

    let actual = normalized.chars().count();
    if actual > MAX_URL_LEN {
        return Err(UrlValidationError::TooLong {
            max: MAX_URL_LEN,
            actual,
        });
    }

    Ok(normalized)
}

/// Display-friendly wrapper around [`normalize_url`].
pub fn validate_and_normalize(input: &str) -> ValidationResult {
    normalize_url(input).into()
}

pub fn is_valid_url(input: &str) -> bool {
    normalize_url(input).is_ok()
}

fn is_acceptable_host(host: &str) -> bool {
    host == "localhost"
        || DNS_HOSTNAME.is_match(host)
        || IPV4_HOSTNAME.is_match(host)
        || IPV6_HOSTNAME.is_match(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bare_domain_gets_https_prefix() {
        assert_eq!(normalize_url("hdfc.com").unwrap(), "https://hdfc.com");
        let result = validate_and_normalize("hdfc.com");
        assert!(result.is_valid);
        assert_eq!(result.normalized_url.as_deref(), Some("https://hdfc.com"));
        assert!(result.error.is_none());
    }

    #[test]
    fn explicit_scheme_is_kept() {
        assert_eq!(
            normalize_url("http://example.org/login?next=/").unwrap(),
            "http://example.org/login?next=/"
        );
    }

    #[test]
    fn internal_whitespace_is_stripped() {
        assert_eq!(
            normalize_url("  exa mple.com/pa th ").unwrap(),
            "https://example.com/path"
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(normalize_url("   \t"), Err(UrlValidationError::Empty));
        let result = validate_and_normalize("");
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("cannot be empty"));
    }

    #[test]
    fn dangerous_protocols_echo_the_protocol() {
        let result = validate_and_normalize("javascript:alert(1)");
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("javascript:"));

        assert_eq!(
            normalize_url("DATA:text/html;base64,AAAA"),
            Err(UrlValidationError::DangerousProtocol {
                protocol: "data:".into()
            })
        );
    }

    #[test]
    fn double_scheme_separator_is_rejected() {
        assert_eq!(
            normalize_url("https://evil.com://bank.com"),
            Err(UrlValidationError::MultipleSchemeSeparators)
        );
    }

    #[test]
    fn ambiguous_separator_input_is_invalid() {
        assert!(!validate_and_normalize("http://a//b::c").is_valid);
    }

    #[test]
    fn scheme_without_domain_is_rejected() {
        assert_eq!(
            normalize_url("https://"),
            Err(UrlValidationError::MissingDomain)
        );
    }

    #[test]
    fn forbidden_host_characters_are_rejected() {
        assert_eq!(
            normalize_url("https://exa<mple.com"),
            Err(UrlValidationError::InvalidCharacters)
        );
        assert_eq!(
            normalize_url("bank{1}.com/path"),
            Err(UrlValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn word_without_dot_is_not_a_domain() {
        assert_eq!(normalize_url("hello"), Err(UrlValidationError::NotADomain));
    }

    #[test]
    fn localhost_is_accepted() {
        assert_eq!(
            normalize_url("localhost/admin").unwrap(),
            "https://localhost/admin"
        );
        assert_eq!(
            normalize_url("http://localhost:8080").unwrap(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn ipv4_literals_are_accepted() {
        assert!(is_valid_url("http://192.168.1.34:5000/analyze"));
    }

    #[test]
    fn bracketed_input_trips_the_character_check() {
        assert_eq!(
            normalize_url("http://[::1]/"),
            Err(UrlValidationError::InvalidCharacters)
        );
        assert!(is_acceptable_host("[::1]"));
        assert!(is_acceptable_host("[fe80:0:0:0:0:0:0:1]"));
    }

    #[test]
    fn upper_case_scheme_is_canonicalised() {
        assert_eq!(
            normalize_url("HTTPS://Example.com/Path").unwrap(),
            "https://Example.com/Path"
        );
    }

    #[test]
    fn scheme_without_slashes_is_rejected() {
        assert_eq!(
            normalize_url("http:example.com"),
            Err(UrlValidationError::Malformed)
        );
    }

    #[test]
    fn non_web_schemes_are_rejected_after_parse() {
        assert_eq!(
            normalize_url("ftp://files.example.com"),
            Err(UrlValidationError::UnsupportedScheme {
                scheme: "ftp".into()
            })
        );
    }

    #[test]
    fn single_label_hosts_are_rejected() {
        assert_eq!(
            normalize_url("http://intranet/"),
            Err(UrlValidationError::InvalidHost {
                host: "intranet".into()
            })
        );
    }

    #[test]
    fn numeric_tld_is_rejected() {
        assert!(matches!(
            normalize_url("https://example.c0m"),
            Err(UrlValidationError::InvalidHost { .. })
        ));
    }

    #[test]
    fn overlong_url_is_rejected() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            normalize_url(&long),
            Err(UrlValidationError::TooLong { max: MAX_URL_LEN, .. })
        ));
    }

    #[test]
    fn hostname_error_wins_over_length_error() {
        let long = format!("http://intranet/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            normalize_url(&long),
            Err(UrlValidationError::InvalidHost { .. })
        ));
    }

    proptest! {
        #[test]
        fn dotted_names_without_scheme_get_https(label in "[a-z][a-z0-9]{0,12}", tld in "[a-z]{2,6}") {
            let input = format!("{label}.{tld}");
            let normalized = normalize_url(&input).unwrap();
            prop_assert_eq!(normalized, format!("https://{input}"));
        }

        #[test]
        fn accepted_urls_always_carry_a_web_scheme(input in "\\PC{0,64}") {
            if let Ok(url) = normalize_url(&input) {
                prop_assert!(url.starts_with("https://") || url.starts_with("http://"));
                prop_assert!(Url::parse(&url).is_ok());
            }
        }
    }
}
