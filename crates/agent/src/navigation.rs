//! Turning what a human typed into something a browser can load.

use browserclaw_core::error::CapabilityError;
use url::Url;

/// Normalize a user-supplied address.
///
/// Bare hosts get an `https://` prefix. Only `http`, `https` and
/// `about:` targets are accepted; anything unparseable is rejected
/// before a browser is ever touched.
pub fn normalize_url(raw: &str) -> Result<String, CapabilityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CapabilityError::InvalidTarget("empty address".into()));
    }

    let candidate = if trimmed.contains("://") || trimmed.starts_with("about:") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| CapabilityError::InvalidTarget(format!("{trimmed}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {
            if parsed.host_str().is_none_or(str::is_empty) {
                return Err(CapabilityError::InvalidTarget(format!("{trimmed}: missing host")));
            }
        }
        "about" => {}
        other => {
            return Err(CapabilityError::InvalidTarget(format!(
                "{trimmed}: unsupported scheme '{other}'"
            )));
        }
    }

    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_https() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com/");
        assert_eq!(
            normalize_url("  duckduckgo.com/?q=rust ").unwrap(),
            "https://duckduckgo.com/?q=rust"
        );
    }

    #[test]
    fn explicit_scheme_is_kept() {
        assert_eq!(normalize_url("http://localhost:8080/a").unwrap(), "http://localhost:8080/a");
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
    }

    #[test]
    fn garbage_is_rejected() {
        for raw in ["", "   ", "https://not a url", "ftp://example.com", "javascript:alert(1)"] {
            assert!(
                matches!(normalize_url(raw), Err(CapabilityError::InvalidTarget(_))),
                "{raw:?} should be rejected"
            );
        }
    }
}
