//! URL canonicalisation, deterministic point ids, and href resolution.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CrawlError, CrawlResult};

/// Strip the fragment and query from a URL, preserving everything else.
///
/// Two URLs with the same canonical form are treated as the same resource.
/// Applying this twice is a no-op.
pub fn canonicalize_url(raw: &str) -> CrawlResult<String> {
    let mut parsed = Url::parse(raw).map_err(|_| CrawlError::InvalidUrl {
        url: raw.to_string(),
    })?;
    parsed.set_fragment(None);
    parsed.set_query(None);
    Ok(parsed.to_string())
}

/// Derive the vector-store point id from a canonical URL.
///
/// First 16 bytes of SHA-256, formatted 8-4-4-4-12. A pure function of the
/// URL bytes: same URL, same id, always.
pub fn point_id_for_url(url: &str) -> String {
    let hash = Sha256::digest(url.as_bytes());
    format!(
        "{}-{}-{}-{}-{}",
        hex(&hash[0..4]),
        hex(&hash[4..6]),
        hex(&hash[6..8]),
        hex(&hash[8..10]),
        hex(&hash[10..16]),
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve an href against the page it appeared on.
///
/// Absolute URLs pass through; `//host/x` is given an https scheme; a
/// leading slash joins to the origin; anything else joins to the origin
/// root.
pub fn resolve_href(href: &str, scheme: &str, host: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{scheme}://{host}{href}")
    } else {
        format!("{scheme}://{host}/{href}")
    }
}
