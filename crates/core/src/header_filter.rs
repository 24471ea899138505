//! Pure functions over header lists: hop-by-hop stripping, outbound/inbound
//! hygiene, and log-safe masking. No network or registry state involved.

use crate::backend::Backend;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

/// Removes hop-by-hop headers and any header named in the `connection` value.
pub fn strip_hop_by_hop(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut listed: Vec<String> = Vec::new();
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("connection") {
            listed.extend(value.split(',').map(|s| s.trim().to_ascii_lowercase()));
        }
    }

    headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !HOP_BY_HOP.contains(&lower.as_str()) && !listed.contains(&lower)
        })
        .cloned()
        .collect()
}

/// Headers to send to the upstream backend: hop-by-hop stripped, plus
/// `authorization`/`host`/`content-length` dropped and `Authorization` /
/// `Content-Type` injected.
pub fn filter_outbound(headers: &[(String, String)], backend: &Backend) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = strip_hop_by_hop(headers)
        .into_iter()
        .filter(|(name, _)| {
            !matches!(
                name.to_ascii_lowercase().as_str(),
                "authorization" | "host" | "content-length"
            )
        })
        .collect();

    if let Some(api_key) = &backend.api_key {
        out.push(("Authorization".to_string(), format!("Bearer {api_key}")));
    }
    if !out.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type")) {
        out.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    out
}

/// Headers to forward back to the client from an upstream response:
/// hop-by-hop stripped, plus `content-length`/`transfer-encoding`/
/// `content-encoding` dropped (the forwarder may have decompressed).
pub fn filter_inbound(headers: &[(String, String)]) -> Vec<(String, String)> {
    strip_hop_by_hop(headers)
        .into_iter()
        .filter(|(name, _)| {
            !matches!(
                name.to_ascii_lowercase().as_str(),
                "content-length" | "transfer-encoding" | "content-encoding"
            )
        })
        .collect()
}

/// Masks sensitive header values for log output. Never used for forwarding.
pub fn mask_for_log(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if lower == "authorization" {
                let (scheme, token) = value.split_once(' ').unwrap_or(("", value.as_str()));
                let prefix: String = token.chars().take(3).collect();
                (name.clone(), format!("{scheme} {prefix}****"))
            } else if lower == "host" {
                (name.clone(), "<redacted-host>".to_string())
            } else if lower == "proxy-connection" {
                let prefix: String = value.chars().take(3).collect();
                (name.clone(), format!("{prefix}****"))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
