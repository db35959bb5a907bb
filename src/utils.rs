use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Hash an identifier before it goes into a log line
///
/// Same input and salt give the same short tag, so failed logins for one
/// username can be correlated without the username appearing in logs.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..4])
}

/// Best-effort client address: proxy headers first, then the socket peer
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> String {
    // X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
    {
        if let Ok(ip) = first_ip.parse::<IpAddr>() {
            return ip.to_string();
        }
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ip.to_string();
    }

    match direct_ip {
        Some(ip) => ip.to_string(),
        None => "unknown".to_string(),
    }
}

/// Sizes of the request headers, as counted by the inspection stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderVolume {
    /// Sum of name + value bytes over all headers
    pub total_bytes: usize,
    pub header_count: usize,
    pub cookie_bytes: usize,
    pub authorization_bytes: usize,
}

impl HeaderVolume {
    pub fn measure(headers: &HeaderMap) -> Self {
        let mut volume = Self::default();
        for (name, value) in headers.iter() {
            let size = name.as_str().len() + value.as_bytes().len();
            volume.total_bytes += size;
            volume.header_count += 1;
            if name == header::COOKIE {
                volume.cookie_bytes += value.as_bytes().len();
            } else if name == header::AUTHORIZATION {
                volume.authorization_bytes += value.as_bytes().len();
            }
        }
        volume
    }
}
