//! Header manipulation for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Append the client to X-Forwarded-For and Forwarded
//! - Overwrite X-Forwarded-Host / X-Forwarded-Proto
//! - Point Host at the upstream when the route changes origin
//!
//! # Design Decisions
//! - An incoming X-Forwarded-For is never trusted as the whole story: the
//!   observed peer is always appended to it
//! - Headers named by `Connection` are treated as hop-by-hop too

use std::net::{IpAddr, SocketAddr};

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::load_balancer::UpstreamAddr;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Check if a header is a hop-by-hop header that should not be forwarded.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "proxy-connection"
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Who is talking to whom, as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Address of the connecting client.
    pub client_addr: SocketAddr,
    /// The gateway's own listening address.
    pub gateway_addr: SocketAddr,
}

/// Record the hop through the gateway.
///
/// `original_host` is the authority the client asked for.
pub fn apply_forwarding(headers: &mut HeaderMap, peer: &PeerInfo, original_host: Option<&str>) {
    let client_ip = peer.client_addr.ip().to_string();

    let forwarded_for = match joined(headers, &X_FORWARDED_FOR) {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip,
    };
    insert(headers, X_FORWARDED_FOR, &forwarded_for);

    if let Some(host) = original_host {
        insert(headers, X_FORWARDED_HOST, host);
    }
    insert(headers, X_FORWARDED_PROTO, "http");

    let mut element = format!(
        "for={};by={}",
        forwarded_node(peer.client_addr.ip()),
        forwarded_node(peer.gateway_addr.ip())
    );
    if let Some(host) = original_host {
        element.push_str(&format!(";host=\"{}\"", host.replace('"', "")));
    }
    element.push_str(";proto=http");

    let forwarded = match joined(headers, &header::FORWARDED) {
        Some(existing) => format!("{}, {}", existing, element),
        None => element,
    };
    insert(headers, header::FORWARDED, &forwarded);
}

/// Point `Host` at the upstream (change origin).
pub fn set_origin(headers: &mut HeaderMap, upstream: &UpstreamAddr) {
    let host = if upstream.port == upstream.scheme.default_port() {
        if upstream.host.contains(':') {
            format!("[{}]", upstream.host)
        } else {
            upstream.host.clone()
        }
    } else {
        upstream.authority()
    };
    insert(headers, header::HOST, &host);
}

fn forwarded_node(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("\"[{}]\"", v6),
    }
}

/// All values of `name`, comma-joined.
fn joined(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            tracing::debug!(header = %name, "Dropping unrepresentable forwarding header");
            headers.remove(name);
        }
    }
}
