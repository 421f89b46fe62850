// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant communication endpoints.
//!
//! The tenant hands out its endpoints as a comma separated URI list. Everything
//! downstream (status, Istio egress, OneAgent readiness) works on the parsed,
//! deduplicated and sorted form produced by [`parse_list`].

use crate::crd::CommunicationHostStatus;
use crate::errors::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use url::{Host, Url};

/// `{protocol, host, port}` of one tenant endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommunicationHost {
    /// `http` or `https`
    pub protocol: String,
    /// DNS name or IP literal
    pub host: String,
    /// Port, defaulted from the protocol when the URI has none
    pub port: u32,
}

impl fmt::Display for CommunicationHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "{}://[{}]:{}", self.protocol, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
        }
    }
}

impl CommunicationHost {
    /// `true` if the host is an IP literal rather than a DNS name.
    #[must_use]
    pub fn is_ip(&self) -> bool {
        self.host.parse::<IpAddr>().is_ok()
    }

    /// `true` if the host is an IPv6 literal.
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        self.host.parse::<Ipv6Addr>().is_ok()
    }
}

impl From<&CommunicationHostStatus> for CommunicationHost {
    fn from(status: &CommunicationHostStatus) -> Self {
        Self {
            protocol: status.protocol.clone(),
            host: status.host.clone(),
            port: status.port,
        }
    }
}

impl From<&CommunicationHost> for CommunicationHostStatus {
    fn from(host: &CommunicationHost) -> Self {
        Self {
            protocol: host.protocol.clone(),
            host: host.host.clone(),
            port: host.port,
        }
    }
}

/// Parse one endpoint URI.
///
/// Userinfo and path are dropped. IPv6 literals are stored without brackets.
///
/// # Errors
///
/// Returns [`Error::ConfigurationInvalid`] for schemes other than `http`/`https`,
/// a missing host, or a port that is not a number in `0..=65535`.
///
/// # Example
///
/// ```rust
/// use dynakube_operator::dtclient::communication_host::parse;
///
/// assert_eq!(parse("http://h").unwrap().port, 80);
/// assert_eq!(parse("https://h").unwrap().port, 443);
/// assert!(parse("ftp://h").is_err());
/// ```
pub fn parse(uri: &str) -> Result<CommunicationHost> {
    let uri = uri.trim();
    let url = Url::parse(uri)
        .map_err(|e| Error::invalid(format!("communication endpoint '{uri}' is malformed: {e}")))?;
    let protocol = url.scheme().to_string();
    if !matches!(protocol.as_str(), "http" | "https") {
        return Err(Error::invalid(format!(
            "communication endpoint '{uri}' uses unsupported scheme '{protocol}'"
        )));
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => {
            return Err(Error::invalid(format!(
                "communication endpoint '{uri}' has no host"
            )))
        }
    };
    let port = url.port_or_known_default().ok_or_else(|| {
        Error::invalid(format!("communication endpoint '{uri}' has invalid port"))
    })?;

    Ok(CommunicationHost {
        protocol,
        host,
        port: u32::from(port),
    })
}

/// Parse a comma separated endpoint list.
///
/// The result is deduplicated and sorted by the canonical `proto://host:port` form.
/// An empty input yields an empty list.
///
/// # Errors
///
/// Returns the error of the first endpoint that fails to parse.
pub fn parse_list(csv: &str) -> Result<Vec<CommunicationHost>> {
    let mut hosts = BTreeMap::new();
    for entry in csv.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let host = parse(entry)?;
        hosts.insert(host.to_string(), host);
    }
    Ok(hosts.into_values().collect())
}

/// Render hosts back into the comma separated form accepted by [`parse_list`].
#[must_use]
pub fn serialize(hosts: &[CommunicationHost]) -> String {
    hosts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
