//! OAuth utilities and outbound request hardening.

pub mod config;
pub mod exchange;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use ipnet::IpNet;
use url::Url;

use crate::error::{GitlinkError, Result};

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("gitlink/", env!("CARGO_PKG_VERSION"));

/// Configuration for SSRF protection.
#[derive(Debug, Clone, Default)]
pub struct SsrfConfig {
    /// Allowed hosts (exact match).
    pub allowed_hosts: HashSet<String>,
    /// Allowed CIDRs for private IP ranges (for self-hosted GitLab).
    pub allowed_cidrs: Vec<IpNet>,
    /// Whether to allow private/internal IP addresses.
    pub allow_private_ips: bool,
    /// Custom CA bundle path for TLS.
    pub ca_bundle_path: Option<String>,
}

impl SsrfConfig {
    /// Creates a config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("GITLINK_GITLAB_ALLOWED_HOSTS") {
            for host in hosts.split(',') {
                let host = host.trim().to_lowercase();
                if !host.is_empty() {
                    config.allowed_hosts.insert(host);
                }
            }
        }

        if let Ok(cidrs) = std::env::var("GITLINK_GITLAB_ALLOWED_CIDRS") {
            for cidr in cidrs.split(',') {
                let cidr = cidr.trim();
                if cidr.is_empty() {
                    continue;
                }
                match cidr.parse::<IpNet>() {
                    Ok(net) => {
                        if Self::is_cidr_too_broad(&net) {
                            tracing::warn!(
                                "Ignoring overly broad CIDR {} in GITLINK_GITLAB_ALLOWED_CIDRS",
                                cidr
                            );
                            continue;
                        }
                        config.allowed_cidrs.push(net);
                        config.allow_private_ips = true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Invalid CIDR in GITLINK_GITLAB_ALLOWED_CIDRS: {} - {}",
                            cidr,
                            e
                        );
                    }
                }
            }
        }

        if let Ok(path) = std::env::var("GITLINK_GITLAB_CA_BUNDLE")
            && !path.is_empty()
        {
            config.ca_bundle_path = Some(path);
        }

        config
    }

    /// Checks if a CIDR is too broad (potential misconfiguration).
    fn is_cidr_too_broad(net: &IpNet) -> bool {
        match net {
            IpNet::V4(v4) => v4.prefix_len() < 8,
            IpNet::V6(v6) => v6.prefix_len() < 32,
        }
    }

    /// Checks if an IP is in the allowed CIDRs.
    pub fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    fn is_host_allowed(&self, host: &str, host_with_port: &str) -> bool {
        self.allowed_hosts.contains(host) || self.allowed_hosts.contains(host_with_port)
    }
}

/// A GitLab host that passed SSRF validation, with the addresses it resolved to.
#[derive(Debug, Clone)]
pub struct ValidatedHost {
    pub host: String,
    pub port: u16,
    pub resolved_ips: Vec<IpAddr>,
}

impl ValidatedHost {
    fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.resolved_ips
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }
}

/// Validates an installation host (`host` or `host:port`) before any request
/// is made to it.
pub fn validate_instance_host(host_str: &str, config: &SsrfConfig) -> Result<ValidatedHost> {
    let url = Url::parse(&format!("https://{}", host_str))
        .map_err(|e| GitlinkError::Configuration(format!("Invalid GitLab host: {}", e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| GitlinkError::Configuration("GitLab host is empty".to_string()))?
        .to_lowercase();
    let port = url.port_or_known_default().unwrap_or(443);
    let host_with_port = format!("{}:{}", host, port);

    if !config.allowed_hosts.is_empty() && !config.is_host_allowed(&host, &host_with_port) {
        return Err(GitlinkError::Configuration(format!(
            "Host {} is not in GITLINK_GITLAB_ALLOWED_HOSTS",
            host
        )));
    }
    let is_allowed_host = config.is_host_allowed(&host, &host_with_port);

    let resolved_ips = resolve_host(&host, port)?;
    if resolved_ips.is_empty() {
        return Err(GitlinkError::Configuration(format!(
            "DNS resolution failed for host: {}",
            host
        )));
    }

    for ip in &resolved_ips {
        if is_private_or_loopback(ip) {
            if !config.allow_private_ips && !is_allowed_host {
                return Err(GitlinkError::Configuration(format!(
                    "Host {} resolves to private/loopback IP {}. Set GITLINK_GITLAB_ALLOWED_CIDRS to allow.",
                    host, ip
                )));
            }

            if !config.is_ip_allowed(*ip) && !is_allowed_host {
                return Err(GitlinkError::Configuration(format!(
                    "Host {} resolves to IP {} which is not in allowed CIDRs",
                    host, ip
                )));
            }
        }
    }

    Ok(ValidatedHost {
        host,
        port,
        resolved_ips,
    })
}

/// Resolves a hostname to IP addresses.
fn resolve_host(host: &str, port: u16) -> Result<Vec<IpAddr>> {
    use std::net::ToSocketAddrs;

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let addrs: Vec<IpAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| GitlinkError::Configuration(format!("DNS resolution failed: {}", e)))?
        .map(|addr| addr.ip())
        .collect();

    Ok(addrs)
}

/// Checks if an IP address is private, loopback, or link-local.
fn is_private_or_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || is_shared_cgnat(v4)
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || is_ula_v6(v6) || is_link_local_v6(v6)
        }
    }
}

/// Checks if IPv4 is in shared CGN range (100.64.0.0/10).
fn is_shared_cgnat(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Checks if IPv6 is ULA (fc00::/7).
fn is_ula_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// Checks if IPv6 is link-local (fe80::/10).
fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

/// Builder shared by every outbound client.
fn http_client_builder(config: &SsrfConfig, verify_ssl: bool) -> Result<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .no_proxy()
        .danger_accept_invalid_certs(!verify_ssl);

    if let Some(ref ca_path) = config.ca_bundle_path {
        let ca_content = std::fs::read(ca_path).map_err(|e| {
            GitlinkError::Configuration(format!("Failed to read CA bundle {}: {}", ca_path, e))
        })?;

        let cert = reqwest::Certificate::from_pem(&ca_content)
            .map_err(|e| GitlinkError::Configuration(format!("Invalid CA certificate: {}", e)))?;

        builder = builder.add_root_certificate(cert);
    }

    Ok(builder)
}

/// Creates an HTTP client for external API calls.
pub fn create_http_client(config: &SsrfConfig, verify_ssl: bool) -> Result<reqwest::Client> {
    http_client_builder(config, verify_ssl)?
        .build()
        .map_err(|e| GitlinkError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Creates an HTTP client pinned to the addresses that passed validation,
/// so a DNS answer that changes between validation and connect is ignored.
pub fn create_pinned_http_client(
    config: &SsrfConfig,
    validated: &ValidatedHost,
    verify_ssl: bool,
) -> Result<reqwest::Client> {
    http_client_builder(config, verify_ssl)?
        .resolve_to_addrs(&validated.host, &validated.socket_addrs())
        .build()
        .map_err(|e| GitlinkError::Configuration(format!("Failed to create HTTP client: {}", e)))
}
