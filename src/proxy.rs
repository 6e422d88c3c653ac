//! PROXY protocol v1 parsing (§6), gated behind
//! [`crate::config::ProxyProtocolConfig`]'s trusted-CIDR allow list.

use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxiedAddr {
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProxyProtocolError {
    #[error("not a PROXY protocol line")]
    NotProxyLine,
    #[error("malformed PROXY protocol v1 header")]
    Malformed,
    #[error("unsupported INET protocol family")]
    UnsupportedFamily,
}

const SIGNATURE: &str = "PROXY";

/// Parse one CRLF-terminated PROXY protocol v1 header line (the ASCII
/// variant; no v2 binary support, per §6's stated scope). `line` must
/// already have the trailing CRLF stripped, matching what
/// [`crate::frame::FrameCodec`] hands the caller.
pub fn parse_proxy_v1_line(line: &str) -> Result<ProxiedAddr, ProxyProtocolError> {
    let mut parts = line.split(' ');
    if parts.next() != Some(SIGNATURE) {
        return Err(ProxyProtocolError::NotProxyLine);
    }

    let family = parts.next().ok_or(ProxyProtocolError::Malformed)?;
    match family {
        "TCP4" | "TCP6" => {}
        "UNKNOWN" => return Err(ProxyProtocolError::UnsupportedFamily),
        _ => return Err(ProxyProtocolError::UnsupportedFamily),
    }

    let src_ip: IpAddr = parts.next().ok_or(ProxyProtocolError::Malformed)?.parse().map_err(|_| ProxyProtocolError::Malformed)?;
    let dst_ip: IpAddr = parts.next().ok_or(ProxyProtocolError::Malformed)?.parse().map_err(|_| ProxyProtocolError::Malformed)?;
    let src_port: u16 = parts.next().ok_or(ProxyProtocolError::Malformed)?.parse().map_err(|_| ProxyProtocolError::Malformed)?;
    let dst_port: u16 = parts.next().ok_or(ProxyProtocolError::Malformed)?.parse().map_err(|_| ProxyProtocolError::Malformed)?;

    if parts.next().is_some() {
        return Err(ProxyProtocolError::Malformed);
    }

    Ok(ProxiedAddr {
        source: SocketAddr::new(src_ip, src_port),
        destination: SocketAddr::new(dst_ip, dst_port),
    })
}
