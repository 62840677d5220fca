use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Largest network accepted as a single target entry (a /16).
pub const MAX_HOSTS_PER_ENTRY: u64 = 1 << 16;

/// Parse a target selection into individual host addresses.
///
/// Entries are separated by commas, whitespace or newlines and may be a
/// plain IP (`10.0.0.5`, `::1`) or an IPv4 CIDR (`192.168.1.0/24`). Networks
/// exclude their network and broadcast addresses; IPv6 networks are rejected.
/// `#` starts a comment.
pub fn parse_targets(s: &str) -> Result<Vec<IpAddr>> {
    let mut out = Vec::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("");
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let hosts = parse_target(token)
                .with_context(|| format!("line {}: invalid target `{token}`", idx + 1))?;
            out.extend(hosts);
        }
    }
    Ok(out)
}

/// Resolve a `--targets` argument: an existing file is read and parsed,
/// anything else is parsed as an inline list.
pub fn load_targets(arg: &str) -> Result<Vec<IpAddr>> {
    let path = Path::new(arg);
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read targets file: {}", path.display()))?;
        return parse_targets(&content);
    }
    parse_targets(arg)
}

fn parse_target(token: &str) -> Result<Vec<IpAddr>> {
    if token.contains('/') {
        let net: IpNet = token.parse()?;
        match net {
            IpNet::V4(n4) => {
                let size = 1u64 << (32 - n4.prefix_len());
                anyhow::ensure!(
                    size <= MAX_HOSTS_PER_ENTRY,
                    "network {n4} is larger than /16"
                );
            }
            IpNet::V6(n6) => {
                anyhow::bail!("IPv6 network {n6} cannot be expanded; list its hosts individually")
            }
        }
        return Ok(expand_cidr_to_ips(net));
    }
    Ok(vec![token.parse::<IpAddr>()?])
}

/// Local non-loopback IPv4 addresses, each widened to its /24.
pub fn detect_local_cidrs() -> Result<Vec<IpNet>> {
    let nets: BTreeSet<Ipv4Net> = get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) if !v4.ip.is_loopback() => Some(ipv4_to_default_cidr(v4.ip)),
            _ => None,
        })
        .collect();
    Ok(nets.into_iter().map(IpNet::V4).collect())
}

/// Host addresses of `cidr`, without network and broadcast addresses for
/// prefixes shorter than /31. IPv6 networks expand to nothing.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => n4.hosts().map(IpAddr::V4).collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).expect("/24 is always valid")
}
