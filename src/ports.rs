use crate::lookup::PortLookup;
use crate::types::{PortInfo, Protocol};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Parse a port selection into a deduplicated list, keeping first-seen order.
///
/// Entries are separated by commas, whitespace or newlines. Each entry is a
/// single port (`80`) or an inclusive range (`8000-8010`). Anything after `#`
/// on a line is a comment.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let (start, end) = parse_entry(token)
                .with_context(|| format!("line {line_no}: invalid port entry `{token}`"))?;
            for port in start..=end {
                if seen.insert(port) {
                    out.push(port);
                }
            }
        }
    }

    Ok(out)
}

/// Resolve a `--ports` argument: an existing file is read and parsed,
/// anything else is parsed as an inline list.
pub fn load_ports(arg: &str) -> Result<Vec<u16>> {
    let path = Path::new(arg);
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ports file: {}", path.display()))?;
        return parse_port_list(&content);
    }
    parse_port_list(arg)
}

fn parse_entry(token: &str) -> Result<(u16, u16)> {
    match token.split_once('-') {
        Some((a, b)) => {
            let start = parse_port(a)?;
            let end = parse_port(b)?;
            if start > end {
                bail!("range {start}-{end} runs backwards");
            }
            Ok((start, end))
        }
        None => {
            let p = parse_port(token)?;
            Ok((p, p))
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.trim().parse().with_context(|| format!("not a number: `{s}`"))?;
    if val == 0 || val > u16::MAX as u32 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

/// Common TCP services: (port, service, description).
const WELL_KNOWN: &[(u16, &str, &str)] = &[
    (21, "ftp", "File Transfer Protocol"),
    (22, "ssh", "Secure Shell"),
    (23, "telnet", "Telnet"),
    (25, "smtp", "Simple Mail Transfer Protocol"),
    (53, "domain", "Domain Name System"),
    (80, "http", "Hypertext Transfer Protocol"),
    (110, "pop3", "Post Office Protocol v3"),
    (135, "msrpc", "Microsoft RPC endpoint mapper"),
    (139, "netbios-ssn", "NetBIOS session service"),
    (143, "imap", "Internet Message Access Protocol"),
    (389, "ldap", "Lightweight Directory Access Protocol"),
    (443, "https", "HTTP over TLS"),
    (445, "microsoft-ds", "SMB over TCP"),
    (587, "submission", "Mail message submission"),
    (993, "imaps", "IMAP over TLS"),
    (995, "pop3s", "POP3 over TLS"),
    (1433, "ms-sql-s", "Microsoft SQL Server"),
    (1883, "mqtt", "MQTT broker"),
    (3306, "mysql", "MySQL"),
    (3389, "ms-wbt-server", "Remote Desktop Protocol"),
    (5432, "postgresql", "PostgreSQL"),
    (5672, "amqp", "Advanced Message Queuing Protocol"),
    (5900, "vnc", "Virtual Network Computing"),
    (6379, "redis", "Redis"),
    (8080, "http-proxy", "HTTP alternate"),
    (8443, "https-alt", "HTTPS alternate"),
    (9200, "elasticsearch", "Elasticsearch REST"),
    (11211, "memcache", "Memcached"),
    (27017, "mongodb", "MongoDB"),
];

/// Ports scanned when none are given.
pub fn default_ports() -> Vec<u16> {
    WELL_KNOWN.iter().map(|&(port, _, _)| port).collect()
}

/// Static TCP service table.
#[derive(Debug, Clone, Copy, Default)]
pub struct WellKnownPorts;

impl PortLookup for WellKnownPorts {
    fn lookup(&self, port: u16, protocol: Protocol) -> Option<PortInfo> {
        if protocol != Protocol::Tcp {
            return None;
        }
        WELL_KNOWN
            .iter()
            .find(|&&(p, _, _)| p == port)
            .map(|&(port, service, description)| PortInfo {
                port,
                protocol,
                service: service.to_string(),
                description: description.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_list_with_ranges() {
        let ports = parse_port_list("22, 80,8000-8002 443").unwrap();
        assert_eq!(ports, vec![22, 80, 8000, 8001, 8002, 443]);
    }

    #[test]
    fn overlapping_entries_are_deduplicated() {
        let ports = parse_port_list("8000-8002\n80\n8001\n").unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80]);
    }

    #[test]
    fn backwards_range_is_rejected() {
        assert!(parse_port_list("90-80").is_err());
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(parse_port_list("70000").is_err());
        assert!(parse_port_list("0").is_err());
    }

    #[test]
    fn lookup_annotates_tcp_only() {
        let info = WellKnownPorts.lookup(22, Protocol::Tcp).unwrap();
        assert_eq!(info.service, "ssh");
        assert!(WellKnownPorts.lookup(22, Protocol::Udp).is_none());
        assert!(WellKnownPorts.lookup(1, Protocol::Tcp).is_none());
    }

    #[test]
    fn defaults_cover_the_table() {
        let d = default_ports();
        assert!(d.contains(&80) && d.contains(&443));
        assert_eq!(d.len(), WELL_KNOWN.len());
    }
}
