use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Administrative/general-purpose ports probed on every host.
pub const GENERAL_PORTS: &[u16] = &[20, 21, 22, 23, 25, 80, 139, 443, 445, 554, 587, 8000, 8080, 8888];

/// Well-known streaming/media ports and the service name reported for them.
/// This table takes precedence over whatever name the scanner guesses.
pub const STREAMING_PORTS: &[(u16, &str)] = &[
    (554, "RTSP"),
    (1935, "RTMP"),
    (8080, "HTTP-Alt"),
    (8000, "HTTP-Alt"),
    (443, "HTTPS"),
    (80, "HTTP"),
    (3478, "STUN"),
    (5349, "TURN"),
    (5000, "AirPlay"),
    (5060, "SIP"),
    (5061, "SIP-TLS"),
    (16384, "RTP"),
    (32767, "RTP"),
    (1900, "UPnP"),
    (2869, "DLNA"),
];

pub fn general_ports() -> Vec<u16> {
    GENERAL_PORTS.to_vec()
}

pub fn streaming_ports() -> Vec<u16> {
    STREAMING_PORTS.iter().map(|(p, _)| *p).collect()
}

/// Service name from the streaming table, if the port is listed there.
pub fn streaming_service_name(port: u16) -> Option<&'static str> {
    STREAMING_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

/// Render a port list in the comma-separated form accepted by `nmap -p`.
pub fn to_port_arg(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a port list into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats, per line or comma-separated item:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
/// - whitespace and blank items are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a port list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
