//! Line-oriented output parsing
//!
//! Backend tools print human-readable tables and descriptors. Each parser
//! matches only the line shapes it knows and ignores everything else.

use chrono::NaiveDateTime;

const LEASE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Trimmed, non-empty lines
pub fn output_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// First non-empty line, if any
pub fn first_line(text: &str) -> Option<&str> {
    output_lines(text).into_iter().next()
}

/// Extract `key <sep> value` pairs, stripping surrounding quotes from values
///
/// Lines without the separator or with an empty key are skipped.
pub fn key_values<'a>(text: &'a str, sep: &str) -> Vec<(&'a str, &'a str)> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(sep)?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key, unquote(value.trim())))
        })
        .collect()
}

/// Look up a single key in `key <sep> value` text
pub fn lookup<'a>(text: &'a str, sep: &str, key: &str) -> Option<&'a str> {
    key_values(text, sep)
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Generated MAC address of the first NIC in a `.vmx` descriptor
pub fn vmx_mac_address(vmx: &str) -> Option<String> {
    lookup(vmx, "=", "ethernet0.generatedAddress")
        .filter(|mac| !mac.is_empty())
        .map(|mac| mac.to_lowercase())
}

/// One block of an ISC dhcpd lease file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub ip: String,
    pub mac: Option<String>,
    pub ends: Option<NaiveDateTime>,
}

/// Parse `lease <ip> { ... }` blocks
pub fn dhcp_leases(text: &str) -> Vec<DhcpLease> {
    let mut leases = Vec::new();
    let mut current: Option<DhcpLease> = None;

    for line in text.lines().map(str::trim) {
        if let Some(ip) = line
            .strip_prefix("lease ")
            .and_then(|rest| rest.strip_suffix('{'))
        {
            if let Some(lease) = current.take() {
                leases.push(lease);
            }
            current = Some(DhcpLease {
                ip: ip.trim().to_string(),
                mac: None,
                ends: None,
            });
            continue;
        }

        let Some(lease) = current.as_mut() else {
            continue;
        };

        if line == "}" {
            if let Some(lease) = current.take() {
                leases.push(lease);
            }
        } else if let Some(mac) = statement(line, "hardware ethernet ") {
            lease.mac = Some(mac.to_lowercase());
        } else if let Some(ends) = statement(line, "ends ") {
            lease.ends = parse_lease_time(ends);
        }
    }

    if let Some(lease) = current {
        leases.push(lease);
    }
    leases
}

/// IP of the most recent lease held by `mac`
///
/// When several leases match, the one ending last wins.
pub fn lease_ip_for_mac(text: &str, mac: &str) -> Option<String> {
    let mac = mac.to_lowercase();
    dhcp_leases(text)
        .into_iter()
        .filter(|lease| lease.mac.as_deref() == Some(mac.as_str()))
        .max_by_key(|lease| lease.ends)
        .map(|lease| lease.ip)
}

/// Body of a `keyword value;` statement
fn statement<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    line.strip_prefix(keyword)?.strip_suffix(';').map(str::trim)
}

/// `ends 4 2014/09/18 10:30:00` has a weekday digit before the timestamp
fn parse_lease_time(value: &str) -> Option<NaiveDateTime> {
    let timestamp = match value.split_once(' ') {
        Some((weekday, rest)) if weekday.len() == 1 => rest,
        _ => value,
    };
    NaiveDateTime::parse_from_str(timestamp.trim(), LEASE_TIME_FORMAT).ok()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = r#"
# All times in this file are in UTC (GMT), not your local timezone.
lease 172.16.50.128 {
	starts 4 2014/09/18 10:00:00;
	ends 4 2014/09/18 10:30:00;
	hardware ethernet 00:0c:29:aa:bb:cc;
}
lease 172.16.50.131 {
	starts 4 2014/09/18 11:00:00;
	ends 4 2014/09/18 11:30:00;
	hardware ethernet 00:0C:29:AA:BB:CC;
	client-hostname "boot2docker";
}
lease 172.16.50.140 {
	starts 4 2014/09/18 12:00:00;
	ends 4 2014/09/18 12:30:00;
	hardware ethernet 00:0c:29:11:22:33;
}
"#;

    #[test]
    fn latest_lease_for_mac_wins() {
        assert_eq!(
            lease_ip_for_mac(LEASES, "00:0c:29:aa:bb:cc").as_deref(),
            Some("172.16.50.131")
        );
    }

    #[test]
    fn unknown_mac_has_no_lease() {
        assert_eq!(lease_ip_for_mac(LEASES, "00:00:00:00:00:00"), None);
    }

    #[test]
    fn lease_blocks_are_parsed() {
        let leases = dhcp_leases(LEASES);
        assert_eq!(leases.len(), 3);
        assert_eq!(leases[2].ip, "172.16.50.140");
        assert_eq!(leases[2].mac.as_deref(), Some("00:0c:29:11:22:33"));
        assert!(leases[2].ends.is_some());
    }

    #[test]
    fn vmx_mac_is_extracted_and_lowercased() {
        let vmx = "displayName = \"h1\"\nethernet0.present = \"TRUE\"\nethernet0.generatedAddress = \"00:0C:29:AA:BB:CC\"\n";
        assert_eq!(vmx_mac_address(vmx).as_deref(), Some("00:0c:29:aa:bb:cc"));
    }

    #[test]
    fn vmx_without_generated_address() {
        assert_eq!(vmx_mac_address("displayName = \"h1\"\n"), None);
        assert_eq!(vmx_mac_address("ethernet0.generatedAddress = \"\"\n"), None);
    }

    #[test]
    fn key_values_skip_unrelated_lines() {
        let text = "Name:   h1\nnoise without separator\n  Power state:  poweredOn\n: orphan\n";
        let pairs = key_values(text, ":");
        assert_eq!(pairs, vec![("Name", "h1"), ("Power state", "poweredOn")]);
        assert_eq!(lookup(text, ":", "power state"), Some("poweredOn"));
    }

    #[test]
    fn output_lines_drop_blanks() {
        assert_eq!(output_lines("\n a \n\n b\n"), vec!["a", "b"]);
        assert_eq!(first_line("\n\n x \n"), Some("x"));
        assert_eq!(first_line("  \n"), None);
    }
}
