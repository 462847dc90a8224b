//! AX.25 callsign addresses (spec §3 "Callsign address", §4.1, §6).

use std::fmt;

/// An AX.25 station address: a up-to-6-character alphanumeric base call and
/// an SSID in `0..=15`.
///
/// Equality, hashing and ordering ignore case and surrounding whitespace in
/// the base call, matching the wire encoding which always uppercases and
/// space-pads to 6 bytes.
#[derive(Debug, Clone)]
pub struct Address {
    base: String,
    ssid: u8,
    /// Command/response bit carried on the wire extension byte (spec §6).
    /// Exposed for completeness; routing and link-quality math never
    /// consult it (spec §9 Open Question b).
    pub is_command: bool,
    /// "Has been repeated" bit, meaningful only for digipeater addresses.
    pub has_been_repeated: bool,
}

impl Address {
    /// Build an address from a base call and SSID, clamping the SSID into
    /// `0..=15` (spec §8 boundary behavior).
    pub fn new(base: impl AsRef<str>, ssid: i32) -> Self {
        let base = normalize_base(base.as_ref());
        let ssid = ssid.clamp(0, 15) as u8;
        Self {
            base,
            ssid,
            is_command: false,
            has_been_repeated: false,
        }
    }

    /// Parse `BASE` or `BASE-SSID` display form.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match s.split_once('-') {
            Some((base, ssid)) => {
                let ssid: i32 = ssid.parse().ok()?;
                Some(Self::new(base, ssid))
            }
            None => Some(Self::new(s, 0)),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Base call, uppercased and space-padded to exactly 6 ASCII bytes, as
    /// carried on the wire (spec §4.1).
    pub fn padded_base(&self) -> [u8; 6] {
        let mut out = [b' '; 6];
        for (i, b) in self.base.bytes().take(6).enumerate() {
            out[i] = b;
        }
        out
    }
}

fn normalize_base(s: &str) -> String {
    s.trim().to_ascii_uppercase().chars().take(6).collect()
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.ssid == other.ssid
    }
}
impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.ssid.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}-{}", self.base, self.ssid)
        }
    }
}

/// Reserved/pseudo destinations excluded from link-quality edges (spec §3
/// "Link stat" invariant, §4.5, glossary "Service destination").
pub fn is_service_destination(base: &str) -> bool {
    let base = base.trim().to_ascii_uppercase();
    matches!(base.as_str(), "BEACON" | "ID" | "MAIL" | "CQ" | "APRS")
        || base.starts_with("WIDE")
}

/// An ordered digipeater path, truncated to 8 elements (spec §3, §8).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DigiPath(Vec<Address>);

impl DigiPath {
    pub fn new(addrs: impl IntoIterator<Item = Address>) -> Self {
        Self(addrs.into_iter().take(8).collect())
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DigiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_clamps_to_valid_range() {
        assert_eq!(Address::new("w0tst", 16).ssid(), 15);
        assert_eq!(Address::new("w0tst", -5).ssid(), 0);
    }

    #[test]
    fn equality_ignores_case_and_whitespace() {
        assert_eq!(Address::new(" w0tst ", 1), Address::new("W0TST", 1));
    }

    #[test]
    fn display_omits_zero_ssid() {
        assert_eq!(Address::new("w0tst", 0).to_string(), "W0TST");
        assert_eq!(Address::new("w0tst", 5).to_string(), "W0TST-5");
    }

    #[test]
    fn digi_path_truncates_to_eight() {
        let addrs: Vec<_> = (0..12).map(|i| Address::new(format!("N{i}CALL"), 0)).collect();
        assert_eq!(DigiPath::new(addrs).len(), 8);
    }

    #[test]
    fn service_destination_filter() {
        assert!(is_service_destination("BEACON"));
        assert!(is_service_destination("WIDE2-1"));
        assert!(!is_service_destination("W0TST"));
    }
}
