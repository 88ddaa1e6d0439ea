use derive_more::{Display, From};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier of a measurement vantage point. Probe ids are the object keys
/// of the input JSON files and stay opaque strings throughout.
pub type ProbeId = String;

/// One step on an AS-path: either an AS number or a short marker string
/// (an IXP name, or one of the special markers that get filtered out).
///
/// The untagged serde representation keeps AS numbers as JSON numbers and
/// marker strings as JSON strings, matching the raw traceroute files. The
/// derived ordering (numbers first, then names) is what set-valued
/// attributes are sorted by when emitted as arrays.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize,
)]
#[serde(untagged)]
pub enum Hop {
    #[display(fmt = "{}", _0)]
    Asn(u64),
    #[display(fmt = "{}", _0)]
    Name(String),
}

lazy_static! {
    /// Marker strings that must never enter the graph. AS-path entries that
    /// could not be resolved to a public AS number are rendered as one of
    /// these by the upstream traceroute processing.
    static ref EXCLUDED_HOPS: HashSet<&'static str> = [
        "",
        "Invalid IP address",
        "this",
        "private",
        "CGN",
        "host",
        "linklocal",
        "TEST-NET-1",
        "TEST-NET-2",
        "TEST-NET-3",
        "benchmark",
        "6to4",
        "multicast",
        "future",
        "broadcast",
    ]
    .into_iter()
    .collect();
}

impl Hop {
    /// Parses a CLI-provided hop value: all-digit strings become AS numbers,
    /// anything else is kept as a name.
    pub fn parse(s: &str) -> Hop {
        match s.parse::<u64>() {
            Ok(asn) => Hop::Asn(asn),
            Err(_) => Hop::Name(s.to_owned()),
        }
    }

    /// Whether this hop is on the blocklist of marker strings. Numeric hops
    /// are never excluded.
    pub fn is_excluded(&self) -> bool {
        match self {
            Hop::Asn(_) => false,
            Hop::Name(name) => EXCLUDED_HOPS.contains(name.as_str()),
        }
    }

    pub fn is_name(&self) -> bool {
        matches!(self, Hop::Name(_))
    }
}

impl From<&str> for Hop {
    fn from(s: &str) -> Hop {
        Hop::Name(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_hops_as_asn() {
        assert_eq!(Hop::parse("1124"), Hop::Asn(1124));
        assert_eq!(Hop::parse("ams-ix"), Hop::Name("ams-ix".to_owned()));
    }

    #[test]
    fn excludes_only_listed_markers() {
        assert!(Hop::from("private").is_excluded());
        assert!(Hop::from("").is_excluded());
        assert!(Hop::from("TEST-NET-2").is_excluded());
        assert!(!Hop::from("ams-ix").is_excluded());
        assert!(!Hop::Asn(0).is_excluded());
    }

    #[test]
    fn asns_order_before_names() {
        let mut hops = vec![Hop::from("ix"), Hop::Asn(30), Hop::Asn(2), Hop::from("ams")];
        hops.sort();
        assert_eq!(
            hops,
            vec![Hop::Asn(2), Hop::Asn(30), Hop::from("ams"), Hop::from("ix")]
        );
    }

    #[test]
    fn untagged_serde_keeps_json_shape() {
        let path: Vec<Hop> = serde_json::from_str(r#"[1124, "ams-ix", 3356]"#).unwrap();
        assert_eq!(path, vec![Hop::Asn(1124), Hop::from("ams-ix"), Hop::Asn(3356)]);
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"[1124,"ams-ix",3356]"#);
    }
}
