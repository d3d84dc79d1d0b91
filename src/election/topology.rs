//! Topology Snapshots
//!
//! Candidate node names are `<prefix>-<sequence>`, where the sequence is
//! assigned by the coordination service. The sequence is everything after
//! the last `-` and is compared numerically, never as a string.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between a candidate's label and its sequence number
pub const SEQUENCE_SEPARATOR: char = '-';

/// Extract the sequence number from a candidate node name
pub fn parse_sequence(name: &str) -> Result<u64> {
    let idx = name.rfind(SEQUENCE_SEPARATOR).ok_or_else(|| Error::Parse {
        name: name.to_string(),
        reason: "no sequence separator".into(),
    })?;

    let digits = &name[idx + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse {
            name: name.to_string(),
            reason: format!("sequence {:?} is not a base-10 integer", digits),
        });
    }

    digits.parse::<u64>().map_err(|e| Error::Parse {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Ordered membership of an election group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology(Vec<String>);

impl Topology {
    /// Sort raw children by sequence number.
    ///
    /// Fails on the first name without a parseable sequence.
    pub fn from_children(children: Vec<String>) -> Result<Self> {
        let mut keyed = children
            .into_iter()
            .map(|name| parse_sequence(&name).map(|seq| (seq, name)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort();

        Ok(Self(keyed.into_iter().map(|(_, name)| name).collect()))
    }

    /// Position of a candidate in the order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    /// Candidate at `rank`
    pub fn get(&self, rank: usize) -> Option<&str> {
        self.0.get(rank).map(String::as_str)
    }

    /// The lowest-numbered candidate
    pub fn leader(&self) -> Option<&str> {
        self.get(0)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("-0000000007").unwrap(), 7);
        assert_eq!(parse_sequence("voter-0000000012").unwrap(), 12);
        // Dashes inside the label belong to the label
        assert_eq!(parse_sequence("us-east-1-0000000003").unwrap(), 3);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_sequence("nodash"), Err(Error::Parse { .. })));
        assert!(matches!(parse_sequence("voter-"), Err(Error::Parse { .. })));
        assert!(matches!(parse_sequence("voter-12a"), Err(Error::Parse { .. })));
        assert!(matches!(parse_sequence("voter-+12"), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_numeric_order() {
        // "10" sorts before "9" as a string
        let topology = Topology::from_children(names(&["a-10", "b-9", "c-100"])).unwrap();
        assert_eq!(topology.names(), &names(&["b-9", "a-10", "c-100"])[..]);
        assert_eq!(topology.leader(), Some("b-9"));
    }

    #[test]
    fn test_order_ignores_prefix() {
        let topology = Topology::from_children(names(&[
            "VOTER_0-0000000002",
            "VOTER_2-0000000000",
            "VOTER_1-0000000001",
        ]))
        .unwrap();

        assert_eq!(topology.position("VOTER_2-0000000000"), Some(0));
        assert_eq!(topology.position("VOTER_0-0000000002"), Some(2));
        assert_eq!(topology.position("missing-1"), None);
        assert_eq!(topology.len(), 3);
    }

    #[test]
    fn test_malformed_child_fails_whole_snapshot() {
        let result = Topology::from_children(names(&["a-1", "lock", "b-2"]));
        assert!(matches!(result, Err(Error::Parse { ref name, .. }) if name == "lock"));
    }

    #[test]
    fn test_empty() {
        let topology = Topology::from_children(Vec::new()).unwrap();
        assert!(topology.is_empty());
        assert_eq!(topology.leader(), None);
        assert_eq!(topology.to_string(), "[]");
    }
}
