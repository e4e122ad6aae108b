//! Worker pool identifiers shared between server and clients.

use serde::{Deserialize, Serialize};

/// The two pools a prediction can be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolName {
    /// Accelerator-backed pool, low latency, small capacity.
    Fast,
    /// CPU-backed pool, higher latency.
    Slow,
}

impl PoolName {
    /// All pool variants for iteration.
    pub const ALL: [PoolName; 2] = [PoolName::Fast, PoolName::Slow];

    /// Parse a pool name from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "slow" => Some(Self::Slow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }

    /// The pool a request fails over to.
    pub fn other(&self) -> Self {
        match self {
            Self::Fast => Self::Slow,
            Self::Slow => Self::Fast,
        }
    }
}

impl std::fmt::Display for PoolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of one pool, as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: PoolName,
    pub healthy: bool,
    pub in_flight: usize,
    pub capacity: usize,
    /// Concrete device the pool's model is bound to (e.g. "cuda:0", "cpu").
    pub device: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_name_serialization() {
        let json = serde_json::to_string(&PoolName::Fast).unwrap();
        assert_eq!(json, r#""fast""#);

        let parsed: PoolName = serde_json::from_str(r#""slow""#).unwrap();
        assert_eq!(parsed, PoolName::Slow);
    }

    #[test]
    fn test_pool_name_parse() {
        assert_eq!(PoolName::parse("fast"), Some(PoolName::Fast));
        assert_eq!(PoolName::parse(" SLOW "), Some(PoolName::Slow));
        assert_eq!(PoolName::parse("medium"), None);
    }

    #[test]
    fn test_pool_name_other() {
        assert_eq!(PoolName::Fast.other(), PoolName::Slow);
        assert_eq!(PoolName::Slow.other(), PoolName::Fast);
    }
}
