use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Dotted-integer version (`14.5`, `1.2.10`), ordered component by
/// component from the left. A shorter prefix sorts before a longer one:
/// `14.5 < 14.5.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(Vec<u64>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version {0:?}")]
pub struct ParseVersionError(pub String);

impl Version {
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        if body.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }
        body.split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| ParseVersionError(s.to_string()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// `a > b` on dotted-integer strings. Unparseable input compares as `0`.
pub fn version_greater_than(a: &str, b: &str) -> bool {
    let key = |s: &str| s.parse::<Version>().unwrap_or(Version(vec![0]));
    key(a) > key(b)
}
