use std::collections::BTreeMap;
use std::fmt;

/// Byte attribution keyed by bucket name (a dex section, an elf section or a
/// contributing source file).
pub type SizeMap = BTreeMap<String, u64>;

/// A single size difference between two versions of a logical unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    /// Slash-joined logical path, including nested archive segments.
    pub name: String,
    /// Size in the old version, zero if absent.
    pub a_size: u64,
    /// Size in the new version, zero if absent.
    pub b_size: u64,
}

impl Delta {
    pub fn new(name: impl Into<String>, a_size: u64, b_size: u64) -> Self {
        Self {
            name: name.into(),
            a_size,
            b_size,
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a_size > self.b_size {
            write!(f, "-{} {}", self.a_size - self.b_size, self.name)
        } else {
            write!(f, "+{} {}", self.b_size - self.a_size, self.name)
        }
    }
}
