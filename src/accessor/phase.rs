use std::collections::HashSet;
use std::fmt;

/// What the creator of an object allows default-value writes to touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructionPolicy {
    pub accept_defaults: bool,
    pub excluded_fields: HashSet<String>,
}

impl ConstructionPolicy {
    pub fn accepting_defaults() -> Self {
        Self {
            accept_defaults: true,
            excluded_fields: HashSet::new(),
        }
    }

    pub fn excluding<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Whether a default-value write to `field` goes through.
    pub fn admits(&self, field: &str) -> bool {
        self.accept_defaults && !self.excluded_fields.contains(field)
    }
}

/// Lifecycle of a managed object.
///
/// ```text
/// UnderConstruction --finish_construction--> Live --invalidate--> Invalid
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    UnderConstruction(ConstructionPolicy),
    Live,
    Invalid,
}

impl Phase {
    pub fn is_under_construction(&self) -> bool {
        matches!(self, Self::UnderConstruction(_))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnderConstruction(_) => write!(f, "UNDER_CONSTRUCTION"),
            Self::Live => write!(f, "LIVE"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_admits() {
        let policy = ConstructionPolicy::accepting_defaults().excluding(["dog"]);
        assert!(policy.admits("name"));
        assert!(!policy.admits("dog"));
        assert!(!ConstructionPolicy::default().admits("name"));
    }
}
