//! Category selectors with wildcard expansion.

use std::fmt;

/// A parsed category selector.
///
/// | Input | Matches |
/// |-------|---------|
/// | `*` | every category |
/// | `cs.*` | `cs` and every `cs.<sub>` |
/// | `cond-mat*` | every label starting with `cond-mat` |
/// | `q-fin.CP` | exactly `q-fin.CP` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryPattern {
    /// Bare wildcard.
    Any,
    /// `stem.*`: the stem itself or any dotted subcategory.
    Subcategories(String),
    /// `stem*`: any label with this prefix.
    Prefix(String),
    /// No wildcard.
    Exact(String),
}

impl CategoryPattern {
    /// Parses a user-supplied selector. Surrounding whitespace is ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Self::Any;
        }
        if let Some(stem) = trimmed.strip_suffix(".*") {
            return Self::Subcategories(stem.to_string());
        }
        if let Some(stem) = trimmed.strip_suffix('*') {
            return Self::Prefix(stem.to_string());
        }
        Self::Exact(trimmed.to_string())
    }

    /// Returns true when `label` is selected by this pattern.
    #[must_use]
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Subcategories(stem) => {
                label == stem
                    || label
                        .strip_prefix(stem.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
            Self::Prefix(stem) => label.starts_with(stem.as_str()),
            Self::Exact(exact) => label == exact,
        }
    }

    /// Returns true when any of `labels` is selected.
    #[must_use]
    pub fn matches_any<'a>(&self, labels: impl IntoIterator<Item = &'a String>) -> bool {
        matches!(self, Self::Any) || labels.into_iter().any(|label| self.matches(label))
    }

    /// Returns true for the bare wildcard.
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for CategoryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Subcategories(stem) => write!(f, "{stem}.*"),
            Self::Prefix(stem) => write!(f, "{stem}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}
