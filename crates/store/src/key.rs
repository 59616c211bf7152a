use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Process-unique identifier for a deck: the path of its backing file.
///
/// Keys compare by value and stay stable for the lifetime of a handle.
/// Nothing in the lifecycle layer ever interprets the path; it is only a
/// map key and a log field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckKey(PathBuf);

impl DeckKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DeckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for DeckKey {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for DeckKey {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for DeckKey {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl From<&str> for DeckKey {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_value() {
        assert_eq!(DeckKey::from("decks/french.anki"), DeckKey::new("decks/french.anki"));
        assert_ne!(DeckKey::from("decks/french.anki"), DeckKey::from("decks/german.anki"));
    }

    #[test]
    fn test_display_matches_path() {
        let key = DeckKey::from("decks/french.anki");
        assert_eq!(key.to_string(), Path::new("decks/french.anki").display().to_string());
    }
}
