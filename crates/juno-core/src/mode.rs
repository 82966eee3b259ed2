//! Render strategy selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JunoError;

/// Which DOM update strategy the renderer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// One independent binding per dynamic property; children are cleared
    /// and rebuilt on every re-run. Never reuses nodes.
    #[default]
    FineGrained,
    /// Nodes are cached by key and reused; reactive children lists are
    /// reconciled by key.
    #[serde(alias = "optimized")]
    Batch,
}

impl RenderMode {
    /// The configuration spelling of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FineGrained => "fine-grained",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = JunoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fine-grained" | "fine_grained" | "finegrained" => Ok(Self::FineGrained),
            "batch" | "optimized" => Ok(Self::Batch),
            other => Err(JunoError::UnknownRenderMode(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_spellings() {
        assert_eq!("fine-grained".parse::<RenderMode>().ok(), Some(RenderMode::FineGrained));
        assert_eq!("optimized".parse::<RenderMode>().ok(), Some(RenderMode::Batch));
        assert!("eager".parse::<RenderMode>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&RenderMode::FineGrained).unwrap_or_default();
        assert_eq!(json, "\"fine-grained\"");
        let mode: RenderMode = serde_json::from_str("\"batch\"").unwrap_or_default();
        assert_eq!(mode, RenderMode::Batch);
    }
}
