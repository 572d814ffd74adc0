//! Stable function identity
//!
//! Every registry in the control plane (hijackers, metrics, analyses,
//! catalog) is keyed by `FunctionIdentity`, never by pointer identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable `(module, qualname)` key for a callable.
///
/// Displays as `module::qualname`. The textual form accepted by `parse`
/// also tolerates dotted paths so MCP clients can pass `pkg.mod.func`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionIdentity {
    pub module: String,
    pub qualname: String,
}

impl FunctionIdentity {
    pub fn new(module: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualname: qualname.into(),
        }
    }

    /// Parse a full name of the form `module::qualname` or `module.qualname`.
    ///
    /// The last separator splits module from qualname; a bare name yields an
    /// empty module.
    pub fn parse(full_name: &str) -> Self {
        if let Some(idx) = full_name.rfind("::") {
            return Self::new(&full_name[..idx], &full_name[idx + 2..]);
        }
        if let Some(idx) = full_name.rfind('.') {
            return Self::new(&full_name[..idx], &full_name[idx + 1..]);
        }
        Self::new("", full_name)
    }

    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            write!(f, "{}", self.qualname)
        } else {
            write!(f, "{}::{}", self.module, self.qualname)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_double_colon_form() {
        let id = FunctionIdentity::parse("billing::charge_card");
        assert_eq!(id.module, "billing");
        assert_eq!(id.qualname, "charge_card");
    }

    #[test]
    fn parse_dotted_form() {
        let id = FunctionIdentity::parse("app.services.billing.charge_card");
        assert_eq!(id.module, "app.services.billing");
        assert_eq!(id.qualname, "charge_card");
    }

    #[test]
    fn parse_nested_path_keeps_last_segment() {
        let id = FunctionIdentity::parse("app::billing::charge_card");
        assert_eq!(id.module, "app::billing");
        assert_eq!(id.qualname, "charge_card");
    }

    #[test]
    fn parse_bare_name() {
        let id = FunctionIdentity::parse("charge_card");
        assert_eq!(id.module, "");
        assert_eq!(id.qualname, "charge_card");
        assert_eq!(id.to_string(), "charge_card");
    }

    #[test]
    fn display_round_trips() {
        let id = FunctionIdentity::new("billing", "charge_card");
        assert_eq!(FunctionIdentity::parse(&id.to_string()), id);
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(FunctionIdentity::new("m", "f"), 1u32);
        assert_eq!(map.get(&FunctionIdentity::new("m", "f")), Some(&1));
    }
}
