//! Typed view of license feature tokens.
//!
//! Tokens are parsed once when a license is loaded:
//!
//! - `Module:<id>` grants a module
//! - `Tier:<name>` sets the product tier
//! - `Limit:<name>=<value>` sets a numeric limit
//! - `Seats:<n>` is shorthand for `Limit:seats=<n>`
//!
//! Anything else is kept verbatim as a raw flag.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::document::LicenseDocument;

/// One parsed feature token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grant {
    Module(String),
    Tier(String),
    SeatLimit { name: String, value: u32 },
    Raw(String),
}

impl Grant {
    /// Parses one feature token. Malformed typed tokens fall back to `Raw`.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        let Some((tag, rest)) = token.split_once(':') else {
            return Self::Raw(token.to_string());
        };
        let rest = rest.trim();

        match tag.trim().to_ascii_lowercase().as_str() {
            "module" if !rest.is_empty() => Self::Module(rest.to_string()),
            "tier" if !rest.is_empty() => Self::Tier(rest.to_string()),
            "seats" => match rest.parse() {
                Ok(value) => Self::SeatLimit {
                    name: "seats".to_string(),
                    value,
                },
                Err(_) => Self::Raw(token.to_string()),
            },
            "limit" => match rest.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => match value.trim().parse() {
                    Ok(value) => Self::SeatLimit {
                        name: name.trim().to_string(),
                        value,
                    },
                    Err(_) => Self::Raw(token.to_string()),
                },
                _ => Self::Raw(token.to_string()),
            },
            _ => Self::Raw(token.to_string()),
        }
    }
}

/// Aggregated entitlements of a license.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    /// Explicit modules plus `Module:` grants.
    pub modules: BTreeSet<String>,
    pub tier: Option<String>,
    pub limits: BTreeMap<String, u32>,
    /// Feature tokens with no typed meaning.
    pub flags: BTreeSet<String>,
}

impl Entitlements {
    /// Builds entitlements from a document's modules and features.
    #[must_use]
    pub fn from_document(doc: &LicenseDocument) -> Self {
        let mut out = Self {
            modules: doc.modules.clone(),
            ..Self::default()
        };
        for grant in doc.grants() {
            match grant {
                Grant::Module(m) => {
                    out.modules.insert(m);
                }
                Grant::Tier(t) => out.tier = Some(t),
                Grant::SeatLimit { name, value } => {
                    out.limits.insert(name, value);
                }
                Grant::Raw(flag) => {
                    out.flags.insert(flag);
                }
            }
        }
        out.limits
            .entry("seats".to_string())
            .or_insert(doc.product.seat_count);
        out
    }

    #[must_use]
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn limit(&self, name: &str) -> Option<u32> {
        self.limits.get(name).copied()
    }
}
