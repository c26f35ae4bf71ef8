//! The signed license document.
//!
//! Field order in these structs is the canonical order used as signature
//! input. Reordering or renaming a field invalidates every issued signature,
//! so such a change requires a new [`FORMAT_VERSION`].

use std::collections::{BTreeMap, BTreeSet};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LicenseError, LicenseResult};
use crate::grants::{Entitlements, Grant};

/// Format version written by this engine.
pub const FORMAT_VERSION: &str = "1.0";

/// Default grace period after expiry, in days.
pub const DEFAULT_GRACE_PERIOD_DAYS: u32 = 14;

/// Default maximum offline window, in days.
pub const DEFAULT_OFFLINE_MAX_DAYS: u32 = 30;

/// Default number of fingerprints that must match.
pub const DEFAULT_MATCH_THRESHOLD: usize = 3;

/// Upper bound on fingerprints a binding can carry.
pub const MAX_FINGERPRINTS: usize = 7;

/// Maximum decoded size of an embedded brand logo.
pub const MAX_BRAND_LOGO_BYTES: usize = 64 * 1024;

/// Kind of subscription a license was sold under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    Trial,
    Monthly,
    Yearly,
    /// Never expires; `expiresAt` is ignored.
    Lifetime,
    /// Fixed-term project license.
    Project,
}

impl SubscriptionKind {
    /// Default term length in days, or None for lifetime.
    #[must_use]
    pub fn default_term_days(&self) -> Option<i64> {
        match self {
            Self::Trial => Some(30),
            Self::Monthly => Some(30),
            Self::Yearly => Some(365),
            Self::Lifetime => None,
            Self::Project => Some(90),
        }
    }

    #[must_use]
    pub fn is_lifetime(&self) -> bool {
        matches!(self, Self::Lifetime)
    }
}

/// Who the license is issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            company_id: None,
            address: None,
            phone: None,
            customer_id: None,
        }
    }
}

/// The licensed product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub name: String,
    pub edition: String,
    /// Highest major version the license covers.
    pub major_version: u32,
    pub seat_count: u32,
}

impl ProductInfo {
    pub fn new(name: impl Into<String>, edition: impl Into<String>, major_version: u32) -> Self {
        Self {
            name: name.into(),
            edition: edition.into(),
            major_version,
            seat_count: 1,
        }
    }

    /// Returns true if a build with the given major version is covered.
    #[must_use]
    pub fn covers_major_version(&self, major: u32) -> bool {
        major <= self.major_version
    }
}

/// Validity window and offline rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseTerms {
    #[serde(with = "timestamp")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(
        default,
        with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub activated_at: Option<DateTime<Utc>>,
    pub subscription: SubscriptionKind,
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
    #[serde(default = "default_true")]
    pub allow_offline: bool,
    #[serde(default = "default_offline_max_days")]
    pub offline_max_days: u32,
}

impl LicenseTerms {
    /// Terms starting at `issued_at` with the subscription's default length.
    #[must_use]
    pub fn new(subscription: SubscriptionKind, issued_at: DateTime<Utc>) -> Self {
        let days = subscription.default_term_days().unwrap_or(0);
        Self {
            issued_at,
            expires_at: issued_at + Duration::days(days),
            activated_at: None,
            subscription,
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            allow_offline: true,
            offline_max_days: DEFAULT_OFFLINE_MAX_DAYS,
        }
    }

    /// Expiry instant, or None for lifetime licenses.
    #[must_use]
    pub fn effective_expiry(&self) -> Option<DateTime<Utc>> {
        if self.subscription.is_lifetime() {
            None
        } else {
            Some(self.expires_at)
        }
    }
}

/// Hardware binding attached to a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareBinding {
    #[serde(default)]
    pub hardware_fingerprints: Vec<String>,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    /// Require every stored fingerprint to match.
    #[serde(default)]
    pub strict_binding: bool,
}

impl Default for HardwareBinding {
    fn default() -> Self {
        Self {
            hardware_fingerprints: Vec::new(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            machine_guid: None,
            machine_name: None,
            strict_binding: false,
        }
    }
}

impl HardwareBinding {
    /// Binding over `fingerprints` requiring `threshold` matches.
    #[must_use]
    pub fn new(fingerprints: Vec<String>, threshold: usize) -> Self {
        Self {
            hardware_fingerprints: fingerprints,
            match_threshold: threshold,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.hardware_fingerprints.is_empty()
    }

    /// Number of matches required, accounting for strict binding.
    #[must_use]
    pub fn required_matches(&self) -> usize {
        if self.strict_binding {
            self.hardware_fingerprints.len()
        } else {
            self.match_threshold
        }
    }
}

/// A license document. Immutable once signed: any change invalidates
/// `signature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDocument {
    /// License id, `LIC-YYYY-NNNN`.
    pub id: String,
    pub format_version: String,
    pub client: ClientInfo,
    pub product: ProductInfo,
    pub terms: LicenseTerms,
    #[serde(default)]
    pub binding: HardwareBinding,
    #[serde(default)]
    pub modules: BTreeSet<String>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Two characters from `[A-Z0-9]`, prefixes downstream certificate ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensee_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_code: Option<String>,
    /// Base64 image data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_logo: Option<String>,
    /// Base64 ECDSA P-256 signature; empty while unsigned.
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub public_key_id: String,
}

impl LicenseDocument {
    /// Unsigned, unbound document with default options.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client: ClientInfo,
        product: ProductInfo,
        terms: LicenseTerms,
    ) -> Self {
        Self {
            id: id.into(),
            format_version: FORMAT_VERSION.to_string(),
            client,
            product,
            terms,
            binding: HardwareBinding::default(),
            modules: BTreeSet::new(),
            features: BTreeSet::new(),
            metadata: BTreeMap::new(),
            brand: None,
            licensee_code: None,
            support_code: None,
            brand_logo: None,
            signature: String::new(),
            public_key_id: String::new(),
        }
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Parses `features` into typed grants.
    #[must_use]
    pub fn grants(&self) -> Vec<Grant> {
        self.features.iter().map(|f| Grant::parse(f)).collect()
    }

    /// Modules, tier and limits granted by this license.
    #[must_use]
    pub fn entitlements(&self) -> Entitlements {
        Entitlements::from_document(self)
    }

    /// Checks issuance rules that the type system does not enforce.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` naming the first violated rule.
    pub fn check_shape(&self) -> LicenseResult<()> {
        if !is_valid_license_id(&self.id) {
            return Err(invalid(format!("license id {:?} is not LIC-YYYY-NNNN", self.id)));
        }
        if self.client.name.trim().is_empty() {
            return Err(invalid("client name is empty"));
        }
        if self.product.name.trim().is_empty() {
            return Err(invalid("product name is empty"));
        }
        if self.product.seat_count == 0 {
            return Err(invalid("seat count must be at least 1"));
        }

        let binding = &self.binding;
        if binding.hardware_fingerprints.len() > MAX_FINGERPRINTS {
            return Err(invalid(format!(
                "binding holds {} fingerprints, at most {MAX_FINGERPRINTS} allowed",
                binding.hardware_fingerprints.len()
            )));
        }
        if binding.is_bound()
            && (binding.match_threshold == 0
                || binding.match_threshold > binding.hardware_fingerprints.len())
        {
            return Err(invalid(format!(
                "match threshold {} outside 1..={}",
                binding.match_threshold,
                binding.hardware_fingerprints.len()
            )));
        }

        if let Some(code) = &self.licensee_code {
            if !is_valid_licensee_code(code) {
                return Err(invalid(format!("licensee code {code:?} must be two of [A-Z0-9]")));
            }
        }

        if let Some(logo) = &self.brand_logo {
            let bytes = BASE64
                .decode(logo)
                .map_err(|e| invalid(format!("brand logo is not base64: {e}")))?;
            if bytes.len() > MAX_BRAND_LOGO_BYTES {
                return Err(invalid(format!(
                    "brand logo is {} bytes, limit is {MAX_BRAND_LOGO_BYTES}",
                    bytes.len()
                )));
            }
        }

        Ok(())
    }
}

/// Returns true for ids shaped `LIC-YYYY-NNNN`.
#[must_use]
pub fn is_valid_license_id(id: &str) -> bool {
    let mut parts = id.split('-');
    let digits = |s: Option<&str>| s.is_some_and(|s| s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()));
    parts.next() == Some("LIC") && digits(parts.next()) && digits(parts.next()) && parts.next().is_none()
}

/// Returns true for exactly two characters from `[A-Z0-9]`.
#[must_use]
pub fn is_valid_licensee_code(code: &str) -> bool {
    code.len() == 2
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// RFC 3339 timestamps in UTC with a `Z` suffix. Input is accepted only in
/// the exact form written, so two spellings of one instant cannot share a
/// signature.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    fn render(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn parse<E: serde::de::Error>(text: &str) -> Result<DateTime<Utc>, E> {
        let at = DateTime::parse_from_rfc3339(text)
            .map_err(E::custom)?
            .with_timezone(&Utc);
        if render(&at) != text {
            return Err(E::custom(format!(
                "timestamp {text:?} is not written as {:?}",
                render(&at)
            )));
        }
        Ok(at)
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&render(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        parse(&text)
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => super::serialize(at, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|text| parse(&text))
                .transpose()
        }
    }
}

fn invalid(msg: impl Into<String>) -> LicenseError {
    LicenseError::InvalidDocument(msg.into())
}

fn default_grace_period_days() -> u32 {
    DEFAULT_GRACE_PERIOD_DAYS
}

fn default_offline_max_days() -> u32 {
    DEFAULT_OFFLINE_MAX_DAYS
}

fn default_match_threshold() -> usize {
    DEFAULT_MATCH_THRESHOLD
}

fn default_true() -> bool {
    true
}
