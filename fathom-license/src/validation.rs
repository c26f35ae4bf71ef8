//! License validation state machine.
//!
//! Checks run in a fixed order and the first failure decides the status:
//!
//! 1. no content                         -> `NotFound`
//! 2. content does not decode            -> `Corrupted`
//! 3. unsupported `formatVersion`        -> `VersionNotSupported`
//! 4. signature does not verify          -> `InvalidSignature`
//! 5. license is for another product     -> `ProductMismatch`
//! 6. revoked by the issuer              -> `Revoked`
//! 7. hardware binding does not match    -> `HardwareMismatch`
//! 8. dates                              -> `Valid`, `GracePeriod` or `Expired`
//!
//! Every call starts again at step 1; nothing is cached between calls.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::binding::{FuzzyBindingMatcher, MatchReport};
use crate::codec;
use crate::document::LicenseDocument;
use crate::error::LicenseError;
use crate::grants::Entitlements;
use crate::hardware::FingerprintSet;
use crate::signing::{KeyRing, PublicKeyResolver, SignatureEngine};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Outcome of a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    /// Expired, but still usable until the grace period runs out.
    GracePeriod,
    Expired,
    Revoked,
    InvalidSignature,
    HardwareMismatch,
    ProductMismatch,
    NotFound,
    Corrupted,
    VersionNotSupported,
}

impl ValidationStatus {
    /// Returns true if the licensed product may run (Valid or GracePeriod).
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid | Self::GracePeriod)
    }

    /// What the user should do about this status.
    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Valid => "No action needed.",
            Self::GracePeriod | Self::Expired => "Renew the license.",
            Self::Revoked => "Contact support.",
            Self::InvalidSignature | Self::Corrupted => {
                "Re-enter the license key or reinstall the license file."
            }
            Self::HardwareMismatch => "Contact support with the hardware diagnostics report.",
            Self::ProductMismatch => "Install a license issued for this product.",
            Self::NotFound => "Activate the product with a license key or file.",
            Self::VersionNotSupported => "Update the application or request a current license.",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "valid",
            Self::GracePeriod => "grace period",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::InvalidSignature => "invalid signature",
            Self::HardwareMismatch => "hardware mismatch",
            Self::ProductMismatch => "product mismatch",
            Self::NotFound => "not found",
            Self::Corrupted => "corrupted",
            Self::VersionNotSupported => "version not supported",
        };
        f.write_str(s)
    }
}

/// How loudly the caller should warn about an approaching end of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GraceWarning {
    None,
    /// In grace with more than a week left.
    Notice,
    /// Seven days or fewer.
    Warning,
    /// One day left.
    Critical,
    Expired,
}

impl GraceWarning {
    /// Level for a number of remaining grace days.
    #[must_use]
    pub fn from_remaining(days: i64) -> Self {
        match days {
            d if d <= 0 => Self::Expired,
            1 => Self::Critical,
            d if d <= 7 => Self::Warning,
            _ => Self::Notice,
        }
    }
}

/// Pre-fetched answer from the issuer's sync endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub revoked: bool,
    /// Replacement license content, file or key format.
    #[serde(default)]
    pub updated_license: Option<String>,
}

/// Inputs to one validation besides the license content.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub now: DateTime<Utc>,
    pub current_fingerprints: FingerprintSet,
    /// Revocation flag known to the caller.
    pub revoked: bool,
    pub sync: Option<SyncResponse>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ValidationContext {
    /// Context at the current time.
    #[must_use]
    pub fn new(current_fingerprints: FingerprintSet) -> Self {
        Self {
            now: Utc::now(),
            current_fingerprints,
            revoked: false,
            sync: None,
            last_synced_at: None,
        }
    }

    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub fn with_revoked(mut self, revoked: bool) -> Self {
        self.revoked = revoked;
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: SyncResponse) -> Self {
        self.sync = Some(sync);
        self
    }

    #[must_use]
    pub fn with_last_synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }

    fn is_revoked(&self) -> bool {
        self.revoked || self.sync.as_ref().is_some_and(|s| s.revoked)
    }
}

/// Result of one validation. Recompute after clock changes or reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub status: ValidationStatus,
    pub is_expired: bool,
    pub is_in_grace_period: bool,
    /// Whole days until expiry, negative once expired, None for lifetime.
    pub days_until_expiry: Option<i64>,
    pub grace_days_remaining: i64,
    pub matched_modules: BTreeSet<String>,
    pub matched_features: BTreeSet<String>,
    pub entitlements: Entitlements,
    /// Matching fingerprints, when a binding was checked.
    pub hardware_matches: Option<usize>,
    /// The offline window has run out and the caller should sync.
    pub needs_sync: bool,
    /// Reason for a failure, suitable for logs and support.
    pub detail: Option<String>,
    /// The license, once its signature has verified.
    pub license: Option<LicenseDocument>,
}

impl ValidationResult {
    fn failure(status: ValidationStatus, detail: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            status,
            is_expired: false,
            is_in_grace_period: false,
            days_until_expiry: None,
            grace_days_remaining: 0,
            matched_modules: BTreeSet::new(),
            matched_features: BTreeSet::new(),
            entitlements: Entitlements::default(),
            hardware_matches: None,
            needs_sync: false,
            detail: Some(detail.into()),
            license: None,
        }
    }

    /// Warning level to show for this result.
    #[must_use]
    pub fn grace_warning(&self) -> GraceWarning {
        match self.status {
            ValidationStatus::GracePeriod => GraceWarning::from_remaining(self.grace_days_remaining),
            ValidationStatus::Expired => GraceWarning::Expired,
            _ => GraceWarning::None,
        }
    }

    /// Returns true if the license grants `module` and is usable.
    #[must_use]
    pub fn has_module(&self, module: &str) -> bool {
        self.is_valid && self.matched_modules.contains(module)
    }
}

/// Validates licenses for one product against a set of trusted keys.
///
/// Holds no mutable state; one instance can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct ValidationEngine<R = KeyRing> {
    product_name: String,
    resolver: R,
    supported_versions: Vec<String>,
    running_major: Option<u32>,
}

impl<R: PublicKeyResolver> ValidationEngine<R> {
    pub fn new(product_name: impl Into<String>, resolver: R) -> Self {
        Self {
            product_name: product_name.into(),
            resolver,
            supported_versions: codec::SUPPORTED_FORMAT_VERSIONS
                .iter()
                .map(|v| (*v).to_string())
                .collect(),
            running_major: None,
        }
    }

    /// Restricts the format versions this engine accepts.
    #[must_use]
    pub fn with_supported_versions(mut self, versions: Vec<String>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Major version of the running build. Licenses whose product major
    /// version is lower are rejected as `ProductMismatch`.
    #[must_use]
    pub fn with_running_major(mut self, major: Option<u32>) -> Self {
        self.running_major = major;
        self
    }

    #[must_use]
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    #[must_use]
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Validates a license file. A missing or unreadable file is `NotFound`.
    pub fn validate_file(&self, path: &Path, ctx: &ValidationContext) -> ValidationResult {
        match std::fs::read(path) {
            Ok(bytes) => self.validate_bytes(Some(&bytes), ctx),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.validate_bytes(None, ctx),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "license file unreadable");
                if ctx.sync.as_ref().is_some_and(|s| s.updated_license.is_some()) {
                    return self.validate_content(None, ctx);
                }
                ValidationResult::failure(
                    ValidationStatus::NotFound,
                    format!("license file could not be read: {e}"),
                )
            }
        }
    }

    /// Validates raw license bytes (file content or key text).
    pub fn validate_bytes(&self, bytes: Option<&[u8]>, ctx: &ValidationContext) -> ValidationResult {
        match bytes.map(std::str::from_utf8) {
            None => self.validate_content(None, ctx),
            Some(Ok(text)) => self.validate_content(Some(text), ctx),
            Some(Err(_)) => {
                warn!("license content is not UTF-8");
                ValidationResult::failure(ValidationStatus::Corrupted, "license content is not UTF-8")
            }
        }
    }

    /// Validates license text in either format.
    ///
    /// A replacement license in `ctx.sync` takes precedence over `content`.
    pub fn validate_content(&self, content: Option<&str>, ctx: &ValidationContext) -> ValidationResult {
        let synced = ctx.sync.as_ref().and_then(|s| s.updated_license.as_deref());
        if synced.is_some() {
            debug!("validating license delivered by sync");
        }

        let Some(content) = synced.or(content).filter(|c| !c.trim().is_empty()) else {
            info!("no license content");
            return ValidationResult::failure(ValidationStatus::NotFound, "no license present");
        };

        let doc = match codec::auto_parse(content) {
            Ok(doc) => doc,
            Err(LicenseError::UnsupportedVersion(v)) => {
                warn!(version = %v, "unsupported license format version");
                return ValidationResult::failure(
                    ValidationStatus::VersionNotSupported,
                    format!("format version {v} is not supported"),
                );
            }
            Err(e) => {
                warn!(error = %e, "license content failed to decode");
                return ValidationResult::failure(ValidationStatus::Corrupted, e.to_string());
            }
        };

        self.validate_document(&doc, ctx)
    }

    /// Validates an already-decoded document, starting at the shape check.
    pub fn validate_document(
        &self,
        doc: &LicenseDocument,
        ctx: &ValidationContext,
    ) -> ValidationResult {
        if let Err(e) = doc.check_shape() {
            warn!(license_id = %doc.id, error = %e, "license breaks issuance rules");
            return ValidationResult::failure(ValidationStatus::Corrupted, e.to_string());
        }

        if !self.supported_versions.iter().any(|v| *v == doc.format_version) {
            warn!(version = %doc.format_version, "unsupported license format version");
            return ValidationResult::failure(
                ValidationStatus::VersionNotSupported,
                format!("format version {} is not supported", doc.format_version),
            );
        }

        if let Err(e) = SignatureEngine::verify_detailed(doc, &self.resolver) {
            warn!(license_id = %doc.id, error = %e, "license signature rejected");
            return ValidationResult::failure(ValidationStatus::InvalidSignature, e.to_string());
        }

        if !doc.product.name.eq_ignore_ascii_case(&self.product_name) {
            warn!(license_id = %doc.id, product = %doc.product.name, "license is for another product");
            return verified_failure(
                doc,
                ValidationStatus::ProductMismatch,
                format!(
                    "license is for {}, not {}",
                    doc.product.name, self.product_name
                ),
            );
        }

        if let Some(major) = self.running_major {
            if !doc.product.covers_major_version(major) {
                warn!(
                    license_id = %doc.id,
                    licensed = doc.product.major_version,
                    running = major,
                    "license does not cover this major version"
                );
                return verified_failure(
                    doc,
                    ValidationStatus::ProductMismatch,
                    format!(
                        "license covers {} up to v{}, running v{major}",
                        doc.product.name, doc.product.major_version
                    ),
                );
            }
        }

        if ctx.is_revoked() {
            warn!(license_id = %doc.id, "license revoked");
            return verified_failure(doc, ValidationStatus::Revoked, "license has been revoked");
        }

        let binding = &doc.binding;
        let mut hardware_matches = None;
        if binding.is_bound() {
            let matches = FuzzyBindingMatcher::count_matches(
                &binding.hardware_fingerprints,
                &ctx.current_fingerprints,
            );
            hardware_matches = Some(matches);
            if !FuzzyBindingMatcher::verify(
                &binding.hardware_fingerprints,
                &ctx.current_fingerprints,
                binding.required_matches(),
            ) {
                warn!(
                    license_id = %doc.id,
                    matches,
                    required = binding.required_matches(),
                    "hardware binding mismatch"
                );
                let mut result = verified_failure(
                    doc,
                    ValidationStatus::HardwareMismatch,
                    format!(
                        "{matches} of {} hardware components match, {} required",
                        binding.hardware_fingerprints.len(),
                        binding.required_matches()
                    ),
                );
                result.hardware_matches = hardware_matches;
                return result;
            }
        }

        let mut result = date_check(doc, ctx.now);
        result.hardware_matches = hardware_matches;
        result.needs_sync = needs_sync(doc, ctx);

        match result.status {
            ValidationStatus::Valid => {
                debug!(license_id = %doc.id, "license valid");
            }
            ValidationStatus::GracePeriod => warn!(
                license_id = %doc.id,
                grace_days_remaining = result.grace_days_remaining,
                "license expired, in grace period"
            ),
            _ => warn!(license_id = %doc.id, "license expired"),
        }
        result
    }

    /// Per-entry binding report for support. Never used for decisions.
    #[must_use]
    pub fn diagnose_match(&self, doc: &LicenseDocument, current: &FingerprintSet) -> MatchReport {
        FuzzyBindingMatcher::diagnose(
            &doc.binding.hardware_fingerprints,
            current,
            doc.binding.required_matches(),
        )
    }
}

fn verified_failure(
    doc: &LicenseDocument,
    status: ValidationStatus,
    detail: impl Into<String>,
) -> ValidationResult {
    let mut result = ValidationResult::failure(status, detail);
    result.license = Some(doc.clone());
    result
}

fn date_check(doc: &LicenseDocument, now: DateTime<Utc>) -> ValidationResult {
    let terms = &doc.terms;
    let grace_days = i64::from(terms.grace_period_days);

    let (status, days_until_expiry, grace_days_remaining) = match terms.effective_expiry() {
        None => (ValidationStatus::Valid, None, grace_days),
        Some(expires_at) => {
            let days_until = (expires_at - now).num_seconds().div_euclid(SECS_PER_DAY);
            if now < expires_at {
                (ValidationStatus::Valid, Some(days_until), grace_days)
            } else {
                let days_since = (now - expires_at).num_seconds().div_euclid(SECS_PER_DAY);
                let remaining = grace_days - days_since;
                if remaining > 0 {
                    (ValidationStatus::GracePeriod, Some(days_until), remaining)
                } else {
                    (ValidationStatus::Expired, Some(days_until), 0)
                }
            }
        }
    };

    let is_valid = status.is_usable();
    let entitlements = doc.entitlements();
    ValidationResult {
        is_valid,
        status,
        is_expired: status != ValidationStatus::Valid,
        is_in_grace_period: status == ValidationStatus::GracePeriod,
        days_until_expiry,
        grace_days_remaining,
        matched_modules: if is_valid {
            entitlements.modules.clone()
        } else {
            BTreeSet::new()
        },
        matched_features: if is_valid {
            doc.features.clone()
        } else {
            BTreeSet::new()
        },
        entitlements,
        hardware_matches: None,
        needs_sync: false,
        detail: match status {
            ValidationStatus::Valid => None,
            ValidationStatus::GracePeriod => Some(format!(
                "license expired, {grace_days_remaining} grace day(s) remaining"
            )),
            _ => Some("license and grace period have expired".to_string()),
        },
        license: Some(doc.clone()),
    }
}

/// The offline window starts at the last sync, else activation, else issue.
fn needs_sync(doc: &LicenseDocument, ctx: &ValidationContext) -> bool {
    let terms = &doc.terms;
    if !terms.allow_offline {
        return true;
    }
    let since = ctx
        .last_synced_at
        .or(terms.activated_at)
        .unwrap_or(terms.issued_at);
    (ctx.now - since).num_seconds() > i64::from(terms.offline_max_days) * SECS_PER_DAY
}
