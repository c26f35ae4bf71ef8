//! Offline licensing for the Fathom product line.
//!
//! This crate handles:
//! - Signed license documents (ECDSA P-256, key rotation via key ids)
//! - Hardware fingerprinting and fuzzy binding to a machine
//! - License files and compact, hand-typeable license keys
//! - Validation with grace periods after expiry
//!
//! # Design Principles
//!
//! - **Offline-first**: validation uses only local bytes and the local clock
//! - **Fail closed**: anything that does not decode or verify is rejected
//! - **Drift tolerant**: a bound license survives a few hardware changes
//! - **No globals**: callers construct a [`ValidationEngine`] and own it
//!
//! # Flow
//!
//! content -> [`codec::auto_parse`] -> [`SignatureEngine::verify`] ->
//! [`FuzzyBindingMatcher::verify`] -> date checks -> [`ValidationResult`]

pub mod binding;
pub mod codec;
mod config;
mod document;
mod error;
mod grants;
pub mod hardware;
pub mod hash;
mod signing;
mod validation;

pub use binding::{FuzzyBindingMatcher, MatchEntry, MatchReport};
pub use codec::{
    auto_parse, decode_key, detect_format, edition_code, encode_key, from_file_string,
    load_from_file, save_to_file, to_file_string, validate_key_format, LicenseFormat, KEY_PREFIX,
    LICENSE_FILE_EXTENSION,
};
pub use config::EngineConfig;
pub use document::{
    is_valid_license_id, is_valid_licensee_code, ClientInfo, HardwareBinding, LicenseDocument,
    LicenseTerms, ProductInfo, SubscriptionKind, DEFAULT_GRACE_PERIOD_DAYS,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_OFFLINE_MAX_DAYS, FORMAT_VERSION, MAX_FINGERPRINTS,
};
pub use error::{LicenseError, LicenseResult};
pub use grants::{Entitlements, Grant};
pub use hardware::{
    FingerprintSet, HardwareComponent, HardwareFingerprintCollector, HardwareSource,
    StaticHardware, SystemHardware,
};
pub use signing::{IssuerSigningKey, IssuerVerifyingKey, KeyRing, PublicKeyResolver, SignatureEngine};
pub use validation::{
    GraceWarning, SyncResponse, ValidationContext, ValidationEngine, ValidationResult,
    ValidationStatus,
};
