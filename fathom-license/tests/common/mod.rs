//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use fathom_license::{
    ClientInfo, FingerprintSet, HardwareBinding, HardwareComponent, HardwareFingerprintCollector,
    IssuerSigningKey, KeyRing, LicenseDocument, LicenseTerms, ProductInfo, SignatureEngine,
    StaticHardware, SubscriptionKind, ValidationEngine,
};

pub const KEY_ID: &str = "fathom-2026-01";
pub const PRODUCT: &str = "FathomOS";

/// Fixed instant so encoded artifacts are identical between runs.
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T09:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Returns a deterministic P-256 issuer key from a fixed scalar.
pub fn test_key() -> IssuerSigningKey {
    let scalar: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    IssuerSigningKey::from_bytes(&scalar).unwrap()
}

/// Key ring trusting [`test_key`] under [`KEY_ID`].
pub fn test_ring() -> KeyRing {
    KeyRing::new().with_key(KEY_ID, test_key().verifying_key())
}

pub fn test_engine() -> ValidationEngine<KeyRing> {
    ValidationEngine::new(PRODUCT, test_ring())
}

/// A machine with five identifiable components; the first `changed` of
/// them report replacement values.
pub fn machine(changed: usize) -> StaticHardware {
    machine_replacing(&(0..changed).collect::<Vec<_>>())
}

/// The machine from [`machine`] with the components at `replaced` swapped.
pub fn machine_replacing(replaced: &[usize]) -> StaticHardware {
    let components = [
        (HardwareComponent::Cpu, "BFEBFBFF000906EA"),
        (HardwareComponent::Mainboard, "PM1A2B3C4D5E6F"),
        (HardwareComponent::Firmware, "5CG1234XYZ"),
        (HardwareComponent::SystemVolume, "2F6A-91C0"),
        (HardwareComponent::DisplayAdapter, "PCI\\VEN_10DE&DEV_2484"),
    ];
    components
        .iter()
        .enumerate()
        .fold(StaticHardware::new(), |hw, (i, (component, value))| {
            if replaced.contains(&i) {
                hw.with(*component, format!("{value}-REPLACED"))
            } else {
                hw.with(*component, *value)
            }
        })
}

pub fn fingerprints(changed: usize) -> FingerprintSet {
    HardwareFingerprintCollector::with_source(machine(changed)).generate()
}

pub fn fingerprints_replacing(replaced: &[usize]) -> FingerprintSet {
    HardwareFingerprintCollector::with_source(machine_replacing(replaced)).generate()
}

/// Unsigned Professional license expiring `days` from `now`.
pub fn document_at(now: DateTime<Utc>, days: i64) -> LicenseDocument {
    let mut terms = LicenseTerms::new(SubscriptionKind::Yearly, now - Duration::days(1));
    terms.expires_at = now + Duration::days(days);

    let mut doc = LicenseDocument::new(
        "LIC-2026-0001",
        ClientInfo::new("Ocean Survey Ltd", "licensing@oceansurvey.example"),
        ProductInfo::new(PRODUCT, "Professional", 9),
        terms,
    );
    doc.modules.insert("SurveyListing".to_string());
    doc
}

/// Signed license bound to [`machine`]`(0)` with threshold 3.
pub fn signed_bound(now: DateTime<Utc>, days: i64) -> LicenseDocument {
    let mut doc = document_at(now, days);
    doc.binding = HardwareBinding::new(fingerprints(0).into_inner(), 3);
    SignatureEngine::sign(&doc, &test_key(), KEY_ID).unwrap()
}

/// Signed, unbound license.
pub fn signed(now: DateTime<Utc>, days: i64) -> LicenseDocument {
    SignatureEngine::sign(&document_at(now, days), &test_key(), KEY_ID).unwrap()
}
