mod common;

use chrono::{Duration, Utc};
use common::{
    document_at, fingerprints, signed, signed_bound, test_engine, test_key, test_ring, KEY_ID,
};
use fathom_license::{
    encode_key, to_file_string, EngineConfig, GraceWarning, HardwareBinding, LicenseDocument,
    SignatureEngine, SubscriptionKind, SyncResponse, ValidationContext, ValidationEngine,
    ValidationStatus,
};

fn file_bytes(doc: &LicenseDocument) -> Vec<u8> {
    to_file_string(doc).unwrap().into_bytes()
}

fn sign(doc: &LicenseDocument) -> LicenseDocument {
    SignatureEngine::sign(doc, &test_key(), KEY_ID).unwrap()
}

// ── Concrete scenario ────────────────────────────────────────────

#[test]
fn issue_encode_validate_scenario() {
    let now = Utc::now();
    let doc = signed_bound(now, 365);
    assert_eq!(doc.id, "LIC-2026-0001");
    assert_eq!(doc.binding.hardware_fingerprints.len(), 5);

    let key = encode_key(&doc).unwrap();
    let engine = test_engine();

    let here = ValidationContext::new(fingerprints(0)).at(now);
    let result = engine.validate_content(Some(&key), &here);
    assert_eq!(result.status, ValidationStatus::Valid);
    assert!(result.is_valid);
    assert_eq!(
        result.matched_modules.iter().collect::<Vec<_>>(),
        vec!["SurveyListing"]
    );
    assert_eq!(result.hardware_matches, Some(5));

    let elsewhere = ValidationContext::new(fingerprints(3)).at(now);
    let result = engine.validate_content(Some(&key), &elsewhere);
    assert_eq!(result.status, ValidationStatus::HardwareMismatch);
    assert!(!result.is_valid);
    assert_eq!(result.hardware_matches, Some(2));

    let (head, checksum) = key.rsplit_once('-').unwrap();
    let bumped = if checksum.ends_with('0') { '1' } else { '0' };
    let corrupted = format!("{head}-{}{bumped}", &checksum[..3]);
    let result = engine.validate_content(Some(&corrupted), &here);
    assert_eq!(result.status, ValidationStatus::Corrupted);
    assert!(result.detail.unwrap().contains("checksum"));
}

// ── Steps 1-4 ────────────────────────────────────────────────────

#[test]
fn missing_content_is_not_found() {
    let ctx = ValidationContext::new(fingerprints(0));
    let engine = test_engine();
    assert_eq!(engine.validate_bytes(None, &ctx).status, ValidationStatus::NotFound);
    assert_eq!(
        engine.validate_content(Some("  \n"), &ctx).status,
        ValidationStatus::NotFound
    );
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_file(&dir.path().join("license.lic"), &ctx);
    assert_eq!(result.status, ValidationStatus::NotFound);
}

#[test]
fn unreadable_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_file(dir.path(), &ctx);
    assert_eq!(result.status, ValidationStatus::NotFound);
    assert!(result.detail.unwrap().contains("could not be read"));
}

#[test]
fn saved_file_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("license.lic");
    fathom_license::save_to_file(&signed_bound(Utc::now(), 30), &path).unwrap();

    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_file(&path, &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
}

#[test]
fn garbage_is_corrupted() {
    let ctx = ValidationContext::new(fingerprints(0));
    let engine = test_engine();
    assert_eq!(
        engine.validate_bytes(Some(&[0xff, 0xfe, 0x00]), &ctx).status,
        ValidationStatus::Corrupted
    );
    assert_eq!(
        engine.validate_content(Some("{ not json"), &ctx).status,
        ValidationStatus::Corrupted
    );
    assert_eq!(
        engine.validate_content(Some("hello"), &ctx).status,
        ValidationStatus::Corrupted
    );
}

#[test]
fn future_format_version_not_supported() {
    let mut doc = document_at(Utc::now(), 30);
    doc.format_version = "2.0".into();
    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_bytes(Some(&file_bytes(&doc)), &ctx);
    assert_eq!(result.status, ValidationStatus::VersionNotSupported);
}

#[test]
fn engine_can_narrow_supported_versions() {
    let engine = test_engine().with_supported_versions(vec!["0.9".into()]);
    let ctx = ValidationContext::new(fingerprints(0));
    let result = engine.validate_document(&signed(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::VersionNotSupported);
}

#[test]
fn unsigned_document_is_invalid_signature() {
    let doc = document_at(Utc::now(), 30);
    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_bytes(Some(&file_bytes(&doc)), &ctx);
    assert_eq!(result.status, ValidationStatus::InvalidSignature);
    assert!(result.license.is_none());
}

#[test]
fn tampered_document_never_reaches_later_checks() {
    // Expired, foreign product and bound elsewhere, but tampering wins.
    let now = Utc::now();
    let mut doc = signed_bound(now, -100);
    doc.product.name = "OtherProduct".into();
    doc.client.name = "Someone Else".into();

    let ctx = ValidationContext::new(fingerprints(5)).at(now).with_revoked(true);
    let result = test_engine().validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::InvalidSignature);
}

#[test]
fn respelled_timestamp_is_rejected() {
    let text = to_file_string(&signed(Utc::now(), 30)).unwrap();
    let respelled = text.replacen('T', "t", 1);
    assert_ne!(respelled, text);

    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_content(Some(&respelled), &ctx);
    assert_eq!(result.status, ValidationStatus::Corrupted);
    assert!(result.license.is_none());
}

#[test]
fn unknown_key_id_is_invalid_signature() {
    let doc = SignatureEngine::sign(&document_at(Utc::now(), 30), &test_key(), "unknown").unwrap();
    let ctx = ValidationContext::new(fingerprints(0));
    let result = test_engine().validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::InvalidSignature);
}

#[test]
fn resolver_can_be_a_closure() {
    let vk = test_key().verifying_key();
    let engine = ValidationEngine::new("FathomOS", move |id: &str| {
        (id == KEY_ID).then(|| vk.clone())
    });
    let ctx = ValidationContext::new(fingerprints(0));
    assert!(engine.validate_document(&signed(Utc::now(), 30), &ctx).is_valid);
}

// ── Steps 5-7 ────────────────────────────────────────────────────

#[test]
fn other_product_is_product_mismatch() {
    let engine = ValidationEngine::new("FathomLite", test_ring());
    let ctx = ValidationContext::new(fingerprints(0));
    let result = engine.validate_document(&signed(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::ProductMismatch);
    assert!(result.license.is_some());
    assert!(result.matched_modules.is_empty());
}

#[test]
fn newer_running_major_is_product_mismatch() {
    let ctx = ValidationContext::new(fingerprints(0));
    let doc = signed(Utc::now(), 30);

    let covered = test_engine().with_running_major(Some(9));
    assert!(covered.validate_document(&doc, &ctx).is_valid);

    let newer = test_engine().with_running_major(Some(10));
    let result = newer.validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::ProductMismatch);
    assert!(result.detail.unwrap().contains("v10"));
}

#[test]
fn configured_running_major_is_enforced() {
    let config = EngineConfig::from_toml_str(&format!(
        "product_name = \"FathomOS\"\nrunning_major_version = 10\n[keys]\n\"{KEY_ID}\" = \"{}\"\n",
        test_key().verifying_key().to_base64()
    ))
    .unwrap();
    let engine = config.build_engine().unwrap();
    let ctx = ValidationContext::new(fingerprints(0));
    let result = engine.validate_document(&signed(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::ProductMismatch);
}

#[test]
fn revocation_flag_revokes() {
    let ctx = ValidationContext::new(fingerprints(0)).with_revoked(true);
    let result = test_engine().validate_document(&signed(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::Revoked);
    assert!(!result.is_valid);
}

#[test]
fn sync_response_revokes() {
    let ctx = ValidationContext::new(fingerprints(0)).with_sync(SyncResponse {
        revoked: true,
        updated_license: None,
    });
    let content = to_file_string(&signed(Utc::now(), 30)).unwrap();
    let result = test_engine().validate_content(Some(&content), &ctx);
    assert_eq!(result.status, ValidationStatus::Revoked);
}

#[test]
fn sync_response_replaces_local_license() {
    let now = Utc::now();
    let expired = to_file_string(&signed(now, -30)).unwrap();
    let renewed = encode_key(&signed(now, 365)).unwrap();

    let ctx = ValidationContext::new(fingerprints(0))
        .at(now)
        .with_sync(SyncResponse {
            revoked: false,
            updated_license: Some(renewed),
        });
    let result = test_engine().validate_content(Some(&expired), &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
}

#[test]
fn two_component_changes_tolerated() {
    let ctx = ValidationContext::new(fingerprints(2));
    let result = test_engine().validate_document(&signed_bound(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
    assert_eq!(result.hardware_matches, Some(3));
}

#[test]
fn strict_binding_rejects_any_change() {
    let mut doc = document_at(Utc::now(), 30);
    doc.binding = HardwareBinding::new(fingerprints(0).into_inner(), 3);
    doc.binding.strict_binding = true;
    let doc = sign(&doc);

    let engine = test_engine();
    let same = ValidationContext::new(fingerprints(0));
    let changed = ValidationContext::new(fingerprints(1));
    assert_eq!(engine.validate_document(&doc, &same).status, ValidationStatus::Valid);
    assert_eq!(
        engine.validate_document(&doc, &changed).status,
        ValidationStatus::HardwareMismatch
    );
}

#[test]
fn unbound_license_valid_anywhere() {
    let ctx = ValidationContext::new(fingerprints(5));
    let result = test_engine().validate_document(&signed(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
    assert_eq!(result.hardware_matches, None);
}

#[test]
fn diagnose_match_report() {
    let doc = signed_bound(Utc::now(), 30);
    let report = test_engine().diagnose_match(&doc, &fingerprints(3));
    assert_eq!(report.matches, 2);
    assert!(!report.passed);
    assert!(report.to_string().contains("FAIL"));
}

// ── Step 8: dates ────────────────────────────────────────────────

#[test]
fn just_expired_enters_grace() {
    let now = Utc::now();
    let mut doc = document_at(now, 0);
    doc.terms.expires_at = now - Duration::seconds(1);
    let doc = sign(&doc);

    let ctx = ValidationContext::new(fingerprints(0)).at(now);
    let result = test_engine().validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::GracePeriod);
    assert!(result.is_valid);
    assert!(result.is_expired);
    assert!(result.is_in_grace_period);
    assert_eq!(result.grace_days_remaining, 14);
    assert_eq!(result.days_until_expiry, Some(-1));
    assert_eq!(result.grace_warning(), GraceWarning::Notice);
    assert!(result.has_module("SurveyListing"));
}

#[test]
fn past_grace_is_expired() {
    let now = Utc::now();
    let doc = signed(now, -15);
    let ctx = ValidationContext::new(fingerprints(0)).at(now);
    let result = test_engine().validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::Expired);
    assert!(!result.is_valid);
    assert_eq!(result.grace_days_remaining, 0);
    assert_eq!(result.days_until_expiry, Some(-15));
    assert_eq!(result.grace_warning(), GraceWarning::Expired);
    assert!(result.matched_modules.is_empty());
}

#[test]
fn grace_warning_escalates() {
    let now = Utc::now();
    let engine = test_engine();
    let ctx = ValidationContext::new(fingerprints(0)).at(now);

    let warning = engine.validate_document(&signed(now, -8), &ctx);
    assert_eq!(warning.status, ValidationStatus::GracePeriod);
    assert_eq!(warning.grace_days_remaining, 6);
    assert_eq!(warning.grace_warning(), GraceWarning::Warning);

    let critical = engine.validate_document(&signed(now, -13), &ctx);
    assert_eq!(critical.grace_days_remaining, 1);
    assert_eq!(critical.grace_warning(), GraceWarning::Critical);

    let over = engine.validate_document(&signed(now, -14), &ctx);
    assert_eq!(over.status, ValidationStatus::Expired);
}

#[test]
fn lifetime_never_expires() {
    let now = Utc::now();
    let mut doc = document_at(now, -5000);
    doc.terms.subscription = SubscriptionKind::Lifetime;
    let doc = sign(&doc);

    let ctx = ValidationContext::new(fingerprints(0)).at(now + Duration::days(20_000));
    let result = test_engine().validate_document(&doc, &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
    assert!(!result.is_expired);
    assert_eq!(result.days_until_expiry, None);
}

#[test]
fn future_expiry_counts_days() {
    let now = Utc::now();
    let ctx = ValidationContext::new(fingerprints(0)).at(now);
    let result = test_engine().validate_document(&signed(now, 10), &ctx);
    assert_eq!(result.days_until_expiry, Some(10));
    assert_eq!(result.grace_warning(), GraceWarning::None);
}

// ── Entitlements and offline window ─────────────────────────────

#[test]
fn feature_grants_parsed_into_entitlements() {
    let mut doc = document_at(Utc::now(), 30);
    doc.features.extend([
        "Module:Calibration".to_string(),
        "Tier:Professional".to_string(),
        "Limit:exports=250".to_string(),
        "Seats:3".to_string(),
        "BetaCharts".to_string(),
    ]);
    let doc = sign(&doc);

    let result = test_engine().validate_document(&doc, &ValidationContext::new(fingerprints(0)));
    assert!(result.has_module("SurveyListing"));
    assert!(result.has_module("Calibration"));
    assert_eq!(result.entitlements.tier.as_deref(), Some("Professional"));
    assert_eq!(result.entitlements.limit("exports"), Some(250));
    assert_eq!(result.entitlements.limit("seats"), Some(3));
    assert!(result.entitlements.has_flag("BetaCharts"));
    assert!(result.matched_features.contains("Seats:3"));
}

#[test]
fn seat_limit_defaults_to_product_seats() {
    let mut doc = document_at(Utc::now(), 30);
    doc.product.seat_count = 4;
    let doc = sign(&doc);
    let result = test_engine().validate_document(&doc, &ValidationContext::new(fingerprints(0)));
    assert_eq!(result.entitlements.limit("seats"), Some(4));
}

#[test]
fn offline_window_sets_needs_sync() {
    let now = Utc::now();
    let doc = signed(now, 365);
    let engine = test_engine();

    let fresh = ValidationContext::new(fingerprints(0))
        .at(now)
        .with_last_synced_at(now - Duration::days(2));
    assert!(!engine.validate_document(&doc, &fresh).needs_sync);

    let stale = ValidationContext::new(fingerprints(0))
        .at(now)
        .with_last_synced_at(now - Duration::days(31));
    let result = engine.validate_document(&doc, &stale);
    assert!(result.needs_sync);
    assert_eq!(result.status, ValidationStatus::Valid);
}

#[test]
fn online_only_license_always_needs_sync() {
    let mut doc = document_at(Utc::now(), 30);
    doc.terms.allow_offline = false;
    let doc = sign(&doc);
    let result = test_engine().validate_document(&doc, &ValidationContext::new(fingerprints(0)));
    assert!(result.needs_sync);
    assert!(result.is_valid);
}

#[test]
fn engine_built_from_config() {
    let toml = format!(
        "product_name = \"fathomos\"\n\n[keys]\n\"{KEY_ID}\" = \"{}\"\n",
        test_key().verifying_key().to_base64()
    );
    let engine = EngineConfig::from_toml_str(&toml)
        .unwrap()
        .build_engine()
        .unwrap();
    assert_eq!(engine.product_name(), "fathomos");

    // Product names compare case-insensitively.
    let ctx = ValidationContext::new(fingerprints(0));
    let result = engine.validate_document(&signed_bound(Utc::now(), 30), &ctx);
    assert_eq!(result.status, ValidationStatus::Valid);
}

#[test]
fn concurrent_validation_shares_engine() {
    let engine = std::sync::Arc::new(test_engine());
    let key = encode_key(&signed_bound(Utc::now(), 30)).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                let ctx = ValidationContext::new(fingerprints(0));
                engine.validate_content(Some(&key), &ctx).status
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), ValidationStatus::Valid);
    }
}
