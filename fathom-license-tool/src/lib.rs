//! Commands behind the Fathom license tool.
//!
//! Each command returns the text to print so it can be exercised without
//! a terminal; `main.rs` only parses arguments and sets up logging.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fathom_license::{
    encode_key, save_to_file, EngineConfig, FingerprintSet, HardwareFingerprintCollector,
    HardwareSource, IssuerSigningKey, LicenseDocument, SignatureEngine, ValidationContext,
    ValidationResult, ValidationStatus,
};
use tracing::{debug, info};

/// Writes a fresh issuer key pair as `<key_id>.private.b64` and
/// `<key_id>.public.b64`. Refuses to overwrite an existing private key.
pub fn keygen(key_id: &str, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    if key_id.trim().is_empty() {
        bail!("key id must not be empty");
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let private_path = out_dir.join(format!("{key_id}.private.b64"));
    let public_path = out_dir.join(format!("{key_id}.public.b64"));
    if private_path.exists() {
        bail!("{} already exists", private_path.display());
    }

    let key = IssuerSigningKey::generate();
    fs::write(&private_path, key.to_base64())
        .with_context(|| format!("Failed to write {}", private_path.display()))?;
    fs::write(&public_path, key.verifying_key().to_base64())
        .with_context(|| format!("Failed to write {}", public_path.display()))?;

    info!(key_id, "generated issuer key pair");
    Ok((private_path, public_path))
}

/// Machine id and fingerprints of the host behind `collector`.
pub fn fingerprint_report<S: HardwareSource>(
    collector: &HardwareFingerprintCollector<S>,
    diagnostics: bool,
) -> String {
    if diagnostics {
        return collector.diagnostics_report();
    }
    let mut out = format!("Machine ID: {}\n", collector.generate_primary());
    for fp in collector.generate().iter() {
        let _ = writeln!(out, "  {fp}");
    }
    out
}

/// Options for [`issue`].
#[derive(Debug, Clone)]
pub struct IssueOptions {
    pub template: PathBuf,
    pub private_key: PathBuf,
    pub key_id: String,
    /// Replaces the template's binding with these fingerprints.
    pub bind_to: Option<FingerprintSet>,
    /// Recorded as the binding's machine id alongside `bind_to`.
    pub machine_id: Option<String>,
    pub threshold: Option<usize>,
    pub out: Option<PathBuf>,
    pub compact: bool,
}

/// Signs the template and returns the compact key or the license file text.
/// With `out`, the file form is also written there.
pub fn issue(opts: &IssueOptions) -> Result<String> {
    let template = fs::read_to_string(&opts.template)
        .with_context(|| format!("Failed to read template {}", opts.template.display()))?;
    let mut doc: LicenseDocument =
        serde_json::from_str(&template).context("Template is not a license document")?;

    if let Some(fingerprints) = &opts.bind_to {
        let threshold = opts
            .threshold
            .unwrap_or(doc.binding.match_threshold)
            .min(fingerprints.len());
        doc.binding.hardware_fingerprints = fingerprints.to_vec();
        doc.binding.match_threshold = threshold;
        if opts.machine_id.is_some() {
            doc.binding.machine_guid.clone_from(&opts.machine_id);
        }
    } else if let Some(threshold) = opts.threshold {
        doc.binding.match_threshold = threshold;
    }

    let encoded = fs::read_to_string(&opts.private_key)
        .with_context(|| format!("Failed to read {}", opts.private_key.display()))?;
    let key = IssuerSigningKey::from_base64(encoded.trim()).context("Invalid private key")?;

    let signed = SignatureEngine::sign(&doc, &key, &opts.key_id)
        .with_context(|| format!("Failed to sign license {}", doc.id))?;
    info!(license_id = %signed.id, key_id = %opts.key_id, "license signed");

    if let Some(out) = &opts.out {
        save_to_file(&signed, out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        debug!(path = %out.display(), "license file written");
    }

    if opts.compact {
        Ok(encode_key(&signed)?)
    } else {
        Ok(fathom_license::to_file_string(&signed)?)
    }
}

/// Where the license to validate comes from.
#[derive(Debug, Clone)]
pub enum LicenseSource {
    File(PathBuf),
    Key(String),
    /// The location named by the engine configuration.
    Configured,
}

/// Validates a license for this machine using the engine described by
/// the TOML configuration at `config`.
pub fn validate(
    config: &Path,
    source: &LicenseSource,
    current: FingerprintSet,
    revoked: bool,
) -> Result<ValidationResult> {
    let config = EngineConfig::load(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let engine = config.build_engine()?;
    let ctx = ValidationContext::new(current).with_revoked(revoked);

    let result = match source {
        LicenseSource::Key(key) => engine.validate_content(Some(key), &ctx),
        LicenseSource::File(path) => engine.validate_file(path, &ctx),
        LicenseSource::Configured => engine.validate_file(&config.resolved_license_path(), &ctx),
    };
    Ok(result)
}

/// Human-readable rendering of a validation result.
pub fn render_result(result: &ValidationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status: {}", result.status);
    if let Some(doc) = &result.license {
        let _ = writeln!(out, "License: {} ({})", doc.id, doc.client.name);
        let _ = writeln!(
            out,
            "Product: {} {} v{}",
            doc.product.name, doc.product.edition, doc.product.major_version
        );
    }
    match result.days_until_expiry {
        Some(days) if days >= 0 => {
            let _ = writeln!(out, "Expires in: {days} day(s)");
        }
        Some(days) => {
            let _ = writeln!(out, "Expired: {} day(s) ago", -days);
        }
        None if result.license.is_some() && result.is_valid => {
            let _ = writeln!(out, "Expires: never");
        }
        None => {}
    }
    if result.is_in_grace_period {
        let _ = writeln!(
            out,
            "Grace days remaining: {} ({:?})",
            result.grace_days_remaining,
            result.grace_warning()
        );
    }
    if let Some(matches) = result.hardware_matches {
        let _ = writeln!(out, "Hardware matches: {matches}");
    }
    if !result.matched_modules.is_empty() {
        let modules: Vec<&str> = result.matched_modules.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Modules: {}", modules.join(", "));
    }
    if let Some(tier) = &result.entitlements.tier {
        let _ = writeln!(out, "Tier: {tier}");
    }
    if result.needs_sync {
        let _ = writeln!(out, "Sync required: yes");
    }
    if let Some(detail) = &result.detail {
        let _ = writeln!(out, "Detail: {detail}");
    }
    if result.status != ValidationStatus::Valid {
        let _ = writeln!(out, "Action: {}", result.status.remediation());
    }
    out
}

/// Per-entry binding report for the license at `path` against `current`.
pub fn diagnose(path: &Path, current: &FingerprintSet) -> Result<String> {
    let doc = fathom_license::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if !doc.binding.is_bound() {
        return Ok(format!("License {} is not hardware bound.\n", doc.id));
    }
    let report = fathom_license::FuzzyBindingMatcher::diagnose(
        &doc.binding.hardware_fingerprints,
        current,
        doc.binding.required_matches(),
    );
    Ok(format!(
        "License {} checked {}\n{report}",
        doc.id,
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    ))
}
