//! ECDSA P-256 signing and verification of license documents.
//!
//! The signature covers the canonical form of a document: the document with
//! `signature` cleared, serialized as compact JSON in struct field order.
//! Maps and sets are ordered collections, so the bytes are stable across
//! processes and machines. Verification always recomputes the canonical form.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey,
};
use rand::rngs::OsRng;
use tracing::{debug, warn};

use crate::document::LicenseDocument;
use crate::error::{LicenseError, LicenseResult};

/// Issuer private key. Only the license server holds one.
#[derive(Clone)]
pub struct IssuerSigningKey(P256SigningKey);

/// Issuer public key, shipped with the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerVerifyingKey(P256VerifyingKey);

impl IssuerSigningKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(P256SigningKey::random(&mut OsRng))
    }

    /// Creates a key from a 32-byte big-endian scalar.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the bytes are not a valid P-256 scalar.
    pub fn from_bytes(bytes: &[u8]) -> LicenseResult<Self> {
        P256SigningKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| LicenseError::InvalidKey(format!("signing key: {e}")))
    }

    /// Decodes a base64 scalar.
    pub fn from_base64(encoded: &str) -> LicenseResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::InvalidKey(format!("signing key base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw 32-byte scalar.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    #[must_use]
    pub fn verifying_key(&self) -> IssuerVerifyingKey {
        IssuerVerifyingKey(*self.0.verifying_key())
    }

    fn sign_bytes(&self, message: &[u8]) -> P256Signature {
        self.0.sign(message)
    }
}

impl std::fmt::Debug for IssuerSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerSigningKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl IssuerVerifyingKey {
    /// Creates a key from SEC1 bytes (compressed or uncompressed point).
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the bytes are not a P-256 point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> LicenseResult<Self> {
        P256VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|e| LicenseError::InvalidKey(format!("verifying key: {e}")))
    }

    /// Decodes a base64 SEC1 point.
    pub fn from_base64(encoded: &str) -> LicenseResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::InvalidKey(format!("verifying key base64: {e}")))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding.
    #[must_use]
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_sec1_bytes())
    }

    fn verify_bytes(&self, message: &[u8], signature: &P256Signature) -> bool {
        self.0.verify(message, signature).is_ok()
    }
}

/// Looks up issuer public keys by key id.
pub trait PublicKeyResolver {
    fn resolve(&self, key_id: &str) -> Option<IssuerVerifyingKey>;
}

impl<F> PublicKeyResolver for F
where
    F: Fn(&str) -> Option<IssuerVerifyingKey>,
{
    fn resolve(&self, key_id: &str) -> Option<IssuerVerifyingKey> {
        self(key_id)
    }
}

/// Set of trusted issuer keys. Ship several to rotate keys without
/// breaking licenses signed by an older one.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<String, IssuerVerifyingKey>,
}

impl KeyRing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the key for `key_id`.
    pub fn insert(&mut self, key_id: impl Into<String>, key: IssuerVerifyingKey) {
        self.keys.insert(key_id.into(), key);
    }

    #[must_use]
    pub fn with_key(mut self, key_id: impl Into<String>, key: IssuerVerifyingKey) -> Self {
        self.insert(key_id, key);
        self
    }

    #[must_use]
    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl PublicKeyResolver for KeyRing {
    fn resolve(&self, key_id: &str) -> Option<IssuerVerifyingKey> {
        self.keys.get(key_id).cloned()
    }
}

/// Signs and verifies license documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureEngine;

impl SignatureEngine {
    /// Canonical bytes of `doc`: every field except `signature`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error only if the document cannot be encoded.
    pub fn canonical_bytes(doc: &LicenseDocument) -> LicenseResult<Vec<u8>> {
        let mut unsigned = doc.clone();
        unsigned.signature.clear();
        Ok(serde_json::to_vec(&unsigned)?)
    }

    /// Returns a signed copy of `doc` carrying `key_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` if the document breaks issuance rules.
    pub fn sign(
        doc: &LicenseDocument,
        key: &IssuerSigningKey,
        key_id: &str,
    ) -> LicenseResult<LicenseDocument> {
        doc.check_shape()?;
        if key_id.trim().is_empty() {
            return Err(LicenseError::InvalidDocument("key id is empty".into()));
        }

        let mut signed = doc.clone();
        signed.public_key_id = key_id.to_string();
        signed.signature.clear();

        let message = Self::canonical_bytes(&signed)?;
        signed.signature = BASE64.encode(key.sign_bytes(&message).to_bytes());

        debug!(license_id = %signed.id, key_id, "signed license");
        Ok(signed)
    }

    /// Verifies the signature, failing closed on any doubt.
    #[must_use]
    pub fn verify<R: PublicKeyResolver + ?Sized>(doc: &LicenseDocument, resolver: &R) -> bool {
        match Self::verify_detailed(doc, resolver) {
            Ok(()) => true,
            Err(e) => {
                warn!(license_id = %doc.id, error = %e, "license signature rejected");
                false
            }
        }
    }

    /// Verifies the signature and reports why it failed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKeyId` when the resolver has no key for the document,
    /// otherwise `InvalidSignature`.
    pub fn verify_detailed<R: PublicKeyResolver + ?Sized>(
        doc: &LicenseDocument,
        resolver: &R,
    ) -> LicenseResult<()> {
        if doc.signature.is_empty() {
            return Err(LicenseError::InvalidSignature);
        }
        let key = resolver
            .resolve(&doc.public_key_id)
            .ok_or_else(|| LicenseError::UnknownKeyId(doc.public_key_id.clone()))?;

        let sig_bytes = BASE64
            .decode(&doc.signature)
            .map_err(|_| LicenseError::InvalidSignature)?;
        let signature =
            P256Signature::from_slice(&sig_bytes).map_err(|_| LicenseError::InvalidSignature)?;

        let message = Self::canonical_bytes(doc)?;
        if key.verify_bytes(&message, &signature) {
            Ok(())
        } else {
            Err(LicenseError::InvalidSignature)
        }
    }
}
