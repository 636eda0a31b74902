//! The key projection.
//!
//! A `Key` is a snapshot of what callers need to know about a
//! certificate.  It is derived once and never updated: operations
//! that change the certificate return a new `Key`.

use std::cmp;
use std::cmp::Reverse;
use std::time::SystemTime;

use chrono::{
    DateTime,
    Utc,
};

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::Fingerprint;
use openpgp::KeyID;
use openpgp::cert::prelude::*;
use openpgp::packet::UserID;
use openpgp::crypto::mpi;
use openpgp::serialize::SerializeInto;
use openpgp::types::{
    Curve,
    PublicKeyAlgorithm,
    RevocationStatus,
};

use crate::Error;
use crate::Result;
use crate::capability::{
    self,
    Capabilities,
    Expiration,
};
use crate::secret::{
    is_dummy,
    secret_state,
    SecretState,
};
use crate::weak;

/// The kind of key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    OpenPgp,
    X509,
}

/// The primary key's algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAlgo {
    /// The algorithm's name, e.g., `rsa_encrypt_sign` or `eddsa`.
    pub algorithm: String,
    pub bits: Option<usize>,
    /// The curve's name for ECC keys, e.g., `ed25519` or `p256`.
    pub curve: Option<String>,
}

impl KeyAlgo {
    pub(crate) fn of<P, R>(key: &openpgp::packet::Key<P, R>) -> Self
        where P: openpgp::packet::key::KeyParts,
              R: openpgp::packet::key::KeyRole,
    {
        let curve = match key.mpis() {
            mpi::PublicKey::ECDH { curve, .. }
            | mpi::PublicKey::ECDSA { curve, .. }
            | mpi::PublicKey::EdDSA { curve, .. } => Some(curve_name(curve)),
            _ => None,
        };

        KeyAlgo {
            algorithm: algo_name(key.pk_algo()),
            bits: key.mpis().bits(),
            curve,
        }
    }
}

#[allow(deprecated)]
fn algo_name(algo: PublicKeyAlgorithm) -> String {
    use PublicKeyAlgorithm::*;
    match algo {
        RSAEncryptSign => "rsa_encrypt_sign".into(),
        RSAEncrypt => "rsa_encrypt".into(),
        RSASign => "rsa_sign".into(),
        ElGamalEncrypt | ElGamalEncryptSign => "elgamal".into(),
        DSA => "dsa".into(),
        ECDH => "ecdh".into(),
        ECDSA => "ecdsa".into(),
        EdDSA => "eddsa".into(),
        algo => algo.to_string().to_lowercase(),
    }
}

fn curve_name(curve: &Curve) -> String {
    match curve {
        Curve::NistP256 => "p256".into(),
        Curve::NistP384 => "p384".into(),
        Curve::NistP521 => "p521".into(),
        Curve::BrainpoolP256 => "brainpoolP256r1".into(),
        Curve::BrainpoolP512 => "brainpoolP512r1".into(),
        Curve::Ed25519 => "ed25519".into(),
        Curve::Cv25519 => "curve25519".into(),
        curve => curve.to_string(),
    }
}

/// Returns the key ID corresponding to a fingerprint.
pub fn fingerprint_to_keyid(fpr: Fingerprint) -> KeyID {
    let bytes = fpr.as_bytes();
    // XXX: Take the last 8 bytes.  This is wrong for V5 keys where
    // the first 8 bytes correspond to the keyid.
    let bytes = &bytes[cmp::max(8, bytes.len()) - 8..];
    KeyID::from_bytes(bytes)
}

/// Converts a timestamp to milliseconds since the epoch.
pub(crate) fn millis(t: SystemTime) -> i64 {
    DateTime::<Utc>::from(t).timestamp_millis()
}

/// A certificate and everything derived from it.
#[derive(Debug, Clone)]
pub struct Key {
    pub family: KeyFamily,
    /// The primary key's fingerprint, upper case hex.
    pub id: String,
    /// The fingerprints of all keys, primary key first.
    pub all_ids: Vec<String>,
    pub is_private: bool,
    pub is_public: bool,
    pub usable_for_encryption: bool,
    pub usable_for_encryption_but_expired: bool,
    pub usable_for_signing: bool,
    pub usable_for_signing_but_expired: bool,
    pub missing_private_key_for_signing: bool,
    pub missing_private_key_for_decryption: bool,
    /// Lower cased and deduplicated.
    pub emails: Vec<String>,
    /// The raw user ids.  Valid user ids come first, then the primary
    /// user id, then newer user ids.
    pub identities: Vec<String>,
    /// Milliseconds since the epoch.
    pub created: i64,
    /// Milliseconds since the epoch, `None` if the key doesn't expire.
    pub expiration: Option<i64>,
    /// The creation time of the newest self signature in
    /// milliseconds since the epoch.
    pub last_modified: Option<i64>,
    pub fully_decrypted: bool,
    pub fully_encrypted: bool,
    pub algo: KeyAlgo,
    pub revoked: bool,

    capabilities: Capabilities,
    is_primary_key_strong: bool,
    // The time the projection was derived at.
    reference_time: SystemTime,
    cert: Cert,
}

impl Key {
    /// Derives the projection as of now.
    pub fn from_cert(cert: Cert) -> Result<Self> {
        Self::from_cert_at(cert, SystemTime::now())
    }

    /// Derives the projection as of `now`.
    ///
    /// Capabilities are decided on the certificate without its weak
    /// subkeys, but the certificate is kept as is.
    pub fn from_cert_at(cert: Cert, now: SystemTime) -> Result<Self> {
        tracer!(*crate::TRACE, "Key::from_cert_at");

        let filtered = weak::filter(&cert)?;
        let capabilities = capability::resolve(&filtered, now);

        let is_private = cert.is_tsk();
        let fully_decrypted = cert.keys().secret()
            .filter(|ka| ! is_dummy(ka.key()))
            .all(|ka| secret_state(ka.key()) == SecretState::Decrypted);

        let identities = identities(&cert, now);
        let emails = emails(&identities);

        let expiration = match Expiration::of(&cert, now) {
            Expiration::At(t) => Some(millis(t)),
            Expiration::Never | Expiration::Unknown => None,
        };

        let key = Key {
            family: KeyFamily::OpenPgp,
            id: cert.fingerprint().to_hex(),
            all_ids: cert.keys().map(|ka| ka.fingerprint().to_hex()).collect(),
            is_private,
            is_public: ! is_private,
            usable_for_encryption: capabilities.usable_for_encryption(),
            usable_for_encryption_but_expired:
                capabilities.usable_for_encryption_but_expired(),
            usable_for_signing: capabilities.usable_for_signing(),
            usable_for_signing_but_expired:
                capabilities.usable_for_signing_but_expired(),
            missing_private_key_for_signing:
                capabilities.missing_private_key_for_signing,
            missing_private_key_for_decryption:
                capabilities.missing_private_key_for_decryption,
            emails,
            identities,
            created: millis(cert.primary_key().creation_time()),
            expiration,
            last_modified: last_modified(&cert).map(millis),
            fully_decrypted: ! is_private || fully_decrypted,
            fully_encrypted: is_private && ! fully_decrypted,
            algo: KeyAlgo::of(cert.primary_key().key()),
            revoked: matches!(cert.revocation_status(crate::P, now),
                              RevocationStatus::Revoked(_)),
            capabilities,
            is_primary_key_strong: filtered.is_primary_key_strong,
            reference_time: now,
            cert,
        };

        t!("{}: private: {}, revoked: {}, {:?}",
           key.id, key.is_private, key.revoked, key.capabilities);

        Ok(key)
    }

    /// Returns the wrapped certificate.
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn into_cert(self) -> Cert {
        self.cert
    }

    /// Returns the result of the capability resolution.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns the time the projection was derived at.
    ///
    /// Operations that return a new key derive it at the same time,
    /// except `revoke`.
    pub fn reference_time(&self) -> SystemTime {
        self.reference_time
    }

    /// Returns whether the primary key uses strong parameters.
    pub fn is_primary_key_strong(&self) -> bool {
        self.is_primary_key_strong
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.cert.fingerprint()
    }

    /// Returns the primary key's key ID, upper case hex.
    pub fn longid(&self) -> String {
        fingerprint_to_keyid(self.cert.fingerprint()).to_hex()
    }

    /// Returns the key IDs of all keys, primary key first.
    pub fn longids(&self) -> Vec<String> {
        self.cert.keys()
            .map(|ka| fingerprint_to_keyid(ka.fingerprint()).to_hex())
            .collect()
    }

    /// Fails with `UnexpectedKeyType` unless this is an OpenPGP key.
    pub fn check_family(&self) -> Result<()> {
        match self.family {
            KeyFamily::OpenPgp => Ok(()),
            KeyFamily::X509 => Err(Error::UnexpectedKeyType(
                format!("{}: expected an OpenPGP key, got X.509", self.id))),
        }
    }

    /// Returns the ascii armored key.
    ///
    /// Private keys are serialized including their secret key
    /// material.
    pub fn armored(&self) -> Result<String> {
        let bytes = if self.is_private {
            wrap_err!(
                self.cert.as_tsk().armored().to_vec(),
                UnknownError,
                "Serializing key")?
        } else {
            wrap_err!(
                self.cert.armored().to_vec(),
                UnknownError,
                "Serializing certificate")?
        };

        wrap_err!(
            String::from_utf8(bytes),
            UnknownError,
            "Armored key is not UTF-8")
    }
}

/// A candidate signer passed to the signature verifier.
#[derive(Debug, Clone)]
pub struct PubkeyInfo {
    pub pubkey: Key,
    pub revoked: bool,
}

impl From<Key> for PubkeyInfo {
    fn from(key: Key) -> Self {
        PubkeyInfo {
            revoked: key.revoked,
            pubkey: key,
        }
    }
}

// In the order of the identities.  Best effort: user ids that don't
// contain a parsable email address are skipped.
#[allow(deprecated)]
fn emails(identities: &[String]) -> Vec<String> {
    let mut emails: Vec<String> = Vec::new();
    for identity in identities {
        if let Ok(Some(email)) = UserID::from(identity.as_str()).email() {
            let email = email.to_lowercase();
            if ! emails.contains(&email) {
                emails.push(email);
            }
        }
    }
    emails
}

fn identities(cert: &Cert, now: SystemTime) -> Vec<String> {
    let vc = cert.with_policy(crate::P, now).ok();
    let primary = vc.as_ref()
        .and_then(|vc| vc.primary_userid().ok())
        .map(|ua| ua.userid().clone());

    let mut identities = Vec::new();
    for ua in cert.userids() {
        let valid = vc.as_ref()
            .and_then(|vc| ua.clone().with_policy(vc.policy(), vc.time()).ok())
            .map(|vua| ! matches!(vua.revocation_status(),
                                  RevocationStatus::Revoked(_)))
            .unwrap_or(false);
        let is_primary = primary.as_ref() == Some(ua.userid());
        let created = ua.self_signatures()
            .filter_map(|sig| sig.signature_creation_time())
            .max();

        identities.push(
            ((valid, is_primary, created),
             String::from_utf8_lossy(ua.userid().value()).into_owned()));
    }

    identities.sort_by_key(|(order, _)| Reverse(*order));
    identities.into_iter().map(|(_, identity)| identity).collect()
}

// Self signatures have been verified when the certificate was
// canonicalized.
fn last_modified(cert: &Cert) -> Option<SystemTime> {
    let mut latest = None;
    let mut update = |sig: &openpgp::packet::Signature| {
        if let Some(t) = sig.signature_creation_time() {
            latest = cmp::max(latest, Some(t));
        }
    };

    for sig in cert.primary_key().self_signatures() {
        update(sig);
    }
    for ua in cert.userids() {
        for sig in ua.self_signatures() {
            update(sig);
        }
    }
    for ka in cert.keys().subkeys() {
        for sig in ka.self_signatures() {
            update(sig);
        }
    }

    latest
}
