//! Decides which (sub)keys of a certificate can be used.
//!
//! Usage is decided on the certificate after the weak subkeys have
//! been removed.  When a certificate has expired, the decision is
//! repeated just before the expiration time: callers want to know
//! that a key would be usable if it were extended, and which key that
//! would be.

use std::cmp::Reverse;
use std::time::{
    Duration,
    SystemTime,
};

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::Fingerprint;
use openpgp::cert::prelude::*;
use openpgp::packet::Signature;
use openpgp::types::{
    KeyFlags,
    PublicKeyAlgorithm,
    RevocationStatus,
};

use crate::constants::{
    ENCRYPT_ONLY_ALGOS,
    EXPIRED_RETRY_OFFSET,
    SIGN_ONLY_ALGOS,
};
use crate::secret::is_missing_secret;
use crate::weak::FilteredCert;

/// A certificate's expiration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    At(SystemTime),
    Never,
    /// The certificate has no valid binding signature at the
    /// reference time.
    Unknown,
}

impl Expiration {
    /// Returns the certificate's expiration time as of `now`.
    pub fn of(cert: &Cert, now: SystemTime) -> Self {
        match cert.with_policy(crate::P, now) {
            Ok(vc) => match vc.primary_key().key_expiration_time() {
                Some(t) => Expiration::At(t),
                None => Expiration::Never,
            },
            Err(_) => Expiration::Unknown,
        }
    }

    /// Returns whether the certificate expired before `now`.
    pub fn expired(&self, now: SystemTime) -> bool {
        matches!(self, Expiration::At(t) if *t < now)
    }
}

/// What a key is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Encryption,
    Signing,
}

impl Usage {
    fn permits(&self, flags: &KeyFlags) -> bool {
        match self {
            Usage::Encryption =>
                flags.for_transport_encryption()
                || flags.for_storage_encryption(),
            Usage::Signing => flags.for_signing(),
        }
    }
}

/// The result of resolving a certificate's capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The key to encrypt to at the reference time.
    pub encryption: Option<Fingerprint>,
    /// The key to encrypt to, ignoring the certificate's expiration.
    pub encryption_ignoring_expiration: Option<Fingerprint>,
    /// The key to sign with at the reference time.
    pub signing: Option<Fingerprint>,
    /// The key to sign with, ignoring the certificate's expiration.
    pub signing_ignoring_expiration: Option<Fingerprint>,
    pub missing_private_key_for_signing: bool,
    pub missing_private_key_for_decryption: bool,
}

impl Capabilities {
    pub fn usable_for_encryption(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn usable_for_encryption_but_expired(&self) -> bool {
        self.encryption.is_none()
            && self.encryption_ignoring_expiration.is_some()
    }

    pub fn usable_for_signing(&self) -> bool {
        self.signing.is_some()
    }

    pub fn usable_for_signing_but_expired(&self) -> bool {
        self.signing.is_none()
            && self.signing_ignoring_expiration.is_some()
    }
}

/// Resolves the encryption and signing keys of a certificate.
///
/// Nothing is usable if the primary key is weak.
pub fn resolve(filtered: &FilteredCert, now: SystemTime) -> Capabilities {
    tracer!(*crate::TRACE, "capability::resolve");

    let cert = &filtered.cert;
    if ! filtered.is_primary_key_strong {
        t!("{}: weak primary key, nothing is usable", cert.fingerprint());
        return Capabilities::default();
    }

    let expiration = Expiration::of(cert, now);
    let retry_at = match expiration {
        Expiration::At(t) if t < now =>
            t.checked_sub(EXPIRED_RETRY_OFFSET),
        _ => None,
    };
    t!("{}: expiration: {:?}, retrying at: {:?}",
       cert.fingerprint(), expiration, retry_at);

    let resolve_twice = |usage| {
        let at_now = usable_key(cert, usage, now);
        let ignoring_expiration = at_now.clone().or_else(|| {
            retry_at.and_then(|t| usable_key(cert, usage, t))
        });
        (at_now, ignoring_expiration)
    };

    let (encryption, encryption_ignoring_expiration)
        = resolve_twice(Usage::Encryption);
    let (signing, signing_ignoring_expiration)
        = resolve_twice(Usage::Signing);

    let missing_secret = |fpr: &Option<Fingerprint>| {
        fpr.as_ref()
            .and_then(|fpr| cert.keys().secret().key_handle(fpr.clone()).next())
            .map(|ka| is_missing_secret(ka.key()))
            .unwrap_or(false)
    };

    let caps = Capabilities {
        missing_private_key_for_signing:
            missing_secret(&signing_ignoring_expiration),
        missing_private_key_for_decryption:
            missing_secret(&encryption_ignoring_expiration),
        encryption,
        encryption_ignoring_expiration,
        signing,
        signing_ignoring_expiration,
    };
    t!("{}: {:?}", cert.fingerprint(), caps);
    caps
}

/// Returns the key to use for `usage` at time `t`.
///
/// Subkeys are preferred over the primary key, and newer subkeys over
/// older ones.
pub fn usable_key(cert: &Cert, usage: Usage, t: SystemTime)
    -> Option<Fingerprint>
{
    tracer!(*crate::TRACE, "capability::usable_key");

    let vc = match cert.with_policy(crate::P, t) {
        Ok(vc) => vc,
        Err(err) => {
            t!("{}: no valid binding at {:?}: {}", cert.fingerprint(), t, err);
            return None;
        }
    };
    if let Err(err) = vc.alive() {
        t!("{}: not alive at {:?}: {}", cert.fingerprint(), t, err);
        return None;
    }
    if let RevocationStatus::Revoked(_) = vc.revocation_status() {
        t!("{}: revoked", cert.fingerprint());
        return None;
    }

    let (primary, mut subkeys): (Vec<_>, Vec<_>)
        = vc.keys().partition(|ka| ka.primary());
    subkeys.sort_by_key(|ka| Reverse(ka.key().creation_time()));

    for ka in subkeys.iter().chain(primary.iter()) {
        if ka.alive().is_err() {
            continue;
        }
        if let RevocationStatus::Revoked(_) = ka.revocation_status() {
            continue;
        }

        let fpr = ka.fingerprint();
        match usage_flags(cert, &fpr, t) {
            Some(flags) if usage.permits(&flags) => {
                t!("{}: using {} for {:?}", cert.fingerprint(), fpr, usage);
                return Some(fpr);
            }
            _ => (),
        }
    }

    None
}

/// Returns the usage flags of the key `fpr` at time `t`.
///
/// The flags come from the key's best self signature: for subkeys the
/// newest binding signature, for the primary key the self
/// certification of the primary user id (or a direct key signature if
/// there are no user ids).  Self certifications of user ids that are
/// revoked at `t` only count if no other user id has one.  Flags the
/// key's algorithm can't honor are cleared.
pub fn usage_flags(cert: &Cert, fpr: &Fingerprint, t: SystemTime)
    -> Option<KeyFlags>
{
    // Each candidate is paired with whether its component is revoked.
    let mut candidates: Vec<(bool, &Signature)> = Vec::new();
    let algo;

    let primary = cert.primary_key();
    if primary.fingerprint() == *fpr {
        algo = primary.key().pk_algo();
        for ua in cert.userids() {
            let revoked = userid_revoked(&ua, t);
            candidates.extend(ua.self_signatures().map(|sig| (revoked, sig)));
        }
        if candidates.is_empty() {
            candidates.extend(
                primary.self_signatures().map(|sig| (false, sig)));
        }
    } else {
        let ka = cert.keys().subkeys().key_handle(fpr.clone()).next()?;
        algo = ka.key().pk_algo();
        candidates.extend(ka.self_signatures().map(|sig| (false, sig)));
    }

    let (_, winner) = candidates.into_iter()
        .filter(|(_, sig)| sig.signature_alive(t, Duration::new(0, 0)).is_ok())
        .max_by_key(|(revoked, sig)| (! revoked,
                                      sig.primary_userid().unwrap_or(false),
                                      sig.signature_creation_time()))?;

    winner.key_flags().map(|flags| mask(algo, flags))
}

// Whether the user id is revoked at time `t`.  A user id without a
// valid binding at `t` counts as revoked if it has any self
// revocation.
fn userid_revoked(ua: &UserIDAmalgamation, t: SystemTime) -> bool {
    match ua.clone().with_policy(crate::P, t) {
        Ok(vua) => matches!(vua.revocation_status(),
                            RevocationStatus::Revoked(_)),
        Err(_) => ua.self_revocations().next().is_some(),
    }
}

// Clears the flags the algorithm can't honor.
fn mask(algo: PublicKeyAlgorithm, flags: KeyFlags) -> KeyFlags {
    if SIGN_ONLY_ALGOS.contains(&algo) {
        flags.clear_transport_encryption().clear_storage_encryption()
    } else if ENCRYPT_ONLY_ALGOS.contains(&algo) {
        flags.clear_signing().clear_certification()
    } else {
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use openpgp::Packet;
    use openpgp::cert::UserIDRevocationBuilder;
    use openpgp::packet::{
        UserID,
        signature::SignatureBuilder,
    };
    use openpgp::types::{
        ReasonForRevocation,
        SignatureType,
    };

    use crate::weak::filter;
    use crate::tests::*;

    fn resolve_now(cert: &Cert) -> Capabilities {
        resolve(&filter(cert).unwrap(), SystemTime::now())
    }

    #[test]
    fn general_purpose_cert() {
        let cert = general_purpose("Alice <alice@example.org>");
        let caps = resolve_now(&cert);

        assert!(caps.usable_for_encryption());
        assert!(caps.usable_for_signing());
        assert!(! caps.usable_for_encryption_but_expired());
        assert!(! caps.usable_for_signing_but_expired());
        assert!(! caps.missing_private_key_for_signing);
        assert!(! caps.missing_private_key_for_decryption);

        // Both are subkeys.
        assert_ne!(caps.encryption.as_ref(), Some(&cert.fingerprint()));
        assert_ne!(caps.signing.as_ref(), Some(&cert.fingerprint()));
        assert_eq!(caps.encryption, caps.encryption_ignoring_expiration);
    }

    #[test]
    fn weak_encryption_subkey() {
        let cert = rsa_cert(4096, "Bob <bob@example.org>");
        let cert = add_rsa_subkey(cert, 1024);

        let caps = resolve_now(&cert);
        assert!(! caps.usable_for_encryption());
        assert!(! caps.usable_for_encryption_but_expired());
        // The primary key is still good for signing.
        assert_eq!(caps.signing, Some(cert.fingerprint()));

        let cert = add_rsa_subkey(cert, 3072);
        let caps = resolve_now(&cert);
        assert!(caps.usable_for_encryption());
        assert_eq!(caps.encryption, Some(subkey_with_bits(&cert, 3072)));
    }

    #[test]
    fn weak_primary() {
        let cert = rsa_cert(1024, "Carol <carol@example.org>");
        let cert = add_rsa_subkey(cert, 3072);

        let caps = resolve_now(&cert);
        assert_eq!(caps, Capabilities::default());
    }

    #[test]
    fn expired() {
        let day = Duration::new(24 * 60 * 60, 0);
        let created = whole_seconds(SystemTime::now() - 10 * day);
        let cert = expiring("Dave <dave@example.org>", created, day);

        let exp = Expiration::of(&cert, SystemTime::now());
        assert_eq!(exp, Expiration::At(created + day));
        assert!(exp.expired(SystemTime::now()));

        let caps = resolve_now(&cert);
        assert!(! caps.usable_for_encryption());
        assert!(caps.usable_for_encryption_but_expired());
        assert!(! caps.usable_for_signing());
        assert!(caps.usable_for_signing_but_expired());

        // Before the expiration, it is just usable.
        let caps = resolve(&filter(&cert).unwrap(), created + day / 2);
        assert!(caps.usable_for_encryption());
        assert!(! caps.usable_for_encryption_but_expired());
    }

    #[test]
    fn never_expires() {
        let cert = rsa_cert(2048, "Eve <eve@example.org>");
        assert_eq!(Expiration::of(&cert, SystemTime::now()),
                   Expiration::Never);
        // Before the key existed.
        assert_eq!(Expiration::of(&cert, cert.primary_key().creation_time()
                                  - Duration::new(3600, 0)),
                   Expiration::Unknown);
    }

    #[test]
    fn dummy_decryption_key() {
        let cert = with_dummy_encryption_subkey(
            general_purpose("Frank <frank@example.org>"));

        let caps = resolve_now(&cert);
        assert!(caps.usable_for_encryption());
        assert!(caps.missing_private_key_for_decryption);
        assert!(! caps.missing_private_key_for_signing);
    }

    #[test]
    fn public_cert_is_not_missing_anything() {
        let cert = general_purpose("Grace <grace@example.org>")
            .strip_secret_key_material();

        let caps = resolve_now(&cert);
        assert!(caps.usable_for_encryption());
        assert!(! caps.missing_private_key_for_decryption);
        assert!(! caps.missing_private_key_for_signing);
    }

    #[test]
    fn usage_flags_of_primary() {
        let cert = rsa_cert(2048, "Heidi <heidi@example.org>");
        let flags = usage_flags(&cert, &cert.fingerprint(),
                                SystemTime::now()).unwrap();
        assert!(flags.for_signing());
        assert!(flags.for_certification());
        assert!(! flags.for_transport_encryption());
    }

    #[test]
    fn revoked_userid_loses_to_valid_userid() {
        let cert = rsa_cert(3072, "Old <old@example.org>");
        let mut signer = cert.primary_key().key().clone()
            .parts_into_secret().unwrap()
            .into_keypair().unwrap();

        let new = UserID::from("New <new@example.org>");
        let builder = SignatureBuilder::new(SignatureType::PositiveCertification)
            .set_key_flags(KeyFlags::empty().set_certification())
            .unwrap();
        let binding = new.bind(&mut signer, &cert, builder).unwrap();
        let cert = cert.insert_packets(
            vec![ Packet::from(new), binding.into() ]).unwrap();

        // The primary user id decides.
        let flags = usage_flags(&cert, &cert.fingerprint(),
                                SystemTime::now()).unwrap();
        assert!(flags.for_signing());
        assert!(resolve_now(&cert).usable_for_signing());

        let old = UserID::from("Old <old@example.org>");
        let revocation = UserIDRevocationBuilder::new()
            .set_reason_for_revocation(ReasonForRevocation::UIDRetired, b"")
            .unwrap()
            .build(&mut signer, &cert, &old, None)
            .unwrap();
        let cert = cert.insert_packets(
            vec![ Packet::from(revocation) ]).unwrap();

        let flags = usage_flags(&cert, &cert.fingerprint(),
                                SystemTime::now()).unwrap();
        assert!(! flags.for_signing());
        assert!(flags.for_certification());

        let caps = resolve_now(&cert);
        assert!(! caps.usable_for_signing());
        assert!(! caps.usable_for_signing_but_expired());
    }

    #[test]
    #[allow(deprecated)]
    fn masking() {
        let all = KeyFlags::empty()
            .set_certification()
            .set_signing()
            .set_transport_encryption()
            .set_storage_encryption();

        let flags = mask(PublicKeyAlgorithm::EdDSA, all.clone());
        assert!(flags.for_signing());
        assert!(! flags.for_transport_encryption());
        assert!(! flags.for_storage_encryption());

        let flags = mask(PublicKeyAlgorithm::ECDH, all.clone());
        assert!(! flags.for_signing());
        assert!(! flags.for_certification());
        assert!(flags.for_transport_encryption());

        let flags = mask(PublicKeyAlgorithm::RSAEncryptSign, all.clone());
        assert_eq!(flags, all);
    }
}
