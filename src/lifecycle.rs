//! Operations that change a key: unlocking and locking its secret key
//! material, signing with it, and revoking it.
//!
//! None of these modify the `Key` they are given.  If the certificate
//! changes, a new `Key` is derived from the new certificate.

use std::io::Write;

use sequoia_openpgp as openpgp;
use openpgp::KeyID;
use openpgp::Packet;
use openpgp::armor;
use openpgp::cert::prelude::*;
use openpgp::crypto::Password;
use openpgp::packet::Signature;
use openpgp::serialize::{
    stream::{
        Armorer,
        LiteralWriter,
        Message,
        Signer,
    },
    Serialize,
};
use openpgp::types::{
    ReasonForRevocation,
    RevocationStatus,
};

use crate::Error;
use crate::Key;
use crate::Result;
use crate::secret::{
    secret_state,
    validate_secret,
    SecretState,
};

/// Decrypts the key's secret key material.
///
/// If `keyid` is given, only the matching key packet is decrypted,
/// otherwise all of them are.  GnuPG stubs are never decrypted.
///
/// Returns `None` if the passphrase is wrong.
pub fn decrypt_key(key: &Key, passphrase: &Password, keyid: Option<&KeyID>,
                   ok_if_already_decrypted: bool)
    -> Result<Option<Key>>
{
    tracer!(*crate::TRACE, "decrypt_key");

    key.check_family()?;

    let cert = key.cert();
    let targets: Vec<_> = cert.keys().secret()
        .filter(|ka| secret_state(ka.key()) != SecretState::Dummy)
        .filter(|ka| keyid.map(|keyid| ka.keyid() == *keyid).unwrap_or(true))
        .collect();
    if targets.is_empty() {
        return Err(Error::NoMatchingKeyPacket(
            match keyid {
                Some(keyid) => format!("{} in {}", keyid, key.id),
                None => key.id.clone(),
            }));
    }

    let mut decrypted: Vec<Packet> = Vec::new();
    for ka in targets {
        let fpr = ka.fingerprint();
        match secret_state(ka.key()) {
            SecretState::Decrypted if ok_if_already_decrypted => {
                t!("{} is already decrypted", fpr);
                continue;
            }
            SecretState::Decrypted =>
                return Err(Error::AlreadyDecrypted(fpr.to_hex())),
            SecretState::Dummy => continue,
            SecretState::Encrypted => (),
        }

        let k = match ka.key().clone().decrypt_secret(passphrase) {
            Ok(k) => k,
            Err(err) => {
                t!("Decrypting secret key material for {}: {}", fpr, err);
                return Ok(None);
            }
        };

        wrap_err!(
            validate_secret(&k),
            Validation,
            format!("Decrypted secret key material for {} is inconsistent",
                    fpr))?;

        decrypted.push(if ka.primary() {
            k.role_into_primary().into()
        } else {
            k.role_into_subordinate().into()
        });
    }

    t!("Decrypted {} key packets", decrypted.len());

    // insert_packets prefers the added versions of the keys.
    let cert = wrap_err!(
        cert.clone().insert_packets(decrypted),
        UnknownError,
        "Merging decrypted keys")?;

    Ok(Some(Key::from_cert_at(cert, key.reference_time())?))
}

/// Encrypts the key's secret key material with `passphrase`.
///
/// All secret key material must be decrypted.
pub fn encrypt_key(key: &Key, passphrase: &Password) -> Result<Key> {
    tracer!(*crate::TRACE, "encrypt_key");

    key.check_family()?;

    let unusable = passphrase.map(|p| {
        p.is_empty() || p[..] == b"undefined"[..] || p[..] == b"null"[..]
    });
    if unusable {
        return Err(Error::IllegalValue(
            "The passphrase must not be empty, \"undefined\" or \"null\"".into()));
    }

    let cert = key.cert();
    if ! cert.is_tsk() {
        return Err(Error::EncryptionState(
            format!("{} has no secret key material", key.id)));
    }

    let still_encrypted = cert.keys().secret()
        .filter(|ka| secret_state(ka.key()) == SecretState::Encrypted)
        .count();
    if still_encrypted > 0 {
        return Err(Error::EncryptionState(
            format!("{}: {} secret key packets are still encrypted",
                    key.id, still_encrypted)));
    }

    let mut encrypted: Vec<Packet> = Vec::new();
    for ka in cert.keys().secret() {
        if secret_state(ka.key()) != SecretState::Decrypted {
            continue;
        }

        let fpr = ka.fingerprint();
        let k = wrap_err!(
            ka.key().clone().encrypt_secret(passphrase),
            UnknownError,
            format!("Encrypting secret key material for {}", fpr))?;

        encrypted.push(if ka.primary() {
            k.role_into_primary().into()
        } else {
            k.role_into_subordinate().into()
        });
    }

    t!("Encrypted {} key packets", encrypted.len());

    let cert = wrap_err!(
        cert.clone().insert_packets(encrypted),
        UnknownError,
        "Merging encrypted keys")?;

    let key = Key::from_cert_at(cert, key.reference_time())?;
    if ! key.fully_encrypted {
        return Err(Error::EncryptionState(
            format!("{} is not fully encrypted", key.id)));
    }

    Ok(key)
}

/// Returns whether the passphrase decrypts the key's encrypted secret
/// key material.
///
/// The key is not changed.
pub fn check_passphrase(key: &Key, passphrase: &Password) -> Result<bool> {
    key.check_family()?;

    let cert = key.cert();
    if ! cert.is_tsk() {
        return Err(Error::EncryptionState(
            format!("{} has no secret key material", key.id)));
    }

    let mut encrypted = cert.keys().secret()
        .filter(|ka| secret_state(ka.key()) == SecretState::Encrypted)
        .peekable();
    if encrypted.peek().is_none() {
        return Err(Error::AlreadyDecrypted(key.id.clone()));
    }

    Ok(encrypted.all(|ka| ka.key().clone().decrypt_secret(passphrase).is_ok()))
}

/// Returns the key without its secret key material.
pub fn to_public(key: &Key) -> Result<Key> {
    key.check_family()?;
    Key::from_cert_at(key.cert().clone().strip_secret_key_material(),
                      key.reference_time())
}

/// Signs `data` with the key's signing (sub)key.
///
/// Returns an ascii armored detached signature, or an ascii armored
/// signed message.  The signing key's secret key material must be
/// decrypted.
pub fn sign(key: &Key, data: &[u8], detached: bool) -> Result<String> {
    tracer!(*crate::TRACE, "sign");

    key.check_family()?;

    let fpr = key.capabilities().signing.clone().ok_or_else(|| {
        Error::KeyUnsuitable(anyhow::anyhow!("No usable signing key"),
                             key.id.clone())
    })?;

    let ka = key.cert().keys().secret().key_handle(fpr.clone()).next()
        .ok_or_else(|| {
            Error::KeyUnsuitable(
                anyhow::anyhow!("No secret key material for {}", fpr),
                key.id.clone())
        })?;

    match secret_state(ka.key()) {
        SecretState::Decrypted => (),
        SecretState::Encrypted =>
            return Err(Error::PassphraseRequired(fpr.to_hex())),
        SecretState::Dummy =>
            return Err(Error::KeyUnsuitable(
                anyhow::anyhow!("{} is a GnuPG stub", fpr),
                key.id.clone())),
    }

    t!("Signing {} bytes with {} (detached: {})", data.len(), fpr, detached);

    let signer_keypair = wrap_err!(
        ka.key().clone().into_keypair(),
        UnknownError,
        "Creating key pair from signing key")?;

    let mut stext = Vec::new();

    let message = Message::new(&mut stext);

    let message = wrap_err!(
        Armorer::new(message)
            .kind(if detached {
                armor::Kind::Signature
            } else {
                armor::Kind::Message
            })
            .build(),
        UnknownError,
        "Setting up armorer")?;

    let signer = Signer::new(message, signer_keypair);
    let mut message = if detached {
        wrap_err!(
            signer.detached().build(),
            UnknownError,
            "Setting up signer")?
    } else {
        let message = wrap_err!(
            signer.build(),
            UnknownError,
            "Setting up signer")?;
        wrap_err!(
            LiteralWriter::new(message).build(),
            UnknownError,
            "Setting up literal writer")?
    };

    wrap_err!(
        message.write_all(data),
        UnknownError,
        "Signing message")?;

    wrap_err!(
        message.finalize(),
        UnknownError,
        "Finalizing message")?;

    wrap_err!(
        String::from_utf8(stext),
        UnknownError,
        "Armored signature is not UTF-8")
}

/// Revokes the key.
///
/// If the key is already revoked, it is returned unchanged together
/// with its existing revocation certificate.  Otherwise a revocation
/// certificate is generated using the primary key, which must be
/// decrypted.  The revoked key is derived as of now.
pub fn revoke(key: &Key) -> Result<(Key, Option<String>)> {
    tracer!(*crate::TRACE, "revoke");

    key.check_family()?;

    let cert = key.cert();
    if let RevocationStatus::Revoked(sigs) = cert.revocation_status(crate::P, None) {
        t!("{} is already revoked ({} revocations)", key.id, sigs.len());
        let rev = sigs.first().map(|sig| armor_revocation(sig)).transpose()?;
        return Ok((key.clone(), rev));
    }

    let primary = wrap_err!(
        cert.primary_key().key().clone().parts_into_secret(),
        KeyUnsuitable,
        format!("{}: no secret key material for the primary key", key.id))?;

    match secret_state(&primary) {
        SecretState::Decrypted => (),
        SecretState::Encrypted =>
            return Err(Error::PassphraseRequired(key.id.clone())),
        SecretState::Dummy =>
            return Err(Error::KeyUnsuitable(
                anyhow::anyhow!("The primary key is a GnuPG stub"),
                key.id.clone())),
    }

    let mut signer_keypair = wrap_err!(
        primary.into_keypair(),
        UnknownError,
        "Creating key pair from certification key")?;

    let sig = wrap_err!(
        cert.revoke(&mut signer_keypair,
                    ReasonForRevocation::Unspecified,
                    b""),
        UnknownError,
        "generating revocation certificate")?;

    let rev = armor_revocation(&sig)?;

    let cert = wrap_err!(
        cert.clone().insert_packets(sig),
        UnknownError,
        "merging revocation certificate")?;

    // The revocation is only visible from now on.
    let key = Key::from_cert(cert)?;
    t!("{} revoked: {}", key.id, key.revoked);

    Ok((key, Some(rev)))
}

// Returns the revocation certificate, ascii armored.
fn armor_revocation(sig: &Signature) -> Result<String> {
    let mut rev = Vec::new();

    let mut writer = wrap_err!(
        armor::Writer::new(&mut rev, armor::Kind::PublicKey),
        UnknownError,
        "Setting up armor writer")?;

    wrap_err!(
        Packet::from(sig.clone()).serialize(&mut writer),
        UnknownError,
        "Serializing revocation certificate")?;

    wrap_err!(
        writer.finalize(),
        UnknownError,
        "Finalizing armor")?;

    wrap_err!(
        String::from_utf8(rev),
        UnknownError,
        "Armored revocation certificate is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{
        Duration,
        SystemTime,
    };

    use crate::KeyFamily;
    use crate::tests::*;

    fn protected_key(uid: &str) -> Key {
        Key::from_cert(protected(uid)).unwrap()
    }

    #[test]
    fn decrypt() {
        let key = protected_key("Alice <alice@example.org>");
        assert!(key.fully_encrypted);

        // Wrong passphrase.
        let r = decrypt_key(&key, &"wrong".into(), None, false).unwrap();
        assert!(r.is_none());
        assert!(key.fully_encrypted);

        // Right passphrase.
        let decrypted = decrypt_key(&key, &PASSPHRASE.into(), None, false)
            .unwrap().unwrap();
        assert!(decrypted.fully_decrypted);
        assert!(! decrypted.fully_encrypted);
        assert_eq!(decrypted.id, key.id);
        for ka in decrypted.cert().keys().secret() {
            assert_eq!(secret_state(ka.key()), SecretState::Decrypted);
        }

        // The original is unchanged.
        assert!(key.fully_encrypted);
    }

    #[test]
    fn reference_time_is_kept() {
        let day = Duration::new(24 * 60 * 60, 0);
        let created = whole_seconds(SystemTime::now() - 10 * day);
        let then = created + day;

        let key = Key::from_cert_at(
            expiring("Judy <judy@example.org>", created, 5 * day), then)
            .unwrap();
        assert_eq!(key.reference_time(), then);
        assert!(key.usable_for_encryption);

        let encrypted = encrypt_key(&key, &PASSPHRASE.into()).unwrap();
        assert_eq!(encrypted.reference_time(), then);
        assert!(encrypted.usable_for_encryption);

        let decrypted = decrypt_key(&encrypted, &PASSPHRASE.into(), None, false)
            .unwrap().unwrap();
        assert_eq!(decrypted.reference_time(), then);
        assert!(decrypted.usable_for_encryption);

        let public = to_public(&key).unwrap();
        assert_eq!(public.reference_time(), then);
        assert!(public.usable_for_encryption);

        // As of now, the key has expired.
        let key = Key::from_cert(key.into_cert()).unwrap();
        assert!(! key.usable_for_encryption);
        assert!(key.usable_for_encryption_but_expired);
    }

    #[test]
    fn decrypt_already_decrypted() {
        let key = Key::from_cert(general_purpose("Bob <bob@example.org>"))
            .unwrap();

        assert!(matches!(decrypt_key(&key, &PASSPHRASE.into(), None, false),
                         Err(Error::AlreadyDecrypted(_))));

        let same = decrypt_key(&key, &PASSPHRASE.into(), None, true)
            .unwrap().unwrap();
        assert_eq!(same.id, key.id);
        assert!(same.fully_decrypted);
    }

    #[test]
    fn decrypt_one_packet() {
        let key = protected_key("Carol <carol@example.org>");
        let subkey = key.cert().keys().subkeys().next().unwrap().keyid();

        let partly = decrypt_key(&key, &PASSPHRASE.into(), Some(&subkey), false)
            .unwrap().unwrap();
        let states: Vec<(KeyID, SecretState)> = partly.cert().keys().secret()
            .map(|ka| (ka.keyid(), secret_state(ka.key())))
            .collect();
        for (keyid, state) in states {
            if keyid == subkey {
                assert_eq!(state, SecretState::Decrypted);
            } else {
                assert_eq!(state, SecretState::Encrypted);
            }
        }
        assert!(! partly.fully_decrypted);

        let other = KeyID::from_hex("0123456789ABCDEF").unwrap();
        assert!(matches!(
            decrypt_key(&key, &PASSPHRASE.into(), Some(&other), false),
            Err(Error::NoMatchingKeyPacket(_))));
    }

    #[test]
    fn decrypt_skips_stubs() {
        let key = Key::from_cert(with_dummy_encryption_subkey(
            general_purpose("Dave <dave@example.org>"))).unwrap();
        let stub = key.cert().keys().secret()
            .find(|ka| secret_state(ka.key()) == SecretState::Dummy)
            .unwrap()
            .keyid();

        assert!(matches!(
            decrypt_key(&key, &PASSPHRASE.into(), Some(&stub), false),
            Err(Error::NoMatchingKeyPacket(_))));
    }

    #[test]
    fn encrypt_rejects() {
        let key = Key::from_cert(general_purpose("Eve <eve@example.org>"))
            .unwrap();
        for bad in &[ "", "undefined", "null" ] {
            assert!(matches!(encrypt_key(&key, &(*bad).into()),
                             Err(Error::IllegalValue(_))));
        }

        let public = to_public(&key).unwrap();
        assert!(matches!(encrypt_key(&public, &PASSPHRASE.into()),
                         Err(Error::EncryptionState(_))));

        let encrypted = protected_key("Frank <frank@example.org>");
        match encrypt_key(&encrypted, &PASSPHRASE.into()) {
            Err(Error::EncryptionState(msg)) => assert!(msg.contains("3")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(encrypted.fully_encrypted);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = protected_key("Grace <Grace@example.org>");
        let decrypted = decrypt_key(&key, &PASSPHRASE.into(), None, false)
            .unwrap().unwrap();

        let encrypted = encrypt_key(&decrypted, &"new passphrase".into())
            .unwrap();
        assert!(encrypted.fully_encrypted);
        assert!(! encrypted.fully_decrypted);
        assert_eq!(encrypted.id, key.id);
        assert_eq!(encrypted.all_ids, key.all_ids);
        assert_eq!(encrypted.emails, key.emails);
        assert_eq!(encrypted.algo, key.algo);

        assert!(check_passphrase(&encrypted, &"new passphrase".into()).unwrap());
        assert!(! check_passphrase(&encrypted, &PASSPHRASE.into()).unwrap());
    }

    #[test]
    fn check_passphrase_states() {
        let key = protected_key("Heidi <heidi@example.org>");
        assert!(check_passphrase(&key, &PASSPHRASE.into()).unwrap());
        assert!(! check_passphrase(&key, &"wrong".into()).unwrap());

        let decrypted = decrypt_key(&key, &PASSPHRASE.into(), None, false)
            .unwrap().unwrap();
        assert!(matches!(check_passphrase(&decrypted, &PASSPHRASE.into()),
                         Err(Error::AlreadyDecrypted(_))));
    }

    #[test]
    fn sign_detached_and_inline() {
        let key = Key::from_cert(general_purpose("Ivan <ivan@example.org>"))
            .unwrap();

        let sig = sign(&key, b"hello", true).unwrap();
        assert!(sig.starts_with("-----BEGIN PGP SIGNATURE-----"));

        let msg = sign(&key, b"hello", false).unwrap();
        assert!(msg.starts_with("-----BEGIN PGP MESSAGE-----"));
    }

    #[test]
    fn sign_needs_decrypted_key() {
        let key = protected_key("Judy <judy@example.org>");
        assert!(matches!(sign(&key, b"hello", true),
                         Err(Error::PassphraseRequired(_))));

        let public = to_public(&key).unwrap();
        assert!(matches!(sign(&public, b"hello", true),
                         Err(Error::KeyUnsuitable(_, _))));
    }

    #[test]
    fn revoke_is_idempotent() {
        let key = Key::from_cert(general_purpose("Mallory <mallory@example.org>"))
            .unwrap();
        assert!(! key.revoked);

        let (revoked, rev) = revoke(&key).unwrap();
        assert!(revoked.revoked);
        assert!(! key.revoked);
        let rev = rev.unwrap();
        assert!(rev.starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----"));

        let (again, rev_again) = revoke(&revoked).unwrap();
        assert!(again.revoked);
        assert_eq!(again.cert(), revoked.cert());
        assert_eq!(rev_again.unwrap(), rev);
    }

    #[test]
    fn revoke_needs_decrypted_key() {
        let key = protected_key("Niaj <niaj@example.org>");
        assert!(matches!(revoke(&key), Err(Error::PassphraseRequired(_))));
    }

    #[test]
    fn x509_keys_are_rejected() {
        let mut key = protected_key("Olivia <olivia@example.org>");
        key.family = KeyFamily::X509;

        assert!(matches!(decrypt_key(&key, &PASSPHRASE.into(), None, false),
                         Err(Error::UnexpectedKeyType(_))));
        assert!(matches!(encrypt_key(&key, &PASSPHRASE.into()),
                         Err(Error::UnexpectedKeyType(_))));
        assert!(matches!(sign(&key, b"", true),
                         Err(Error::UnexpectedKeyType(_))));
        assert!(matches!(revoke(&key), Err(Error::UnexpectedKeyType(_))));
    }
}
