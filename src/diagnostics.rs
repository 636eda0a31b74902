//! Human readable dumps of a key's internal state.

use std::fmt::Write;
use std::time::SystemTime;

use chrono::{
    DateTime,
    TimeZone,
    Utc,
};

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::types::{
    KeyFlags,
    RevocationStatus,
};

use crate::Key;
use crate::KeyAlgo;
use crate::Result;
use crate::capability::usage_flags;
use crate::secret::{
    secret_state,
    SecretState,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

fn timestamp(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format(TIME_FORMAT).to_string()
}

// Formats milliseconds since the epoch like `timestamp`.
fn timestamp_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format(TIME_FORMAT).to_string(),
        None => format!("{} ms", ms),
    }
}

fn flags(flags: Option<KeyFlags>) -> String {
    let flags = match flags {
        Some(flags) => flags,
        None => return "none".into(),
    };

    let mut s = Vec::new();
    if flags.for_certification() { s.push("certify") }
    if flags.for_signing() { s.push("sign") }
    if flags.for_transport_encryption() { s.push("encrypt-transport") }
    if flags.for_storage_encryption() { s.push("encrypt-storage") }
    if flags.for_authentication() { s.push("authenticate") }
    if s.is_empty() {
        "none".into()
    } else {
        s.join(", ")
    }
}

fn algo(algo: &KeyAlgo) -> String {
    let mut s = algo.algorithm.clone();
    if let Some(bits) = algo.bits {
        write!(s, " {} bits", bits).ok();
    }
    if let Some(curve) = algo.curve.as_ref() {
        write!(s, " ({})", curve).ok();
    }
    s
}

fn fingerprint(fpr: &Option<openpgp::Fingerprint>) -> String {
    fpr.as_ref().map(|fpr| fpr.to_hex()).unwrap_or_else(|| "-".into())
}

/// Returns a multi-line description of the key.
pub fn key_details(key: &Key) -> Result<String> {
    let now = SystemTime::now();
    let cert = key.cert();

    let mut s = String::new();
    wrap_err!(
        details(&mut s, key, cert, now),
        UnknownError,
        "Formatting key details")?;
    Ok(s)
}

fn details(s: &mut String, key: &Key, cert: &openpgp::Cert, now: SystemTime)
    -> std::fmt::Result
{
    writeln!(s, "Key {}", key.id)?;
    writeln!(s, "  family: {:?}", key.family)?;
    writeln!(s, "  private: {}, fully decrypted: {}, fully encrypted: {}",
             key.is_private, key.fully_decrypted, key.fully_encrypted)?;
    writeln!(s, "  revoked: {}", key.revoked)?;
    writeln!(s, "  algorithm: {}", algo(&key.algo))?;
    writeln!(s, "  primary key strong: {}", key.is_primary_key_strong())?;
    writeln!(s, "  created: {}", timestamp_millis(key.created))?;
    match key.expiration {
        Some(t) => writeln!(s, "  expiration: {}", timestamp_millis(t))?,
        None => writeln!(s, "  expiration: never")?,
    }
    if let Some(t) = key.last_modified {
        writeln!(s, "  last modified: {}", timestamp_millis(t))?;
    }

    for ka in cert.keys() {
        let fpr = ka.fingerprint();
        writeln!(s, "  {} {}",
                 if ka.primary() { "primary" } else { "subkey" }, fpr)?;
        writeln!(s, "    longid: {}", ka.keyid())?;
        writeln!(s, "    algorithm: {}", algo(&KeyAlgo::of(ka.key())))?;
        writeln!(s, "    created: {}", timestamp(ka.key().creation_time()))?;

        let expiration = ka.clone().with_policy(crate::P, now).ok()
            .and_then(|vka| vka.key_expiration_time());
        match expiration {
            Some(t) => writeln!(s, "    expires: {}", timestamp(t))?,
            None => writeln!(s, "    expires: never")?,
        }

        writeln!(s, "    usage: {}", flags(usage_flags(cert, &fpr, now)))?;

        let secret = match ka.key().parts_as_secret() {
            Err(_) => "none",
            Ok(key) => match secret_state(key) {
                SecretState::Decrypted => "decrypted",
                SecretState::Encrypted => "encrypted",
                SecretState::Dummy => "dummy",
            },
        };
        writeln!(s, "    secret: {}", secret)?;
    }

    for ua in cert.userids() {
        let revoked = match ua.clone().with_policy(crate::P, now) {
            Ok(vua) => matches!(vua.revocation_status(),
                                RevocationStatus::Revoked(_)),
            Err(_) => false,
        };
        writeln!(s, "  user id {:?}",
                 String::from_utf8_lossy(ua.userid().value()))?;
        writeln!(s, "    self signatures: {}, revoked: {}",
                 ua.self_signatures().count(), revoked)?;
    }

    let caps = key.capabilities();
    writeln!(s, "  encryption key: {}", fingerprint(&caps.encryption))?;
    writeln!(s, "  encryption key ignoring expiration: {}",
             fingerprint(&caps.encryption_ignoring_expiration))?;
    writeln!(s, "  signing key: {}", fingerprint(&caps.signing))?;
    writeln!(s, "  signing key ignoring expiration: {}",
             fingerprint(&caps.signing_ignoring_expiration))?;
    writeln!(s, "  missing private key for signing: {}",
             caps.missing_private_key_for_signing)?;
    writeln!(s, "  missing private key for decryption: {}",
             caps.missing_private_key_for_decryption)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tests::*;

    #[test]
    fn dump() {
        let cert = with_dummy_encryption_subkey(
            general_purpose("Alice <alice@example.org>"));
        let key = Key::from_cert(cert.clone()).unwrap();
        let s = key_details(&key).unwrap();

        assert!(s.starts_with(&format!("Key {}", key.id)));
        assert!(s.contains(&format!("primary {}", cert.fingerprint())));
        assert_eq!(s.matches("  subkey ").count(), 2);
        assert!(s.contains("secret: dummy"));
        assert!(s.contains("secret: decrypted"));
        assert!(s.contains("user id \"Alice <alice@example.org>\""));
        assert!(s.contains("self signatures: 1, revoked: false"));
        assert!(s.contains("missing private key for decryption: true"));
        assert!(s.contains("(ed25519)"));
        assert!(s.contains("usage: certify"));
    }

    #[test]
    fn public_details() {
        let cert = rsa_cert(3072, "Bob <bob@example.org>")
            .strip_secret_key_material();
        let key = Key::from_cert(cert).unwrap();
        let s = key_details(&key).unwrap();

        assert!(s.contains("secret: none"));
        assert!(! s.contains("secret: decrypted"));
        assert!(s.contains("rsa_encrypt_sign 3072 bits"));
        assert!(s.contains("primary key strong: true"));
    }

    #[test]
    fn dates() {
        let day = std::time::Duration::new(24 * 60 * 60, 0);
        let created = whole_seconds(SystemTime::now() - 10 * day);
        let cert = expiring("Erin <erin@example.org>", created, 30 * day);
        let key = Key::from_cert(cert).unwrap();
        let s = key_details(&key).unwrap();

        let expires = timestamp(created + 30 * day);
        let created = timestamp(created);
        assert!(s.contains(&format!("\n  created: {}\n", created)));
        assert!(s.contains(&format!("\n  expiration: {}\n", expires)));
        assert!(s.contains(&format!("\n    created: {}\n", created)));
        assert!(s.contains(&format!("\n  last modified: {}\n", created)));
        assert_eq!(timestamp_millis(0), "1970-01-01 00:00:00 UTC");
    }
}
