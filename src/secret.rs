//! Secret key material inspection.
//!
//! Sequoia represents a GnuPG stub (a secret key packet whose
//! material lives on a smartcard, or was deliberately left out) as
//! encrypted secret key material with a private S2K.  Such packets are
//! valid but unusable: they are never "decrypted", and they never
//! carry a secret parameter.

use sequoia_openpgp as openpgp;
use openpgp::crypto::SessionKey;
use openpgp::crypto::S2K;
use openpgp::crypto::mpi;
use openpgp::packet::{
    key,
    Key,
    signature::SignatureBuilder,
};
use openpgp::packet::pkesk::PKESK3;
use openpgp::types::{
    PublicKeyAlgorithm,
    SignatureType,
    SymmetricAlgorithm,
};

use crate::constants::{
    GNU_DUMMY_S2K_TAG,
    REQUIRED_PARAM_COUNT,
};

// Signed and verified by the signing self-check.
const SELF_CHECK_MESSAGE: &[u8] = b"pgp_keycaps secret key self-check";

/// The state of a secret key packet's secret key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretState {
    Decrypted,
    Encrypted,
    /// A GnuPG stub.
    Dummy,
}

/// Returns the state of the key's secret key material.
pub fn secret_state<R>(key: &Key<key::SecretParts, R>) -> SecretState
    where R: key::KeyRole
{
    match key.secret() {
        key::SecretKeyMaterial::Unencrypted(_) => SecretState::Decrypted,
        key::SecretKeyMaterial::Encrypted(e) => {
            if is_dummy_s2k(e.s2k()) {
                SecretState::Dummy
            } else {
                SecretState::Encrypted
            }
        }
    }
}

/// Returns whether the key is a GnuPG stub.
pub fn is_dummy<R>(key: &Key<key::SecretParts, R>) -> bool
    where R: key::KeyRole
{
    secret_state(key) == SecretState::Dummy
}

fn is_dummy_s2k(s2k: &S2K) -> bool {
    matches!(s2k, S2K::Private { tag, .. } if *tag == GNU_DUMMY_S2K_TAG)
}

// The number of public parameters the algorithm stores.  The curve
// is only counted for EdDSA.
#[allow(deprecated)]
fn public_param_count(algo: PublicKeyAlgorithm) -> usize {
    use PublicKeyAlgorithm::*;
    match algo {
        RSAEncryptSign | RSAEncrypt | RSASign => 2,
        DSA => 4,
        ElGamalEncrypt | ElGamalEncryptSign => 3,
        ECDSA => 1,
        ECDH => 2,
        EdDSA => 2,
        _ => 0,
    }
}

#[allow(deprecated)]
fn full_secret_param_count(algo: PublicKeyAlgorithm) -> usize {
    use PublicKeyAlgorithm::*;
    match algo {
        RSAEncryptSign | RSAEncrypt | RSASign => 4,
        _ => 1,
    }
}

fn secret_mpi_count(mpis: &mpi::SecretKeyMaterial) -> usize {
    match mpis {
        mpi::SecretKeyMaterial::RSA { .. } => 4,
        mpi::SecretKeyMaterial::Unknown { mpis, .. } => mpis.len(),
        _ => 1,
    }
}

/// Returns the number of key parameters the packet stores.
///
/// Encrypted secret key material is assumed to be complete; a GnuPG
/// stub stores no secret parameters.
pub fn stored_param_count<R>(key: &Key<key::SecretParts, R>) -> usize
    where R: key::KeyRole
{
    let algo = key.pk_algo();
    let secret = match key.secret() {
        key::SecretKeyMaterial::Unencrypted(u) => u.map(secret_mpi_count),
        key::SecretKeyMaterial::Encrypted(e) if is_dummy_s2k(e.s2k()) => 0,
        key::SecretKeyMaterial::Encrypted(_) =>
            full_secret_param_count(algo),
    };

    public_param_count(algo) + secret
}

/// Returns whether the packet stores fewer parameters than its
/// algorithm requires.
///
/// This detects truncated secret key material, which is different
/// from secret key material that is merely encrypted.
pub fn is_missing_secret<R>(key: &Key<key::SecretParts, R>) -> bool
    where R: key::KeyRole
{
    match REQUIRED_PARAM_COUNT.get(&key.pk_algo()) {
        Some(required) => stored_param_count(key) < *required,
        None => false,
    }
}

/// Checks that decrypted secret key material matches the public key.
///
/// Signing-capable keys sign and verify a fixed message, encryption-capable
/// keys encrypt and decrypt a session key.  Encrypted secret key
/// material and GnuPG stubs can't be checked and are accepted.
pub fn validate_secret<R>(key: &Key<key::SecretParts, R>)
    -> openpgp::Result<()>
    where R: key::KeyRole
{
    if secret_state(key) != SecretState::Decrypted {
        return Ok(());
    }

    let key = key.clone().role_into_unspecified();
    let algo = key.pk_algo();
    let mut keypair = key.clone().into_keypair()?;

    if algo.for_signing() {
        match SignatureBuilder::new(SignatureType::Binary)
            .sign_message(&mut keypair, SELF_CHECK_MESSAGE)
        {
            Ok(mut sig) => sig.verify_message(&key, SELF_CHECK_MESSAGE)?,
            Err(err) if unsupported(&err) => (),
            Err(err) => return Err(err),
        }
    }

    if algo.for_encryption() {
        let sk = SessionKey::new(32);
        let pkesk = match PKESK3::for_recipient(
            SymmetricAlgorithm::AES256, &sk, &key)
        {
            Ok(pkesk) => pkesk,
            Err(err) if unsupported(&err) => return Ok(()),
            Err(err) => return Err(err),
        };
        match pkesk.decrypt(&mut keypair, Some(SymmetricAlgorithm::AES256)) {
            Some((_, decrypted)) if decrypted[..] == sk[..] => (),
            _ => return Err(anyhow::anyhow!(
                "secret key material does not decrypt what the \
                 public key encrypted")),
        }
    }

    Ok(())
}

// Whether the crypto backend can't handle the algorithm.  Such keys
// can't be checked, but they aren't corrupt either.
fn unsupported(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<openpgp::Error>(),
             Some(openpgp::Error::UnsupportedPublicKeyAlgorithm(_))
             | Some(openpgp::Error::UnsupportedEllipticCurve(_)))
}
