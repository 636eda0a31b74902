//! Removes key packets that use weak algorithm parameters.
//!
//! Short RSA keys are not rejected outright.  A certificate often
//! carries a weak legacy subkey next to perfectly good ones, so only
//! the weak subkeys (and the signatures binding them) are dropped.  A
//! weak primary key can't be dropped: it is kept, and the caller is
//! told that nothing derived from the certificate can be trusted.

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::Packet;
use openpgp::packet::{
    key,
    Key,
};

use crate::constants::{
    MIN_RSA_BITS,
    WEAK_CHECKED_ALGOS,
};
use crate::Result;

/// A certificate with its weak subkeys removed.
#[derive(Debug, Clone)]
pub struct FilteredCert {
    pub cert: Cert,
    pub is_primary_key_strong: bool,
}

/// Returns whether the key uses an RSA modulus shorter than
/// `MIN_RSA_BITS`.
pub fn is_weak<P, R>(key: &Key<P, R>) -> bool
    where P: key::KeyParts,
          R: key::KeyRole,
{
    WEAK_CHECKED_ALGOS.contains(&key.pk_algo())
        && key.mpis().bits().unwrap_or(0) < MIN_RSA_BITS
}

/// Removes the weak subkeys from the certificate.
pub fn filter(cert: &Cert) -> Result<FilteredCert> {
    tracer!(*crate::TRACE, "weak::filter");

    let is_primary_key_strong = ! is_weak(cert.primary_key().key());
    if ! is_primary_key_strong {
        t!("{}: primary key is weak ({:?}, {:?} bits)",
           cert.fingerprint(),
           cert.primary_key().key().pk_algo(),
           cert.primary_key().key().mpis().bits());
    }

    // Signatures follow the component they belong to, so we drop
    // everything from a weak subkey up to the next component.
    let mut dropping = false;
    let mut packets = Vec::new();
    let mut dropped = 0;
    for packet in cert.clone().into_packets() {
        match &packet {
            Packet::PublicSubkey(k) => {
                dropping = is_weak(k);
                if dropping {
                    t!("{}: removing weak subkey {}",
                       cert.fingerprint(), k.fingerprint());
                }
            }
            Packet::SecretSubkey(k) => {
                dropping = is_weak(k);
                if dropping {
                    t!("{}: removing weak subkey {}",
                       cert.fingerprint(), k.fingerprint());
                }
            }
            Packet::Signature(_) => (),
            _ => dropping = false,
        }

        if dropping {
            dropped += 1;
            continue;
        }

        packets.push(packet);
    }

    if dropped == 0 {
        return Ok(FilteredCert {
            cert: cert.clone(),
            is_primary_key_strong,
        });
    }

    let cert = wrap_err!(
        Cert::from_packets(packets.into_iter()),
        UnknownError,
        format!("Reassembling {} without its weak subkeys",
                cert.fingerprint()))?;

    Ok(FilteredCert {
        cert,
        is_primary_key_strong,
    })
}
