//! Signature verification.
//!
//! The outcome of each signature is recorded while the message is
//! processed and aggregated once the message has been read to the
//! end.  One bad signature makes the whole message unverified, even
//! if other signatures are good.

use std::io::Read;

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::Fingerprint;
use openpgp::KeyHandle;
use openpgp::cert::prelude::*;
use openpgp::crypto::SessionKey;
use openpgp::packet::{
    PKESK,
    SKESK,
    Signature,
};
use openpgp::parse::{
    Parse,
    stream::{
        DecryptionHelper,
        DecryptorBuilder,
        DetachedVerifierBuilder,
        GoodChecksum,
        MessageLayer,
        MessageStructure,
        VerificationError,
        VerificationHelper,
        VerifierBuilder,
    }
};
use openpgp::types::SymmetricAlgorithm;

use crate::Key;
use crate::KeyFamily;
use crate::PubkeyInfo;
use crate::key::fingerprint_to_keyid;
use crate::secret::{
    secret_state,
    SecretState,
};
use crate::weak;

/// A message whose signatures should be verified.
#[derive(Debug, Clone, Copy)]
pub enum SignedMessage<'a> {
    /// A signed message.
    Inline(&'a [u8]),
    /// Data and a detached signature over it.
    Detached {
        data: &'a [u8],
        signature: &'a [u8],
    },
    /// An encrypted, and possibly signed, message.  The decryption
    /// keys must be decrypted.
    Encrypted {
        message: &'a [u8],
        decryption_keys: &'a [Key],
    },
}

/// The result of a verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyRes {
    /// `None` if no signature could be checked, `Some(true)` if all
    /// checked signatures are good.
    pub matched: Option<bool>,
    /// The key IDs of all signatures' issuers, deduplicated.
    pub signer_longids: Vec<String>,
    /// The fingerprints of all signatures' issuers, deduplicated.
    pub signer_fingerprints: Vec<String>,
    /// The key IDs of the keys that were considered.
    pub supplied_longids: Vec<String>,
    /// The decrypted content of an encrypted message.
    pub content: Option<Vec<u8>>,
    pub error: Option<String>,
    /// Whether retrying (e.g., with other keys) can't help.
    pub is_err_fatal: Option<bool>,
}

// What happened to a signature we had a key for.
#[derive(Debug)]
enum Outcome {
    Good,
    Bad,
    // An error that no other key can fix.
    Fatal(String),
}

// Cookie used by the decryption and verification logic.
struct Helper<'a> {
    certs: Vec<Cert>,
    decryption_keys: &'a [Key],

    outcomes: Vec<Outcome>,
    signer_longids: Vec<String>,
    signer_fingerprints: Vec<String>,

    // Whether we decrypted anything.
    decrypted: bool,
}

impl<'a> Helper<'a> {
    fn new(certs: Vec<Cert>, decryption_keys: &'a [Key]) -> Self {
        Helper {
            certs,
            decryption_keys,
            outcomes: Vec::new(),
            signer_longids: Vec::new(),
            signer_fingerprints: Vec::new(),
            decrypted: false,
        }
    }

    // Records the issuers of a signature.
    fn issuers(&mut self, sig: &Signature) {
        for issuer in sig.get_issuers() {
            let (keyid, fpr) = match issuer {
                KeyHandle::KeyID(keyid) => (keyid, None),
                KeyHandle::Fingerprint(fpr) =>
                    (fingerprint_to_keyid(fpr.clone()), Some(fpr)),
            };

            let keyid = keyid.to_hex();
            if ! self.signer_longids.contains(&keyid) {
                self.signer_longids.push(keyid);
            }
            if let Some(fpr) = fpr {
                let fpr = fpr.to_hex();
                if ! self.signer_fingerprints.contains(&fpr) {
                    self.signer_fingerprints.push(fpr);
                }
            }
        }
    }
}

impl<'a> VerificationHelper for &mut Helper<'a> {
    fn get_certs(&mut self, ids: &[KeyHandle])
        -> openpgp::Result<Vec<Cert>>
    {
        Ok(self.certs.iter()
           .filter(|cert| {
               cert.keys().any(|ka| {
                   ids.iter().any(|id| id.aliases(&ka.key_handle()))
               })
           })
           .cloned()
           .collect())
    }

    fn check(&mut self, structure: MessageStructure)
        -> openpgp::Result<()>
    {
        tracer!(*crate::TRACE, "Helper::check");

        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    match result {
                        Ok(GoodChecksum { sig, ka }) => {
                            t!("Good signature ({:02X}{:02X}) from {}",
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               ka.cert().fingerprint());
                            self.issuers(sig);
                            self.outcomes.push(Outcome::Good);
                        }
                        Err(VerificationError::MalformedSignature { sig, error }) => {
                            t!("Malformed signature ({:02X}{:02X}) \
                                allegedly from {:?}: {}",
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               sig.issuers().next(),
                               error);
                            self.issuers(sig);
                            self.outcomes.push(Outcome::Bad);
                        }
                        Err(VerificationError::MissingKey { sig }) => {
                            // Signatures from keys we weren't given
                            // don't count.
                            t!("No key to check signature ({:02X}{:02X}) \
                                allegedly from {:?}",
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               sig.issuers().next());
                            self.issuers(sig);
                        }
                        Err(VerificationError::UnboundKey { sig, cert, error }) => {
                            t!("Certificate {} has no valid self-signature; \
                                can't check signature ({:02X}{:02X}): {}",
                               cert.fingerprint(),
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               error);
                            self.issuers(sig);
                            self.outcomes.push(Outcome::Bad);
                        }
                        Err(VerificationError::BadKey { sig, ka, error }) => {
                            // The certificate or the key is not alive
                            // or revoked, or the key is not signing
                            // capable.
                            t!("Can't check signature ({:02X}{:02X}): \
                                key {} is bad: {}",
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               ka.cert().fingerprint(),
                               error);
                            self.issuers(sig);
                            self.outcomes.push(Outcome::Bad);
                        }
                        Err(VerificationError::BadSignature { sig, ka, error }) => {
                            t!("Bad signature ({:02X}{:02X}) from {}: {}",
                               sig.digest_prefix()[0],
                               sig.digest_prefix()[1],
                               ka.cert().fingerprint(),
                               error);
                            self.issuers(sig);
                            self.outcomes.push(classify_bad_signature(&error));
                        }
                        #[allow(unreachable_patterns)]
                        Err(err) => {
                            t!("Can't check signature: {}", err);
                            self.outcomes.push(Outcome::Bad);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl<'a> DecryptionHelper for &mut Helper<'a> {
    fn decrypt<D>(&mut self, pkesks: &[PKESK], _: &[SKESK],
                  sym_algo: Option<SymmetricAlgorithm>,
                  mut decrypt: D)
        -> openpgp::Result<Option<Fingerprint>>
        where D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool
    {
        tracer!(*crate::TRACE, "Helper::decrypt");

        t!("{} PKESKs", pkesks.len());

        for pkesk in pkesks.iter() {
            let keyid = pkesk.recipient();
            t!("Considering PKESK for {}", keyid);

            for key in self.decryption_keys {
                for ka in key.cert().keys().secret() {
                    if ! keyid.is_wildcard() && ka.keyid() != *keyid {
                        continue;
                    }
                    if secret_state(ka.key()) != SecretState::Decrypted {
                        t!("Secret key material for {} is not decrypted",
                           ka.fingerprint());
                        continue;
                    }

                    let mut keypair = match ka.key().clone().into_keypair() {
                        Ok(keypair) => keypair,
                        Err(err) => {
                            t!("Creating keypair for {}: {}",
                               ka.fingerprint(), err);
                            continue;
                        }
                    };

                    match pkesk.decrypt(&mut keypair, sym_algo) {
                        Some((sym_algo, sk)) => {
                            if decrypt(sym_algo, &sk) {
                                self.decrypted = true;
                                return Ok(Some(key.fingerprint()));
                            }
                        }
                        None => {
                            t!("Failed to decrypt PKESK for {}",
                               ka.fingerprint());
                        }
                    }
                }
            }
        }

        Err(anyhow::anyhow!("None of the given keys can decrypt the message"))
    }
}

// A digest mismatch means the data was modified: verifying with
// another key won't change that, but it isn't an error either.
// Signatures that the policy rejects or that expired stay bad no
// matter what.
fn classify_bad_signature(error: &anyhow::Error) -> Outcome {
    match error.chain().find_map(|e| e.downcast_ref::<openpgp::Error>()) {
        Some(err @ openpgp::Error::PolicyViolation(_, _)) =>
            Outcome::Fatal(err.to_string()),
        Some(err @ openpgp::Error::Expired(_)) =>
            Outcome::Fatal(err.to_string()),
        _ => Outcome::Bad,
    }
}

// Whether an error from the message parser is fatal.
fn is_fatal(error: &anyhow::Error) -> bool {
    matches!(error.chain().find_map(|e| e.downcast_ref::<openpgp::Error>()),
             Some(openpgp::Error::MalformedMessage(_))
             | Some(openpgp::Error::ManipulatedMessage)
             | Some(openpgp::Error::PolicyViolation(_, _)))
}

// Processes the message.  Returns the content of encrypted messages.
fn process(message: SignedMessage, h: &mut Helper)
    -> openpgp::Result<Option<Vec<u8>>>
{
    let policy = crate::VERIFY_POLICY;

    match message {
        SignedMessage::Inline(msg) => {
            let mut verifier = VerifierBuilder::from_bytes(msg)?
                .with_policy(policy, None, h)?;
            let mut content = Vec::new();
            verifier.read_to_end(&mut content)?;
            Ok(None)
        }
        SignedMessage::Detached { data, signature } => {
            let mut verifier = DetachedVerifierBuilder::from_bytes(signature)?
                .with_policy(policy, None, h)?;
            verifier.verify_bytes(data)?;
            Ok(None)
        }
        SignedMessage::Encrypted { message, .. } => {
            let mut decryptor = DecryptorBuilder::from_bytes(message)?
                .with_policy(policy, None, h)?;
            let mut content = Vec::new();
            decryptor.read_to_end(&mut content)?;
            Ok(Some(content))
        }
    }
}

/// Verifies the message's signatures using the candidate keys.
///
/// Revoked candidates and candidates that aren't OpenPGP keys are
/// ignored.
pub fn verify(message: SignedMessage, candidates: &[PubkeyInfo]) -> VerifyRes {
    tracer!(*crate::TRACE, "verify");

    let candidates: Vec<&Key> = candidates.iter()
        .filter(|c| ! c.revoked && c.pubkey.family == KeyFamily::OpenPgp)
        .map(|c| &c.pubkey)
        .collect();

    let mut supplied_longids: Vec<String> = Vec::new();
    let mut certs = Vec::new();
    for key in candidates {
        for longid in key.longids() {
            if ! supplied_longids.contains(&longid) {
                supplied_longids.push(longid);
            }
        }

        match weak::filter(key.cert()) {
            Ok(filtered) => certs.push(filtered.cert),
            Err(err) => t!("Ignoring {}: {}", key.id, err),
        }
    }
    t!("{} candidate certificates", certs.len());

    let decryption_keys = match message {
        SignedMessage::Encrypted { decryption_keys, .. } => decryption_keys,
        _ => &[],
    };

    let mut h = Helper::new(certs, decryption_keys);
    let result = process(message, &mut h);

    let mut res = VerifyRes {
        signer_longids: h.signer_longids,
        signer_fingerprints: h.signer_fingerprints,
        supplied_longids,
        ..Default::default()
    };

    match result {
        Ok(content) => res.content = content,
        Err(err) => {
            t!("Processing message: {}", err);
            let fatal = is_fatal(&err);
            res.error = Some(if fatal {
                format!("Not equipped to verify this message: {}", err)
            } else {
                err.to_string()
            });
            res.is_err_fatal = Some(fatal);
            return res;
        }
    }

    for outcome in h.outcomes {
        match outcome {
            Outcome::Good => {
                res.matched = Some(res.matched.unwrap_or(true));
            }
            Outcome::Bad => {
                res.matched = Some(false);
            }
            Outcome::Fatal(err) => {
                res.matched = None;
                res.error = Some(err);
                res.is_err_fatal = Some(true);
                break;
            }
        }
    }

    t!("matched: {:?}, signers: {:?}", res.matched, res.signer_longids);

    res
}
