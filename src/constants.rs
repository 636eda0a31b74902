use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use sequoia_openpgp as openpgp;
use openpgp::types::PublicKeyAlgorithm;

// RSA keys shorter than this are removed before any capability
// decision is made.
pub const MIN_RSA_BITS: usize = 2048;

// When a key has expired, capabilities are re-resolved this long
// before the expiration time.
pub const EXPIRED_RETRY_OFFSET: Duration = Duration::from_secs(1);

// The environment variable that enables tracing in release builds.
pub const TRACE_ENV: &str = "PGP_KEYCAPS_TRACE";

// The GnuPG private S2K type used for secret key stubs (gnu-dummy
// and divert-to-card).
pub const GNU_DUMMY_S2K_TAG: u8 = 101;

lazy_static::lazy_static! {
    // Algorithms subject to the RSA bit length check.
    #[allow(deprecated)]
    pub static ref WEAK_CHECKED_ALGOS: HashSet<PublicKeyAlgorithm> = [
        PublicKeyAlgorithm::RSAEncryptSign,
        PublicKeyAlgorithm::RSAEncrypt,
        PublicKeyAlgorithm::RSASign,
    ].into_iter().collect();

    // The number of key parameters (public and secret) a complete
    // secret key packet stores, per algorithm.
    #[allow(deprecated)]
    pub static ref REQUIRED_PARAM_COUNT: HashMap<PublicKeyAlgorithm, usize> = [
        (PublicKeyAlgorithm::RSAEncryptSign, 6),
        (PublicKeyAlgorithm::RSAEncrypt, 6),
        (PublicKeyAlgorithm::RSASign, 6),
        (PublicKeyAlgorithm::DSA, 5),
        (PublicKeyAlgorithm::ElGamalEncrypt, 4),
        (PublicKeyAlgorithm::ElGamalEncryptSign, 4),
        (PublicKeyAlgorithm::ECDSA, 2),
        (PublicKeyAlgorithm::ECDH, 3),
        (PublicKeyAlgorithm::EdDSA, 3),
    ].into_iter().collect();

    // Algorithms that can't encrypt: their encryption flags are
    // masked.
    #[allow(deprecated)]
    pub static ref SIGN_ONLY_ALGOS: HashSet<PublicKeyAlgorithm> = [
        PublicKeyAlgorithm::DSA,
        PublicKeyAlgorithm::RSASign,
        PublicKeyAlgorithm::ECDSA,
        PublicKeyAlgorithm::EdDSA,
    ].into_iter().collect();

    // Algorithms that can't sign: their signing flags are masked.
    #[allow(deprecated)]
    pub static ref ENCRYPT_ONLY_ALGOS: HashSet<PublicKeyAlgorithm> = [
        PublicKeyAlgorithm::RSAEncrypt,
        PublicKeyAlgorithm::ElGamalEncrypt,
        PublicKeyAlgorithm::ECDH,
    ].into_iter().collect();
}
