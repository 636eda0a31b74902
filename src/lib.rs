//! OpenPGP key parsing, capability resolution, and lifecycle
//! operations.
//!
//! Armored key material is parsed into [`Key`]s: immutable snapshots
//! that answer what a key can be used for (encryption, signing),
//! whether its secret key material is present and decrypted, and who
//! it belongs to.  Weak subkeys are ignored when deciding a key's
//! capabilities.  Lifecycle operations (decrypting, encrypting,
//! revoking, signing) return new `Key`s, and [`verify`] checks
//! signatures against candidate keys.

use std::env;

use sequoia_openpgp as openpgp;
pub use openpgp::crypto::Password;
use openpgp::policy::{
    NullPolicy,
    StandardPolicy,
};

#[macro_use] mod log;
mod constants;
#[macro_use] mod error;
pub use error::{
    Error,
    ErrorCode,
    Result,
};

pub mod secret;
pub mod weak;
pub mod capability;
mod key;
pub use key::{
    fingerprint_to_keyid,
    Key,
    KeyAlgo,
    KeyFamily,
    PubkeyInfo,
};
mod parse;
pub use parse::{
    parse,
    parse_at,
    parse_many,
    parse_many_at,
};
mod lifecycle;
pub use lifecycle::{
    check_passphrase,
    decrypt_key,
    encrypt_key,
    revoke,
    sign,
    to_public,
};
mod verify;
pub use verify::{
    verify,
    SignedMessage,
    VerifyRes,
};
mod diagnostics;
pub use diagnostics::key_details;


// If the PGP_KEYCAPS_TRACE environment variable is set or we are
// built in debug mode, then enable tracing.
lazy_static::lazy_static! {
    static ref TRACE: bool = {
        if cfg!(debug_assertions) {
            true
        } else {
            env::var(constants::TRACE_ENV).is_ok()
        }
    };
}

/// The policy used for key capabilities and lifecycle operations.
///
/// Key material is judged by the crate's own rules (see [`weak`]),
/// not by a cryptographic policy.
pub const P: &NullPolicy = &NullPolicy::new();

/// The policy used when verifying message signatures.
pub const VERIFY_POLICY: &StandardPolicy = &StandardPolicy::new();
