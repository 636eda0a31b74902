// Transforms an error from some error type to the crate's Error.
macro_rules! wrap_err {
    ($e:expr, $err:ident, $msg:expr) => {
        $e.map_err(|err| {
            error!("Error: {}: {}\n{:?}",
                   err, $msg, backtrace::Backtrace::new());
            crate::error::Error::$err(
                anyhow::Error::from(err).into(),
                String::from($msg))
        })
    }
}

// We use Error rather than anyhow's error so that callers are forced
// to distinguish the structural failures from the expected runtime
// conditions.
pub type Result<T> = std::result::Result<T, Error>;

// Stable numeric status for callers that cross a language boundary.
pub type ErrorCode = i32;

#[enumber::into]
// XXX: This should be ErrorCode, but we can't use type aliases here :/.
#[repr(i32)]
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Parsing key material failed: {1}")]
    ParseError(#[source] anyhow::Error, String) = 0x0101,

    #[error("Unexpected key type: {0}")]
    UnexpectedKeyType(String) = 0x0102,

    #[error("Key packet {0} is already decrypted")]
    AlreadyDecrypted(String) = 0x0201,
    #[error("No secret key packet matches {0}")]
    NoMatchingKeyPacket(String) = 0x0202,
    #[error("Validating secret key material failed: {1}")]
    Validation(#[source] anyhow::Error, String) = 0x0203,
    #[error("Encrypting key failed: {0}")]
    EncryptionState(String) = 0x0204,
    #[error("Passphrase required: {0}")]
    PassphraseRequired(String) = 0x0205,

    #[error("Key unsuitable: {1}")]
    KeyUnsuitable(#[source] anyhow::Error, String) = 0x0301,

    #[error("Illegal value: {0}")]
    IllegalValue(String) = -4,
    #[error("Unknown error: {1}")]
    UnknownError(#[source] anyhow::Error, String) = -1,
}
