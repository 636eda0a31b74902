//! Parses ascii armored keys.

use std::time::SystemTime;

use memmem::{Searcher, TwoWaySearcher};

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::parse::Parse;

use crate::Error;
use crate::Key;
use crate::Result;
use crate::secret::validate_secret;

// The longest excerpt of the input included in an error message.
const EXCERPT_LEN: usize = 64;

/// Parses exactly one key.
pub fn parse(text: &[u8]) -> Result<Key> {
    parse_at(text, SystemTime::now())
}

/// Parses exactly one key, and derives its projection as of `time`.
pub fn parse_at(text: &[u8], time: SystemTime) -> Result<Key> {
    let mut keys = parse_many_at(text, time)?;
    match keys.len() {
        1 => Ok(keys.remove(0)),
        n => Err(Error::ParseError(
            anyhow::anyhow!("Expected exactly one key, found {}", n),
            excerpt(text))),
    }
}

/// Parses all keys.
pub fn parse_many(text: &[u8]) -> Result<Vec<Key>> {
    parse_many_at(text, SystemTime::now())
}

/// Parses all keys, and derives their projections as of `time`.
///
/// Each ascii armor block is parsed separately.  A block may contain
/// a keyring.
pub fn parse_many_at(text: &[u8], time: SystemTime) -> Result<Vec<Key>> {
    tracer!(*crate::TRACE, "parse_many_at");

    // Get the start of each ascii armor block.
    let mut offsets = Vec::new();
    let searcher = TwoWaySearcher::new(b"-----BEGIN PGP");
    loop {
        let start = offsets.iter().last().map(|&i| i + 1).unwrap_or(0);
        if let Some(i) = searcher.search_in(&text[start..]) {
            offsets.push(start + i);
        } else {
            break;
        }
    }

    t!("armor block offsets: {:?}", offsets);

    if offsets.is_empty() {
        return Err(Error::ParseError(
            anyhow::anyhow!("No ascii armored key found"),
            excerpt(text)));
    }

    offsets.push(text.len());

    let mut keys = Vec::new();
    for offsets in offsets.windows(2) {
        let block = &text[offsets[0]..offsets[1]];
        keys.extend(parse_block(block, time)?);
    }

    Ok(keys)
}

fn parse_block(block: &[u8], time: SystemTime) -> Result<Vec<Key>> {
    tracer!(*crate::TRACE, "parse_block");

    let parser = wrap_err!(
        CertParser::from_bytes(block),
        ParseError,
        excerpt(block))?;

    let mut keys = Vec::new();
    for cert in parser {
        let cert = wrap_err!(cert, ParseError, excerpt(block))?;
        t!("Parsed {}", cert.fingerprint());

        for ka in cert.keys().secret() {
            wrap_err!(
                validate_secret(ka.key()),
                Validation,
                format!("{}: secret key material of {} is inconsistent",
                        cert.fingerprint(), ka.fingerprint()))?;
        }

        keys.push(Key::from_cert_at(cert, time)?);
    }

    if keys.is_empty() {
        return Err(Error::ParseError(
            anyhow::anyhow!("Armor block contains no key"),
            excerpt(block)));
    }

    Ok(keys)
}

// Returns the first line of the text, truncated.
fn excerpt(text: &[u8]) -> String {
    let line = text.split(|&b| b == b'\n').next().unwrap_or(&[]);
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end();
    if line.chars().count() > EXCERPT_LEN {
        format!("{}...", line.chars().take(EXCERPT_LEN).collect::<String>())
    } else {
        line.to_string()
    }
}
