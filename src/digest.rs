//! Content digests and layer chain identities.
//!
//! A [`Digest`] is the `<algorithm>:<encoded>` string that names an immutable
//! blob. Only sha256 is ever produced by this crate; sha384 and sha512
//! digests are accepted when parsing, any other algorithm is rejected.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// The algorithm used for every digest this crate computes.
pub const SHA256: &str = "sha256";

static DIGEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<alg>[a-z0-9]+(?:[.+_-][a-z0-9]+)*):(?P<enc>[a-zA-Z0-9=_-]+)$")
        .expect("digest regex")
});

/// A validated content digest such as `sha256:e3b0c442...`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    ///
    /// ```
    /// # use imagestore::Digest;
    /// let d = Digest::parse(
    ///     "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
    /// ).unwrap();
    /// assert_eq!(d.algorithm(), "sha256");
    /// assert!(Digest::parse("sha256:xyz").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let Some(captures) = DIGEST_RE.captures(s) else {
            return Err(Error::InvalidParameter(format!("invalid digest format: {s:?}")));
        };
        let encoded = &captures["enc"];
        let len = match &captures["alg"] {
            "sha256" => 64,
            "sha384" => 96,
            "sha512" => 128,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported digest algorithm {other:?} in {s:?}"
                )))
            }
        };
        if encoded.len() != len || !is_lower_hex(encoded) {
            return Err(Error::InvalidParameter(format!(
                "invalid digest {s:?}: expected {len} lowercase hex characters"
            )));
        }
        Ok(Digest(s.to_string()))
    }

    /// Build a sha256 digest from its 64-character hex encoding.
    pub fn from_sha256_hex(hex: &str) -> Result<Self> {
        Self::parse(&format!("{SHA256}:{hex}"))
    }

    /// Hash `data` with sha256.
    pub fn from_content(data: &[u8]) -> Self {
        Digest(format!("{SHA256}:{}", hex::encode(Sha256::digest(data))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm part, before the colon.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(alg, _)| alg).unwrap_or_default()
    }

    /// The encoded part, after the colon.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, enc)| enc).unwrap_or_default()
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Digest {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the chain identities of a layer stack from its ordered DiffIDs.
///
/// `chain[0] = diff_ids[0]` and `chain[k] = sha256(chain[k-1] + " " + diff_ids[k])`,
/// so two images sharing a prefix of DiffIDs share the same chain ID prefix.
pub fn chain_ids(diff_ids: &[Digest]) -> Vec<Digest> {
    let mut chain: Vec<Digest> = Vec::with_capacity(diff_ids.len());
    for diff_id in diff_ids {
        let next = match chain.last() {
            None => diff_id.clone(),
            Some(parent) => Digest::from_content(format!("{parent} {diff_id}").as_bytes()),
        };
        chain.push(next);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(c: char) -> Digest {
        Digest::from_sha256_hex(&c.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn test_parse_rejects_bad_digests() {
        for bad in [
            "",
            "sha256",
            "sha256:",
            ":abcd",
            "sha256:ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789",
            "sha256:abc",
            "sha512:0123",
        ] {
            assert!(Digest::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_algorithms() {
        let d = Digest::parse(&format!("sha512:{}", "0".repeat(128))).unwrap();
        assert_eq!((d.algorithm(), d.encoded().len()), ("sha512", 128));

        for unsupported in [
            "foo:a",
            "multihash+base58:QmRZxt2b1FVZPNqd8hsiykDL3TdBDeTSPX9Kv46HmX4Gx8",
        ] {
            assert!(Digest::parse(unsupported).unwrap_err().is_invalid_parameter());
        }
    }

    #[test]
    fn test_from_content() {
        assert_eq!(
            Digest::from_content(b"").as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_chain_ids() {
        assert!(chain_ids(&[]).is_empty());

        let chain = chain_ids(&[d('a'), d('b'), d('c')]);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], d('a'));
        assert_eq!(
            chain[1],
            Digest::from_content(format!("{} {}", d('a'), d('b')).as_bytes())
        );
        assert_eq!(
            chain[2],
            Digest::from_content(format!("{} {}", chain[1], d('c')).as_bytes())
        );
    }

    #[test]
    fn test_chain_ids_prefix_stable() {
        let short = chain_ids(&[d('a'), d('b')]);
        let long = chain_ids(&[d('a'), d('b'), d('c'), d('d')]);
        assert_eq!(short[..], long[..2]);

        let other = chain_ids(&[d('a'), d('e')]);
        assert_eq!(other[0], long[0]);
        assert_ne!(other[1], long[1]);
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let json = serde_json::to_string(&d('f')).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", "f".repeat(64)));
        assert!(serde_json::from_str::<Digest>("\"sha256:nothex\"").is_err());
    }
}
