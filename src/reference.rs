//! Parsing and normalization of user-supplied image references.
//!
//! This follows the Docker reference grammar including its quirks:
//!
//! ```text
//! reference  := name [ ":" tag ] [ "@" digest ]
//! name       := [ domain "/" ] path-component { "/" path-component }
//! domain     := host [ ":" port ]
//! tag        := [\w][\w.-]{0,127}
//! ```
//!
//! The first `/`-separated section is a domain only if it contains a `.` or a
//! `:`, or is exactly `localhost`. Names without a domain live on `docker.io`,
//! and single-component `docker.io` names get the `library/` prefix, so
//! `ubuntu` normalizes to `docker.io/library/ubuntu`.
//!
//! Independently of the grammar, a bare string of 4 to 64 lowercase hex
//! characters may also be an abbreviated content digest; see [`is_short_id`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    digest::Digest,
    error::{Error, Result},
};

/// Domain assumed for names that do not carry one.
pub const DEFAULT_DOMAIN: &str = "docker.io";

/// Tag applied by [`Named::with_default_tag`] unless the store says otherwise.
pub const DEFAULT_TAG: &str = "latest";

const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

static SHORT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-f0-9]{4,64}$").expect("short id regex"));
static FULL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-f0-9]{64}$").expect("full id regex"));
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        "^",
        "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])",
        "(?:\\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*",
        "(?::[0-9]+)?",
        "$",
    ))
    .expect("domain regex")
});
static PATH_COMPONENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*$").expect("path component regex")
});
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex"));

/// Could `s` be an abbreviated (or full) hex image ID?
///
/// This is checked against the string exactly as the user typed it, before
/// any normalization.
pub fn is_short_id(s: &str) -> bool {
    SHORT_ID_RE.is_match(s)
}

/// A parsed reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    /// A bare content digest with no name.
    Digested(Digest),
    /// A repository name, possibly with a tag and/or a digest.
    Named(Named),
}

impl Reference {
    /// Parse any accepted reference form.
    ///
    /// A 64-character hex string is treated as a sha256 digest, as is any
    /// string that parses as a digest of a known algorithm. Everything else
    /// must be a (possibly familiar) name.
    pub fn parse(s: &str) -> Result<Self> {
        if FULL_ID_RE.is_match(s) {
            return Ok(Reference::Digested(Digest::from_sha256_hex(s)?));
        }
        if let Some((alg, _)) = s.split_once(':') {
            if matches!(alg, "sha256" | "sha384" | "sha512") {
                if let Ok(digest) = Digest::parse(s) {
                    return Ok(Reference::Digested(digest));
                }
            }
        }
        Named::parse_normalized(s).map(Reference::Named)
    }

    /// The digest carried by this reference, if any.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Reference::Digested(d) => Some(d),
            Reference::Named(n) => n.digest(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Digested(d) => write!(f, "{d}"),
            Reference::Named(n) => write!(f, "{n}"),
        }
    }
}

/// A fully qualified repository name with optional tag and digest.
///
/// `Display` produces the canonical form used as the image index key, e.g.
/// `docker.io/library/ubuntu:22.04`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Named {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Named {
    /// Parse a name, filling in the default domain and `library/` prefix.
    pub fn parse_normalized(s: &str) -> Result<Self> {
        let invalid =
            |why: &str| Error::InvalidParameter(format!("invalid reference {s:?}: {why}"));

        if s.is_empty() {
            return Err(invalid("empty reference"));
        }
        if FULL_ID_RE.is_match(s) {
            return Err(invalid("cannot specify 64-byte hexadecimal strings"));
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => (rest, Some(Digest::parse(digest)?)),
            None => (s, None),
        };

        // A ':' after the last '/' introduces the tag; before it, a port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(&rest[split + 1..]))
            }
            None => (rest, None),
        };

        if let Some(tag) = tag {
            if !TAG_RE.is_match(tag) {
                return Err(invalid("invalid tag"));
            }
        }

        let (domain, remainder) = split_domain(name);
        if !DOMAIN_RE.is_match(&domain) {
            return Err(invalid("invalid domain"));
        }
        if remainder.to_lowercase() != remainder {
            return Err(invalid("repository name must be lowercase"));
        }
        if remainder.split('/').any(|c| !PATH_COMPONENT_RE.is_match(c)) {
            return Err(invalid("invalid repository name"));
        }
        if domain.len() + 1 + remainder.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(invalid("repository name must not be more than 255 characters"));
        }

        Ok(Named {
            domain,
            path: remainder,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// The name without tag or digest, e.g. `docker.io/library/ubuntu`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Add `tag` if the reference has neither a tag nor a digest.
    pub fn with_default_tag(mut self, tag: &str) -> Self {
        if self.tag.is_none() && self.digest.is_none() {
            self.tag = Some(tag.to_string());
        }
        self
    }

    /// Replace the tag, dropping any digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self> {
        if !TAG_RE.is_match(tag) {
            return Err(Error::InvalidParameter(format!("invalid tag {tag:?}")));
        }
        Ok(Named {
            domain: self.domain.clone(),
            path: self.path.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        })
    }

    /// The short form shown to users: `ubuntu:latest` for
    /// `docker.io/library/ubuntu:latest`.
    pub fn familiar(&self) -> String {
        let mut s = if self.domain == DEFAULT_DOMAIN {
            match self.path.strip_prefix(OFFICIAL_REPO_PREFIX) {
                Some(short) if !short.contains('/') => short.to_string(),
                _ => self.path.clone(),
            }
        } else {
            self.name()
        };
        self.push_suffix(&mut s);
        s
    }

    fn push_suffix(&self, s: &mut String) {
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest.as_str());
        }
    }
}

impl fmt::Display for Named {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = self.name();
        self.push_suffix(&mut s);
        f.write_str(&s)
    }
}

fn split_domain(name: &str) -> (String, String) {
    let (mut domain, mut remainder) = match name.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':'])
                || first == "localhost"
                || first.to_lowercase() != first =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };
    if domain == LEGACY_DEFAULT_DOMAIN {
        domain = DEFAULT_DOMAIN.to_string();
    }
    if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        remainder = format!("{OFFICIAL_REPO_PREFIX}{remainder}");
    }
    (domain, remainder)
}

/// Render a full name in its familiar short form, leaving unparseable
/// strings untouched.
pub fn familiar_name(name: &str) -> String {
    match Named::parse_normalized(name) {
        Ok(named) => named.familiar(),
        Err(_) => name.to_string(),
    }
}
