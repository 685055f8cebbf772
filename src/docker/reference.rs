//! Image reference parsing
//!
//! Accepts the usual `[registry/]repository[:tag][@digest]` form.

use crate::error::{Result, StevedoreError};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Tag applied when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component regex")
    })
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?$")
            .expect("domain regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
            .expect("digest regex")
    })
}

/// Parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository name including the registry domain, if any
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |why: &str| StevedoreError::ImageReference(format!("{}: {}", reference, why));

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(invalid("invalid digest"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &rest[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(invalid("invalid tag"));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        let mut components: Vec<&str> = name.split('/').collect();
        if components.len() > 1 {
            let first = components[0];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if !domain_re().is_match(first) {
                    return Err(invalid("invalid registry domain"));
                }
                components.remove(0);
            }
        }

        for component in components {
            if !component_re().is_match(component) {
                return Err(invalid("repository name must be lowercase alphanumeric"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// Whether the reference names a specific tag
    pub fn is_tagged(&self) -> bool {
        self.tag.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// The reference with `latest` filled in when neither tag nor digest is present
    pub fn with_default_tag(mut self) -> Self {
        if !self.is_tagged() && self.digest.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
