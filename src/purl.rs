//! Package URL identities.
//!
//! The canonical string form is `pkg:<ecosystem>/<name>` for a package and
//! `pkg:<ecosystem>/<name>@<version>` for a version. `@` separates the
//! version and appears nowhere else in the identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PurlError {
    #[error("missing pkg: prefix in '{0}'")]
    MissingPrefix(String),

    #[error("missing ecosystem in '{0}'")]
    MissingEcosystem(String),

    #[error("missing name in '{0}'")]
    MissingName(String),

    #[error("empty version in '{0}'")]
    EmptyVersion(String),
}

/// A parsed package URL. The name may contain `/` for namespaced
/// ecosystems (e.g. `@scope/pkg` on npm, `group/artifact` on Maven).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Purl {
    pub ecosystem: String,
    pub name: String,
    pub version: Option<String>,
}

impl Purl {
    pub fn package(ecosystem: &str, name: &str) -> Self {
        Self {
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            version: None,
        }
    }

    pub fn version(ecosystem: &str, name: &str, version: &str) -> Self {
        Self {
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }

    /// Parse `pkg:eco/name` or `pkg:eco/name@version`.
    pub fn parse(s: &str) -> Result<Self, PurlError> {
        let rest = s
            .strip_prefix("pkg:")
            .ok_or_else(|| PurlError::MissingPrefix(s.to_string()))?;

        let (ecosystem, rest) = rest
            .split_once('/')
            .ok_or_else(|| PurlError::MissingEcosystem(s.to_string()))?;
        if ecosystem.is_empty() {
            return Err(PurlError::MissingEcosystem(s.to_string()));
        }

        // The version separator is the LAST '@': namespaced names like
        // npm's `@scope/pkg` carry a leading '@' of their own. A candidate
        // version containing '/' is part of the name, not a version.
        let (name, version) = match rest.rsplit_once('@') {
            Some((n, v)) if !n.is_empty() && !v.contains('/') => {
                if v.is_empty() {
                    return Err(PurlError::EmptyVersion(s.to_string()));
                }
                (n, Some(v.to_string()))
            }
            _ => (rest, None),
        };
        if name.is_empty() {
            return Err(PurlError::MissingName(s.to_string()));
        }

        Ok(Self {
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            version,
        })
    }

    /// Identity of the owning package (version dropped).
    pub fn package_purl(&self) -> String {
        format!("pkg:{}/{}", self.ecosystem, self.name)
    }

    /// Identity including the version, if any.
    pub fn to_purl_string(&self) -> String {
        match &self.version {
            Some(v) => format!("pkg:{}/{}@{}", self.ecosystem, self.name, v),
            None => self.package_purl(),
        }
    }
}

impl fmt::Display for Purl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_purl_string())
    }
}
