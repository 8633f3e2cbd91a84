//! Secret indirection for relation data
//!
//! Secret material never travels through a databag directly. Providers store
//! it in a host secret granted to the relation and publish `secret:<id>`.
//! Where the host has no secret support, the material is published inline
//! as `plain:<json>` instead.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::error::CharmError;
use crate::model::{Databag, SecretId, SecretStore};

/// Pointer to secret material, as published in a databag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    /// Resolved through the host's secret store
    Secret(SecretId),

    /// Material carried inline
    Plain(Databag),
}

impl SecretRef {
    /// Parses a pointer, returning `None` (and logging why) when it is malformed
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.parse() {
            Ok(r) => Some(r),
            Err(err) => {
                warn!("ignoring secret reference: {}", err);
                None
            }
        }
    }

    pub fn resolve<S: SecretStore + ?Sized>(&self, secrets: &S) -> Result<Databag, CharmError> {
        match self {
            SecretRef::Secret(id) => secrets.secret_content(id),
            SecretRef::Plain(content) => Ok(content.clone()),
        }
    }

    /// Resolves without a store, failing for host-held secrets
    pub fn resolve_inline(&self) -> Result<Databag, CharmError> {
        match self {
            SecretRef::Secret(id) => Err(CharmError::SecretError(format!(
                "`{}` needs a secret store to resolve",
                id
            ))),
            SecretRef::Plain(content) => Ok(content.clone()),
        }
    }

    /// Stores `content` behind a pointer, using a host secret when available
    pub fn seal<S: SecretStore + ?Sized>(
        secrets: &mut S,
        content: &Databag,
        label: &str,
        description: &str,
    ) -> Result<Self, CharmError> {
        if secrets.secrets_available() {
            Ok(SecretRef::Secret(secrets.ensure_secret(
                content,
                label,
                description,
            )?))
        } else {
            Ok(SecretRef::Plain(content.clone()))
        }
    }
}

impl FromStr for SecretRef {
    type Err = CharmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.splitn(2, ':');
        let kind = split.next().unwrap_or_default();
        let data = split
            .next()
            .ok_or_else(|| CharmError::SecretError(format!("no kind in `{}`", s)))?;

        match kind {
            // Juju secret ids carry the `secret:` prefix themselves
            "secret" if !data.is_empty() => Ok(SecretRef::Secret(SecretId(s.to_string()))),
            "plain" => serde_json::from_str(data)
                .map(SecretRef::Plain)
                .map_err(|err| CharmError::SecretError(format!("invalid inline secret: {}", err))),
            _ => Err(CharmError::SecretError(format!(
                "unknown kind `{}` for secret reference",
                kind
            ))),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SecretRef::Secret(id) if id.0.starts_with("secret:") => write!(f, "{}", id),
            SecretRef::Secret(id) => write!(f, "secret:{}", id),
            SecretRef::Plain(content) => write!(
                f,
                "plain:{}",
                serde_json::to_string(content).map_err(|_| fmt::Error)?
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Databag {
        let mut content = Databag::new();
        content.insert("username".into(), "ceph-client".into());
        content.insert("key".into(), "AQAPdQldX264KBAAOyaxen/y0XBl1qxlGPTabw==".into());
        content
    }

    #[test]
    fn test_secret_pointer() {
        let parsed: SecretRef = "secret:cn4a0pcv1fi0gh8ofp3g".parse().unwrap();

        assert_eq!(
            parsed,
            SecretRef::Secret(SecretId("secret:cn4a0pcv1fi0gh8ofp3g".into()))
        );
        assert_eq!(parsed.to_string(), "secret:cn4a0pcv1fi0gh8ofp3g");
        assert!(parsed.resolve_inline().is_err());
    }

    #[test]
    fn test_plain_pointer() {
        let pointer = SecretRef::Plain(auth());
        let serialized = pointer.to_string();

        assert!(serialized.starts_with("plain:{"));

        let parsed: SecretRef = serialized.parse().unwrap();
        assert_eq!(parsed.resolve_inline().unwrap(), auth());
    }

    #[test]
    fn test_malformed_pointer() {
        assert_eq!(SecretRef::parse_lenient("cn4a0pcv1fi0gh8ofp3g"), None);
        assert_eq!(SecretRef::parse_lenient("vault:abc"), None);
        assert_eq!(SecretRef::parse_lenient("plain:{not json"), None);
        assert_eq!(SecretRef::parse_lenient("secret:"), None);
    }
}
