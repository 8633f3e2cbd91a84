//! Filesystem endpoint records and their URI encoding
//!
//! An endpoint travels between applications as a single string of the form
//! `<scheme>://?v=1&<field>=<value>...`, where the scheme is the filesystem
//! type. List fields are repeated parameters, in order. Secret material
//! (the CephFS key) is carried behind an `auth` pointer, see `crate::secret`.

use std::fmt;
use std::net::Ipv6Addr;

use nom::branch::alt;
use nom::bytes::complete::{take_till, take_until};
use nom::character::complete::{char, digit1};
use nom::combinator::{map_res, opt};
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use url::form_urlencoded;

use crate::error::CharmError;
use crate::model::{Databag, SecretId, SecretStore};
use crate::secret::SecretRef;

/// Version of the URI layout written by `to_uri`
const URI_VERSION: &str = "1";

/// Parses a `:port` suffix
fn parse_port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |d: &str| d.parse::<u16>()))(input)
}

/// Parses a bracketed IPv6 literal, e.g. `[2001:db8::1]`
fn parse_ipv6_literal(input: &str) -> IResult<&str, &str> {
    delimited(char('['), take_until("]"), char(']'))(input)
}

/// Parses an IPv4 address or hostname
fn parse_hostname(input: &str) -> IResult<&str, &str> {
    take_till(|c| c == ':' || c == '[' || c == ']')(input)
}

fn parse_host_port(input: &str) -> IResult<&str, (&str, Option<u16>)> {
    pair(alt((parse_ipv6_literal, parse_hostname)), opt(parse_port))(input)
}

/// Splits a host string into its host and optional port
///
/// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A bare IPv6
/// address is returned whole, since its colons make any port ambiguous.
pub fn parse_host(input: &str) -> Result<(String, Option<u16>), CharmError> {
    if input.parse::<Ipv6Addr>().is_ok() {
        return Ok((input.to_string(), None));
    }

    let (remainder, (host, port)) = parse_host_port(input)
        .map_err(|err| CharmError::InvalidHost(input.to_string(), format!("{:?}", err)))?;

    if !remainder.is_empty() {
        return Err(CharmError::InvalidHost(
            input.to_string(),
            format!("unexpected trailing data `{}`", remainder),
        ));
    }

    if host.is_empty() {
        return Err(CharmError::InvalidHost(
            input.to_string(),
            "empty host".to_string(),
        ));
    }

    Ok((host.to_string(), port))
}

fn require_field(kind: FilesystemType, key: &str, value: &str) -> Result<(), CharmError> {
    if value.is_empty() {
        return Err(CharmError::InvalidRecord(format!(
            "{} record has an empty `{}`",
            kind, key
        )));
    }

    Ok(())
}

fn require_fields(kind: FilesystemType, key: &str, values: &[String]) -> Result<(), CharmError> {
    if values.is_empty() {
        return require_field(kind, key, "");
    }

    values.iter().try_for_each(|v| require_field(kind, key, v))
}

/// Discriminant of an endpoint record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilesystemType {
    Nfs,
    Cephfs,
    Lustre,
}

impl FilesystemType {
    pub fn scheme(self) -> &'static str {
        match self {
            FilesystemType::Nfs => "nfs",
            FilesystemType::Cephfs => "cephfs",
            FilesystemType::Lustre => "lustre",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "nfs" => Some(FilesystemType::Nfs),
            "cephfs" => Some(FilesystemType::Cephfs),
            "lustre" => Some(FilesystemType::Lustre),
            _ => None,
        }
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Everything needed to mount a remote filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesystemInfo {
    Nfs {
        hostname: String,
        port: Option<u16>,
        path: String,
    },
    Cephfs {
        fsid: String,
        name: String,
        path: String,
        monitor_hosts: Vec<String>,
        user: String,
        key: String,
    },
    Lustre {
        mgs_ids: Vec<String>,
        fs_name: String,
    },
}

/// Query parameters of a decoded URI, in order
struct Params(Vec<(String, String)>);

impl Params {
    fn all(&self, key: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, uri: &str, key: &str) -> Result<String, CharmError> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(CharmError::InvalidUri(
                uri.to_string(),
                format!("missing `{}`", key),
            )),
        }
    }
}

impl FilesystemInfo {
    pub fn filesystem_type(&self) -> FilesystemType {
        match self {
            FilesystemInfo::Nfs { .. } => FilesystemType::Nfs,
            FilesystemInfo::Cephfs { .. } => FilesystemType::Cephfs,
            FilesystemInfo::Lustre { .. } => FilesystemType::Lustre,
        }
    }

    /// Checks that the record can be published and decoded again
    ///
    /// Every field must be set, list fields need at least one entry, and
    /// hosts must parse with `parse_host`. An NFS port goes in `port`, not
    /// on the hostname.
    pub fn validate(&self) -> Result<(), CharmError> {
        let kind = self.filesystem_type();

        match self {
            FilesystemInfo::Nfs { hostname, path, .. } => {
                require_field(kind, "hostname", hostname)?;
                require_field(kind, "path", path)?;
                if let (_, Some(_)) = parse_host(hostname)? {
                    return Err(CharmError::InvalidHost(
                        hostname.clone(),
                        "the port must be given separately".to_string(),
                    ));
                }
            }
            FilesystemInfo::Cephfs {
                fsid,
                name,
                path,
                monitor_hosts,
                user,
                key,
            } => {
                require_field(kind, "fsid", fsid)?;
                require_field(kind, "name", name)?;
                require_field(kind, "path", path)?;
                require_field(kind, "user", user)?;
                require_field(kind, "key", key)?;
                require_fields(kind, "monitor", monitor_hosts)?;
                for host in monitor_hosts {
                    parse_host(host)?;
                }
            }
            FilesystemInfo::Lustre { mgs_ids, fs_name } => {
                require_fields(kind, "mgs", mgs_ids)?;
                require_field(kind, "fs_name", fs_name)?;
            }
        }

        Ok(())
    }

    /// Secret material that must not be published in the clear, if any
    pub fn secret_content(&self) -> Option<Databag> {
        match self {
            FilesystemInfo::Cephfs { user, key, .. } => {
                let mut content = Databag::new();
                content.insert("user".into(), user.clone());
                content.insert("key".into(), key.clone());
                Some(content)
            }
            _ => None,
        }
    }

    fn encode(&self, auth: Option<&SecretRef>) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("v", URI_VERSION);

        match self {
            FilesystemInfo::Nfs {
                hostname,
                port,
                path,
            } => {
                query.append_pair("hostname", hostname);
                if let Some(p) = port {
                    query.append_pair("port", &p.to_string());
                }
                query.append_pair("path", path);
            }
            FilesystemInfo::Cephfs {
                fsid,
                name,
                path,
                monitor_hosts,
                ..
            } => {
                query.append_pair("fsid", fsid);
                query.append_pair("name", name);
                query.append_pair("path", path);
                for host in monitor_hosts {
                    query.append_pair("monitor", host);
                }
            }
            FilesystemInfo::Lustre { mgs_ids, fs_name } => {
                for id in mgs_ids {
                    query.append_pair("mgs", id);
                }
                query.append_pair("fs_name", fs_name);
            }
        }

        if let Some(pointer) = auth {
            query.append_pair("auth", &pointer.to_string());
        }

        format!("{}://?{}", self.filesystem_type().scheme(), query.finish())
    }

    /// Encodes the record, carrying any secret material inline
    ///
    /// Only records that pass `validate` decode again with `from_uri`.
    pub fn to_uri(&self) -> String {
        let auth = self.secret_content().map(SecretRef::Plain);
        self.encode(auth.as_ref())
    }

    /// Encodes the record, carrying secret material behind the host secret `id`
    pub fn to_uri_sealed(&self, id: &SecretId) -> String {
        match self.secret_content() {
            Some(_) => self.encode(Some(&SecretRef::Secret(id.clone()))),
            None => self.encode(None),
        }
    }

    fn decode<F>(uri: &str, resolve: F) -> Result<Self, CharmError>
    where
        F: FnOnce(&SecretRef) -> Result<Databag, CharmError>,
    {
        let invalid = |reason: &str| CharmError::InvalidUri(uri.to_string(), reason.to_string());

        let mut split = uri.splitn(2, "://");
        let scheme = split.next().unwrap_or_default();
        let rest = split.next().ok_or_else(|| invalid("missing scheme"))?;
        let kind = FilesystemType::from_scheme(scheme)
            .ok_or_else(|| invalid(&format!("unknown filesystem type `{}`", scheme)))?;
        let query = rest
            .strip_prefix('?')
            .ok_or_else(|| invalid("missing query"))?;

        let params = Params(form_urlencoded::parse(query.as_bytes()).into_owned().collect());

        match params.get("v") {
            None | Some(URI_VERSION) => {}
            Some(v) => return Err(invalid(&format!("unsupported version `{}`", v))),
        }

        let info = match kind {
            FilesystemType::Nfs => FilesystemInfo::Nfs {
                hostname: params.require(uri, "hostname")?,
                port: params
                    .get("port")
                    .map(|p| p.parse::<u16>())
                    .transpose()
                    .map_err(|err| invalid(&format!("invalid port: {}", err)))?,
                path: params.require(uri, "path")?,
            },
            FilesystemType::Cephfs => {
                let pointer: SecretRef = params.require(uri, "auth")?.parse()?;
                let auth = resolve(&pointer)?;
                let field = |key: &str| {
                    auth.get(key).cloned().ok_or_else(|| {
                        CharmError::SecretError(format!("auth info is missing `{}`", key))
                    })
                };

                FilesystemInfo::Cephfs {
                    fsid: params.require(uri, "fsid")?,
                    name: params.require(uri, "name")?,
                    path: params.require(uri, "path")?,
                    monitor_hosts: params.all("monitor"),
                    user: field("user")?,
                    key: field("key")?,
                }
            }
            FilesystemType::Lustre => FilesystemInfo::Lustre {
                mgs_ids: params.all("mgs"),
                fs_name: params.require(uri, "fs_name")?,
            },
        };

        info.validate()?;
        Ok(info)
    }

    /// Decodes a record whose secret material, if any, is carried inline
    pub fn from_uri(uri: &str) -> Result<Self, CharmError> {
        Self::decode(uri, SecretRef::resolve_inline)
    }

    /// Decodes a record, resolving secret pointers through `secrets`
    pub fn from_uri_with<S: SecretStore + ?Sized>(
        uri: &str,
        secrets: &S,
    ) -> Result<Self, CharmError> {
        Self::decode(uri, |pointer| pointer.resolve(secrets))
    }
}
