//! Errors for juju-fs

use std::io::Error as IOError;

use ex::io::Error as ExIOError;
use failure::Fail;
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;

use crate::model::Relation;

#[derive(Debug, Fail)]
pub enum CharmError {
    #[fail(display = "I/O error: {}", _0)]
    IOError(#[fail(cause)] IOError),

    #[fail(display = "I/O error: {}", _0)]
    ExIOError(#[fail(cause)] ExIOError),

    #[fail(display = "YAML Error: {}", _0)]
    YamlError(#[fail(cause)] YamlError),

    #[fail(display = "JSON Error: {}", _0)]
    JsonError(#[fail(cause)] JsonError),

    #[fail(display = "Error running hook tool `{}`: `{}`", _0, _1)]
    HookToolError(String, String),

    #[fail(display = "Relation `{}` has been torn down", _0)]
    RelationBroken(Relation),

    #[fail(display = "Unit `{}` is not the application leader", _0)]
    NotLeader(String),

    #[fail(display = "Invalid host `{}`: {}", _0, _1)]
    InvalidHost(String, String),

    #[fail(display = "Invalid endpoint URI `{}`: {}", _0, _1)]
    InvalidUri(String, String),

    #[fail(display = "Invalid record: {}", _0)]
    InvalidRecord(String),

    #[fail(display = "Secret error: {}", _0)]
    SecretError(String),

    #[fail(display = "Failed to mount filesystems: {}", _0)]
    MountError(String),

    #[fail(display = "Failed to install package `{}`: {}", _0, _1)]
    PackageError(String, String),

    #[fail(display = "Conflicting relations on `{}`: {}", _0, _1)]
    RelationConflict(String, String),
}

impl From<IOError> for CharmError {
    fn from(err: IOError) -> Self {
        CharmError::IOError(err)
    }
}

impl From<ExIOError> for CharmError {
    fn from(err: ExIOError) -> Self {
        CharmError::ExIOError(err)
    }
}

impl From<YamlError> for CharmError {
    fn from(err: YamlError) -> Self {
        CharmError::YamlError(err)
    }
}

impl From<JsonError> for CharmError {
    fn from(err: JsonError) -> Self {
        CharmError::JsonError(err)
    }
}

impl From<CharmError> for String {
    fn from(err: CharmError) -> Self {
        format!("{}", err)
    }
}
