// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebsnapError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] mailparse::MailParseError),

    #[error("version parsing error: {0}")]
    Version(#[from] crate::package_version::VersionError),

    #[error("snapshot archive has no source for version {0}")]
    MissingSource(String),

    #[error("snapshot file records for hash {0} disagree on size or extension")]
    FileInfoMismatch(String),

    #[error("digest mismatch on {path}: expected {expected}, got {got}")]
    DigestMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("{0} already maps to a different content hash")]
    PathHashConflict(String),

    #[error("hard link collision on {0} with a different inode")]
    MirrorCollision(String),

    #[error("multiple dsc files for version {0} decode to different cleartexts")]
    CleartextMismatch(String),

    #[error("no valid signature on {0}")]
    NoValidSignature(String),

    #[error("signer identity {0:?} has no usable email; supply one with email=<kid> <addr>")]
    MalformedIdentity(String),

    #[error("no keyrings found; run `git deb get-keyrings` first")]
    NoKeyrings,

    #[error("component {0:?} does not belong to source package {1}")]
    ComponentName(String, String),

    #[error("dsc Files field is missing or empty")]
    NoComponents,

    #[error("changelog has no parseable stanza")]
    BrokenChangelog,

    #[error("Changelog loop detected at {0}")]
    ChangelogLoop(String),

    #[error("invalid depth {0:?}; depth must be a positive integer")]
    InvalidDepth(String),

    #[error("bad deb:: URL: {0}")]
    BadUrl(String),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("required control field missing: {0}")]
    ControlFieldMissing(&'static str),

    #[error("source extraction failed: {0}")]
    Unpack(String),

    #[error("git invocation failed: {0}")]
    Git(String),

    #[error("gpg invocation failed: {0}")]
    Gpg(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebsnapError>;
