// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! dsc signature verification.

A `.dsc` is a PGP cleartext-signed document. Verification walks the
keyring set in priority order and accepts the first keyring holding a key
(or subkey) that validates a signature. The result carries everything the
importer needs downstream: the signer identity for tagger lines, the key
id and keyring of origin for upload tag annotations, the signature
timestamp, and the signed cleartext for parsing.
*/

use {
    crate::{
        error::{DebsnapError, Result},
        keyring,
    },
    chrono::Utc,
    pgp::{
        types::KeyTrait,
        Deserializable, SignedPublicKey,
    },
    pgp_cleartext::{CleartextSignatureReader, CleartextSignatures},
    slog::debug,
    std::{
        collections::HashMap,
        io::{Cursor, Read},
        path::Path,
    },
};

/// Status of a verified signature.
///
/// Names follow the gpg status-fd vocabulary since that is what users
/// grep for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureKind {
    Good,
    ExpiredKey,
    RevokedKey,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "GOODSIG",
            Self::ExpiredKey => "EXPKEYSIG",
            Self::RevokedKey => "REVKEYSIG",
        }
    }
}

/// The outcome of verifying one dsc.
#[derive(Clone, Debug)]
pub struct SigInfo {
    /// Short name of the keyring that held the signing key.
    pub kr_name: String,

    /// Signing key id, upper-case hex.
    pub key_id: String,

    /// Primary user id of the signing key, as stored in the key.
    pub signer: String,

    /// Signature creation time, unix seconds.
    pub timestamp: i64,

    /// Signature status.
    pub kind: SignatureKind,
}

impl SigInfo {
    /// Whether this signature needs an annotation on its upload tag.
    ///
    /// Plain good signatures from the canonical distribution keyring are
    /// the unannotated common case.
    pub fn is_canonical(&self) -> bool {
        self.kr_name == "debian" && self.kind == SignatureKind::Good
    }

    /// The annotation appended to an upload tag's first message line.
    pub fn annotation(&self) -> String {
        format!(" ({}/{} {})", self.kr_name, self.key_id, self.kind.as_str())
    }
}

/// One loaded keyring: a named, ordered set of public keys.
pub struct Keyring {
    pub name: String,
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    /// Load a binary keyring file, skipping keys the parser rejects.
    ///
    /// The legacy pgp-format keyrings contain v3 keys rPGP cannot
    /// represent; those keys could not verify modern uploads anyway.
    pub fn load(logger: &slog::Logger, name: &str, path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;

        let mut keys = vec![];
        for key in SignedPublicKey::from_bytes_many(Cursor::new(data)) {
            match key {
                Ok(key) => keys.push(key),
                Err(e) => {
                    debug!(logger, "skipping unparseable key in {}: {:?}", name, e);
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            keys,
        })
    }

    /// Construct a keyring from already-parsed keys.
    pub fn from_keys(name: &str, keys: Vec<SignedPublicKey>) -> Self {
        Self {
            name: name.to_string(),
            keys,
        }
    }
}

/// The ordered keyring set used for a run.
pub struct Keyrings {
    rings: Vec<Keyring>,

    /// Whether any of the well-known keyring files was absent, which
    /// turns verification failures into actionable guidance.
    pub missing: bool,
}

impl Keyrings {
    /// Load every keyring discoverable on this system.
    pub fn discover(logger: &slog::Logger) -> Result<Self> {
        let (found, missing) = keyring::discover();

        let rings = found
            .iter()
            .map(|(name, path)| Keyring::load(logger, name, path))
            .collect::<Result<Vec<_>>>()?;

        if rings.is_empty() {
            return Err(DebsnapError::NoKeyrings);
        }

        Ok(Self { rings, missing })
    }

    /// Construct from explicit keyrings (tests, `trust=` composition).
    pub fn from_rings(rings: Vec<Keyring>) -> Self {
        Self {
            rings,
            missing: false,
        }
    }

    /// Append an ephemeral keyring, e.g. keys exported for `trust=`.
    pub fn push(&mut self, ring: Keyring) {
        self.rings.push(ring);
    }

    /// Verify a cleartext-signed document.
    ///
    /// Returns the signature metadata and the signed cleartext bytes.
    /// Fails if no keyring key validates a signature.
    pub fn verify(&self, logger: &slog::Logger, data: &[u8], desc: &str) -> Result<(SigInfo, Vec<u8>)> {
        let mut reader = CleartextSignatureReader::new(Cursor::new(data));
        let mut cleartext = vec![];
        reader.read_to_end(&mut cleartext)?;
        let signatures = reader.finalize();

        for ring in &self.rings {
            for key in &ring.keys {
                if let Some(info) = verify_against(&signatures, ring, key) {
                    debug!(
                        logger,
                        "{} verified by {}/{} ({})",
                        desc,
                        info.kr_name,
                        info.key_id,
                        info.kind.as_str()
                    );
                    return Ok((info, cleartext));
                }
            }
        }

        if self.missing {
            debug!(logger, "some keyrings are missing; run `git deb get-keyrings`");
        }

        Err(DebsnapError::NoValidSignature(desc.to_string()))
    }
}

/// Attempt verification against one key and its subkeys.
fn verify_against(
    signatures: &CleartextSignatures,
    ring: &Keyring,
    key: &SignedPublicKey,
) -> Option<SigInfo> {
    let verified = if signatures.verify(key).is_ok() {
        Some(key.key_id())
    } else {
        key.public_subkeys
            .iter()
            .find(|subkey| signatures.verify(*subkey).is_ok())
            .map(|subkey| subkey.key_id())
    }?;

    let signature = signatures
        .iter_signatures()
        .find(|sig| sig.issuer() == Some(&verified))?;

    let timestamp = signature.created().map(|dt| dt.timestamp()).unwrap_or(0);

    let signer = key
        .details
        .users
        .first()
        .map(|user| user.id.id().to_string())
        .unwrap_or_default();

    let kind = if !key.details.revocation_signatures.is_empty() {
        SignatureKind::RevokedKey
    } else if key
        .expires_at()
        .map(|when| when < Utc::now())
        .unwrap_or(false)
    {
        SignatureKind::ExpiredKey
    } else {
        SignatureKind::Good
    };

    Some(SigInfo {
        kr_name: ring.name.clone(),
        key_id: hex::encode_upper(verified.as_ref()),
        signer,
        timestamp,
        kind,
    })
}

/// Normalize a signer identity to git `Name <email>` form.
///
/// Key user ids are usually `Name <email>` already; a bare address is
/// wrapped; anything else needs an `email=<kid> <addr>` override from the
/// URL query, or the run aborts.
pub fn signer_ident(
    uid: &str,
    key_id: &str,
    emails: &HashMap<String, String>,
) -> Result<String> {
    let uid = uid.trim();

    if let (Some(open), true) = (uid.find('<'), uid.ends_with('>')) {
        if uid[open..].contains('@') {
            return Ok(uid.to_string());
        }
    }

    if uid.contains('@') && !uid.contains(char::is_whitespace) && !uid.contains('<') {
        return Ok(format!("<{}>", uid));
    }

    if let Some(addr) = emails.get(key_id) {
        return Ok(format!("{} <{}>", uid, addr));
    }

    Err(DebsnapError::MalformedIdentity(uid.to_string()))
}
