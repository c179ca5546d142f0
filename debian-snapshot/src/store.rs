// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Local content-addressed store.

Downloads are cached under `~/.cache/debsnap/` in three zones:

* `by-hash/<sha1>`: raw file bytes, written via rename-after-verify so a
  crash mid-download never leaves a bad blob in place.
* `archive/<archive>/<path>/<name>`: the archive's directory layout,
  hard-linked into `by-hash`. Source extraction runs against this zone so
  a dsc finds its components alongside it.
* `json/`: archive API responses, cached with per-endpoint freshness.

Every observed `(archive, path, name)` triple maps to exactly one content
hash; observing a second hash for the same triple is a hard error, as is
a hard-link collision with a foreign inode.
*/

use {
    crate::error::{DebsnapError, Result},
    sha1::{Digest, Sha1},
    std::{
        cell::RefCell,
        collections::HashMap,
        io::{Read, Write},
        os::unix::fs::MetadataExt,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// A file location across archives.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PathKey {
    pub archive: String,
    pub path: String,
    pub name: String,
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.archive, self.path.trim_matches('/'), self.name)
    }
}

pub struct ContentStore {
    root: PathBuf,

    /// PathKey -> hash, set-exclusive.
    resolved: RefCell<HashMap<PathKey, String>>,
}

impl ContentStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for zone in ["by-hash", "archive", "json"] {
            std::fs::create_dir_all(root.join(zone))?;
        }

        Ok(Self {
            root,
            resolved: RefCell::new(HashMap::new()),
        })
    }

    /// Open the store at its default location, `~/.cache/debsnap`.
    pub fn open_default() -> Result<Self> {
        let cache = dirs::cache_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no cache directory")
        })?;
        Self::open(cache.join("debsnap"))
    }

    fn by_hash_path(&self, hash: &str) -> PathBuf {
        self.root.join("by-hash").join(hash)
    }

    /// Whether a blob is present with the expected size.
    ///
    /// A blob whose size disagrees is deleted so the caller re-fetches.
    pub fn has_blob(&self, hash: &str, expected_size: u64) -> Result<bool> {
        let path = self.by_hash_path(hash);

        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() == expected_size => Ok(true),
            Ok(_) => {
                std::fs::remove_file(&path)?;
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a blob into the store, verifying size and SHA-1.
    ///
    /// The content lands in a temporary file that is renamed into place
    /// only after both checks pass; it evaporates on any failure.
    pub fn put_blob(
        &self,
        hash: &str,
        expected_size: u64,
        reader: &mut dyn Read,
    ) -> Result<PathBuf> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut hasher = Sha1::new();
        let mut size = 0u64;
        let mut buf = [0u8; 65536];

        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            hasher.update(&buf[..count]);
            temp.write_all(&buf[..count])?;
            size += count as u64;
        }

        let got = hex::encode(hasher.finalize());
        if size != expected_size || got != hash {
            return Err(DebsnapError::DigestMismatch {
                path: hash.to_string(),
                expected: format!("{} ({} bytes)", hash, expected_size),
                got: format!("{} ({} bytes)", got, size),
            });
        }

        let dest = self.by_hash_path(hash);
        temp.persist(&dest)
            .map_err(|e| DebsnapError::Io(e.error))?;

        Ok(dest)
    }

    /// Read a stored blob.
    pub fn read_blob(&self, hash: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.by_hash_path(hash))?)
    }

    /// The path of a file in the namespaced archive mirror.
    pub fn mirror_path(&self, key: &PathKey) -> PathBuf {
        self.root
            .join("archive")
            .join(&key.archive)
            .join(key.path.trim_matches('/'))
            .join(&key.name)
    }

    /// Hard-link a blob into the archive mirror.
    ///
    /// Re-observing a key with a different hash is fatal. An existing
    /// destination is tolerated iff it is the same inode as the blob.
    pub fn link_mirror(&self, key: &PathKey, hash: &str) -> Result<PathBuf> {
        {
            let mut resolved = self.resolved.borrow_mut();
            if let Some(existing) = resolved.get(key) {
                if existing != hash {
                    return Err(DebsnapError::PathHashConflict(key.to_string()));
                }
            } else {
                resolved.insert(key.clone(), hash.to_string());
            }
        }

        let source = self.by_hash_path(hash);
        let dest = self.mirror_path(key);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match std::fs::hard_link(&source, &dest) {
            Ok(()) => Ok(dest),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let source_ino = std::fs::metadata(&source)?.ino();
                let dest_ino = std::fs::metadata(&dest)?.ino();
                if source_ino == dest_ino {
                    Ok(dest)
                } else {
                    Err(DebsnapError::MirrorCollision(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch-through cache for archive JSON responses.
    ///
    /// `max_age` of `None` means a cached response never goes stale.
    /// A cached file that is stale or not valid JSON is a miss; a miss
    /// runs `fetch` and stores its result. Hits never refresh.
    pub fn cached_json(
        &self,
        name: &str,
        max_age: Option<Duration>,
        fetch: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        let path = self.root.join("json").join(name);

        if let Ok(meta) = std::fs::metadata(&path) {
            let fresh = match max_age {
                None => true,
                Some(max_age) => meta
                    .modified()
                    .ok()
                    .and_then(|mtime| mtime.elapsed().ok())
                    .map(|age| age < max_age)
                    .unwrap_or(false),
            };

            if fresh {
                if let Ok(body) = std::fs::read_to_string(&path) {
                    if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                        return Ok(body);
                    }
                }
            }
        }

        let body = fetch()?;
        serde_json::from_str::<serde_json::Value>(&body)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        temp.write_all(body.as_bytes())?;
        temp.persist(&path).map_err(|e| DebsnapError::Io(e.error))?;

        Ok(body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = ContentStore::open(dir.path().join("cache")).expect("store opens");
        (dir, store)
    }

    // SHA-1 of b"hello".
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn blob_roundtrip() -> Result<()> {
        let (_dir, store) = store();

        assert!(!store.has_blob(HELLO_SHA1, 5)?);

        store.put_blob(HELLO_SHA1, 5, &mut &b"hello"[..])?;
        assert!(store.has_blob(HELLO_SHA1, 5)?);

        // A size mismatch evicts the blob.
        assert!(!store.has_blob(HELLO_SHA1, 6)?);
        assert!(!store.has_blob(HELLO_SHA1, 5)?);

        Ok(())
    }

    #[test]
    fn blob_digest_mismatch() {
        let (_dir, store) = store();

        assert!(matches!(
            store.put_blob(HELLO_SHA1, 5, &mut &b"jello"[..]),
            Err(DebsnapError::DigestMismatch { .. })
        ));
        // Nothing was left behind.
        assert!(!store.has_blob(HELLO_SHA1, 5).unwrap());
    }

    fn key(name: &str) -> PathKey {
        PathKey {
            archive: "debian".to_string(),
            path: "/pool/main/g/gzrt".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn mirror_links() -> Result<()> {
        let (_dir, store) = store();
        store.put_blob(HELLO_SHA1, 5, &mut &b"hello"[..])?;

        let dest = store.link_mirror(&key("gzrt_0.5-1.dsc"), HELLO_SHA1)?;
        assert_eq!(std::fs::read(&dest)?, b"hello");

        // Linking again is idempotent.
        store.link_mirror(&key("gzrt_0.5-1.dsc"), HELLO_SHA1)?;

        // Same key, different hash: fatal.
        assert!(matches!(
            store.link_mirror(&key("gzrt_0.5-1.dsc"), "00000000000000000000000000000000deadbeef"),
            Err(DebsnapError::PathHashConflict(_))
        ));

        Ok(())
    }

    #[test]
    fn mirror_foreign_inode() -> Result<()> {
        let (_dir, store) = store();
        store.put_blob(HELLO_SHA1, 5, &mut &b"hello"[..])?;

        let k = key("gzrt_0.5-1.dsc");
        let dest = store.mirror_path(&k);
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::write(&dest, b"squatter")?;

        assert!(matches!(
            store.link_mirror(&k, HELLO_SHA1),
            Err(DebsnapError::MirrorCollision(_))
        ));

        Ok(())
    }

    #[test]
    fn json_cache_policies() -> Result<()> {
        let (_dir, store) = store();

        // Miss populates.
        let body = store.cached_json("v.json", None, || Ok(r#"{"a":1}"#.to_string()))?;
        assert_eq!(body, r#"{"a":1}"#);

        // Fresh hit never refreshes.
        let body = store.cached_json("v.json", None, || panic!("should not fetch"))?;
        assert_eq!(body, r#"{"a":1}"#);

        // Stale (zero max-age) refetches.
        let body = store.cached_json("v.json", Some(Duration::ZERO), || {
            Ok(r#"{"a":2}"#.to_string())
        })?;
        assert_eq!(body, r#"{"a":2}"#);

        // Corrupt cache content is a miss.
        std::fs::write(_dir.path().join("cache/json/v.json"), "not json")?;
        let body = store.cached_json("v.json", None, || Ok(r#"{"a":3}"#.to_string()))?;
        assert_eq!(body, r#"{"a":3}"#);

        // Fetches that do not return JSON are rejected.
        assert!(store
            .cached_json("w.json", None, || Ok("garbage".to_string()))
            .is_err());

        Ok(())
    }
}
