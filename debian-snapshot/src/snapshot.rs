// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! snapshot.debian.org client.

The snapshot archive exposes a "machine readable" JSON API: a version
list per source package and, per version, a manifest grouping files by
content hash. Files themselves are served by hash. All responses flow
through the [ContentStore] cache; requests are strictly sequential.
*/

use {
    crate::{
        dsc::{DscWitness, SourcePackage},
        error::{DebsnapError, Result},
        signature::{Keyrings, SigInfo},
        store::{ContentStore, PathKey},
    },
    serde::Deserialize,
    slog::debug,
    std::{
        collections::{BTreeMap, HashMap},
        path::PathBuf,
        time::Duration,
    },
    url::Url,
};

/// Base URL of the snapshot archive.
pub const SNAPSHOT_URL: &str = "https://snapshot.debian.org/";

/// The version list changes as uploads land; the per-version manifests
/// are immutable.
const VERSION_LIST_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct VersionList {
    result: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

#[derive(Debug, Deserialize)]
struct SrcFilesResponse {
    /// hash -> locations where that content was published. BTreeMap for
    /// a deterministic download order.
    fileinfo: BTreeMap<String, Vec<FileInfo>>,
}

/// One snapshot manifest entry: a location a blob was published under.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FileInfo {
    pub archive_name: String,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub first_seen: String,
}

impl FileInfo {
    /// Sort key yielding the deterministic representative of a blob:
    /// earliest upload first.
    pub fn precedence_key(&self) -> (&str, &str, &str, &str) {
        (&self.first_seen, &self.name, &self.archive_name, &self.path)
    }

    /// The mirror location of this entry.
    pub fn path_key(&self) -> PathKey {
        PathKey {
            archive: self.archive_name.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }
}

/// Filename extension used for the manifest homogeneity check.
fn extension(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// All locations of one blob must agree on size and extension; the
/// archive shares empty placeholder files across names, but a size or
/// extension conflict means manifest corruption.
fn check_homogeneous(hash: &str, finfos: &[FileInfo]) -> Result<()> {
    let first = finfos
        .first()
        .ok_or_else(|| DebsnapError::FileInfoMismatch(hash.to_string()))?;

    for finfo in finfos {
        if finfo.size != first.size || extension(&finfo.name) != extension(&first.name) {
            return Err(DebsnapError::FileInfoMismatch(hash.to_string()));
        }
    }

    Ok(())
}

/// The files of one version, downloaded and mirrored.
pub struct DownloadedVersion {
    /// Component file name -> content hash.
    pub hashes: HashMap<String, String>,

    /// Every dsc location, precedence-sorted, with its blob hash.
    pub dscs: Vec<(FileInfo, String)>,

    /// Mirror path of the representative dsc.
    pub dsc_path: PathBuf,
}

pub struct SnapshotClient {
    client: reqwest::blocking::Client,
    base: Url,
    store: ContentStore,
}

impl SnapshotClient {
    /// Construct a client against the canonical snapshot archive.
    pub fn new(store: ContentStore) -> Result<Self> {
        Self::with_base(store, SNAPSHOT_URL)
    }

    /// Construct a client against an alternate archive base URL.
    pub fn with_base(store: ContentStore, base: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("git-deb/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(base)?,
            store,
        })
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    fn get_text(&self, path: &str) -> Result<String> {
        let url = self.base.join(path)?;
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.text()?)
    }

    /// Every published version of `package`, newest first, in archive
    /// publication order (which backports can make diverge from version
    /// order).
    pub fn list_versions(&self, package: &str) -> Result<Vec<String>> {
        let cache_name = format!("{}_versions.json", package);
        let body = self.store.cached_json(&cache_name, Some(VERSION_LIST_MAX_AGE), || {
            self.get_text(&format!("mr/package/{}/", package))
        })?;

        let list: VersionList = serde_json::from_str(&body)?;
        Ok(list.result.into_iter().map(|entry| entry.version).collect())
    }

    /// Download every file of `version` into the store and mirror.
    ///
    /// A 404 from the manifest endpoint means the archive holds no
    /// source for this version ([DebsnapError::MissingSource]).
    pub fn download_version(
        &self,
        logger: &slog::Logger,
        package: &str,
        version: &str,
    ) -> Result<DownloadedVersion> {
        let cache_name = format!("{}_{}.srcfiles.json", package, version);
        let body = self.store.cached_json(&cache_name, None, || {
            let path = format!("mr/package/{}/{}/srcfiles?fileinfo=1", package, version);
            match self.get_text(&path) {
                Err(DebsnapError::Reqwest(e))
                    if e.status() == Some(reqwest::StatusCode::NOT_FOUND) =>
                {
                    Err(DebsnapError::MissingSource(version.to_string()))
                }
                other => other,
            }
        })?;

        let manifest: SrcFilesResponse = serde_json::from_str(&body)?;

        let mirror_prefix = format!("{}_", package);
        let mut hashes = HashMap::new();
        let mut dscs: Vec<(FileInfo, String)> = vec![];

        for (hash, finfos) in &manifest.fileinfo {
            check_homogeneous(hash, finfos)?;

            let mut finfos = finfos.clone();
            finfos.sort_by(|a, b| a.precedence_key().cmp(&b.precedence_key()));
            let representative = &finfos[0];

            if !self.store.has_blob(hash, representative.size)? {
                debug!(logger, "fetching {} ({})", representative.name, hash);
                let url = self.base.join(&format!("file/{}", hash))?;
                let mut response = self.client.get(url).send()?.error_for_status()?;
                self.store.put_blob(hash, representative.size, &mut response)?;
            }

            for finfo in &finfos {
                // The archive shares empty gzip placeholders under many
                // unrelated names; mirror only this package's files.
                if !finfo.name.starts_with(&mirror_prefix) {
                    continue;
                }
                self.store.link_mirror(&finfo.path_key(), hash)?;
                hashes.insert(finfo.name.clone(), hash.clone());
            }

            if representative.name.ends_with(".dsc") {
                for finfo in &finfos {
                    dscs.push((finfo.clone(), hash.clone()));
                }
            }
        }

        dscs.sort_by(|a, b| a.0.precedence_key().cmp(&b.0.precedence_key()));

        let dsc_path = match dscs.first() {
            Some((finfo, _)) => self.store.mirror_path(&finfo.path_key()),
            None => return Err(DebsnapError::MissingSource(version.to_string())),
        };

        Ok(DownloadedVersion {
            hashes,
            dscs,
            dsc_path,
        })
    }

    /// Download, verify, and model one version.
    ///
    /// Multiple dscs for a version are legitimate only when they decode
    /// to the same cleartext; a cleartext disagreement is archive
    /// inconsistency and aborts the run.
    pub fn fetch_source(
        &self,
        logger: &slog::Logger,
        package: &str,
        version: &str,
        keyrings: &Keyrings,
    ) -> Result<SourcePackage> {
        let downloaded = self.download_version(logger, package, version)?;

        let mut sigs: HashMap<String, SigInfo> = HashMap::new();
        let mut cleartext: Option<Vec<u8>> = None;

        for (finfo, hash) in &downloaded.dscs {
            if sigs.contains_key(hash) {
                continue;
            }

            let data = self.store.read_blob(hash)?;
            let (info, text) = keyrings.verify(logger, &data, &finfo.name)?;

            match &cleartext {
                None => cleartext = Some(text),
                Some(previous) if *previous != text => {
                    return Err(DebsnapError::CleartextMismatch(version.to_string()));
                }
                Some(_) => {}
            }

            sigs.insert(hash.clone(), info);
        }

        let cleartext =
            cleartext.ok_or_else(|| DebsnapError::MissingSource(version.to_string()))?;

        let witnesses = downloaded
            .dscs
            .iter()
            .map(|(finfo, hash)| DscWitness {
                finfo: finfo.clone(),
                sig: sigs[hash].clone(),
            })
            .collect();

        SourcePackage::new(
            logger,
            package,
            version,
            witnesses,
            cleartext,
            downloaded.hashes,
            downloaded.dsc_path,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_list_schema() -> Result<()> {
        let body = r#"{
            "_comment": "foo",
            "package": "gzrt",
            "result": [{"version": "0.8-1"}, {"version": "0.5-1"}]
        }"#;

        let list: VersionList = serde_json::from_str(body)?;
        let versions = list
            .result
            .into_iter()
            .map(|e| e.version)
            .collect::<Vec<_>>();
        assert_eq!(versions, vec!["0.8-1", "0.5-1"]);

        Ok(())
    }

    #[test]
    fn srcfiles_schema() -> Result<()> {
        let body = r#"{
            "package": "gzrt",
            "version": "0.5-1",
            "result": [{"hash": "aa"}],
            "fileinfo": {
                "aa": [{
                    "archive_name": "debian",
                    "path": "/pool/main/g/gzrt",
                    "name": "gzrt_0.5-1.dsc",
                    "size": 12,
                    "first_seen": "20080103T000000Z",
                    "unknown_field": true
                }]
            }
        }"#;

        let manifest: SrcFilesResponse = serde_json::from_str(body)?;
        let finfos = &manifest.fileinfo["aa"];
        assert_eq!(finfos[0].name, "gzrt_0.5-1.dsc");
        assert_eq!(finfos[0].size, 12);

        Ok(())
    }

    fn finfo(archive: &str, name: &str, size: u64, first_seen: &str) -> FileInfo {
        FileInfo {
            archive_name: archive.to_string(),
            path: "/pool/main/g/gzrt".to_string(),
            name: name.to_string(),
            size,
            first_seen: first_seen.to_string(),
        }
    }

    #[test]
    fn upload_precedence() {
        let mut finfos = vec![
            finfo("debian-backports", "gzrt_0.5-1.dsc", 12, "20090101T000000Z"),
            finfo("debian", "gzrt_0.5-1.dsc", 12, "20080103T000000Z"),
        ];

        finfos.sort_by(|a, b| a.precedence_key().cmp(&b.precedence_key()));
        assert_eq!(finfos[0].archive_name, "debian");
    }

    #[test]
    fn homogeneity() {
        let same = vec![
            finfo("debian", "gzrt_0.5.orig.tar.gz", 99, "20080103T000000Z"),
            finfo("debian-archive", "gzrt_0.5.orig.tar.gz", 99, "20090101T000000Z"),
        ];
        assert!(check_homogeneous("aa", &same).is_ok());

        let size_conflict = vec![
            finfo("debian", "gzrt_0.5.orig.tar.gz", 99, "20080103T000000Z"),
            finfo("debian", "gzrt_0.5.orig.tar.gz", 100, "20090101T000000Z"),
        ];
        assert!(check_homogeneous("aa", &size_conflict).is_err());

        let ext_conflict = vec![
            finfo("debian", "gzrt_0.5.orig.tar.gz", 99, "20080103T000000Z"),
            finfo("debian", "gzrt_0.5.orig.tar.bz2", 99, "20090101T000000Z"),
        ];
        assert!(check_homogeneous("aa", &ext_conflict).is_err());
    }
}
