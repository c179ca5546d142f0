// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source package extraction.

Extraction shells out to `dpkg-source`, the reference implementation of
the many historical source formats. Signature checking is disabled (the
signature gate already ran) and trees are unpacked without copying the
tarballs.

Each version yields a fully patched tree for the main branch. Split
packages additionally yield an upstream-only tree; those are keyed by the
tuple of component content hashes so that consecutive Debian revisions of
one upstream release share a single extraction.
*/

use {
    crate::{
        dsc::SourcePackage,
        error::{DebsnapError, Result},
    },
    slog::debug,
    std::{
        collections::HashMap,
        os::unix::fs::MetadataExt,
        path::{Path, PathBuf},
        process::Command,
    },
    walkdir::WalkDir,
};

/// Upstream identity: content hashes of `(orig, comp…)`.
pub type OrigKey = Vec<String>;

/// An unpacked upstream tree.
#[derive(Clone, Debug)]
pub struct UpstreamUnpack {
    pub odir: PathBuf,

    /// Newest mtime inside the tree, used as the upstream commit time.
    pub orig_mtime: i64,
}

/// The working trees of one version.
#[derive(Clone, Debug)]
pub struct Unpacked {
    /// Fully patched tree.
    pub xdir: PathBuf,

    /// Upstream tree and its identity key, for split packages.
    pub upstream: Option<(OrigKey, UpstreamUnpack)>,
}

pub struct Unpacker {
    scratch: PathBuf,
    memo: HashMap<OrigKey, UpstreamUnpack>,
    counter: usize,
}

impl Unpacker {
    /// Construct an unpacker placing trees under `scratch`.
    pub fn new(scratch: impl AsRef<Path>) -> Self {
        Self {
            scratch: scratch.as_ref().to_path_buf(),
            memo: HashMap::new(),
            counter: 0,
        }
    }

    /// Unpack one version into working trees.
    pub fn unpack(&mut self, logger: &slog::Logger, package: &SourcePackage) -> Result<Unpacked> {
        self.counter += 1;

        let xdir = self.scratch.join(format!("x{}", self.counter));
        extract(&package.dsc_path, &xdir, false)?;

        let upstream = match package.orig_key() {
            None => None,
            Some(key) => {
                let unpack = match self.memo.get(&key) {
                    Some(unpack) => {
                        debug!(
                            logger,
                            "upstream of {} already unpacked at {}",
                            package.version_str,
                            unpack.odir.display()
                        );
                        unpack.clone()
                    }
                    None => {
                        let odir = self.scratch.join(format!("o{}", self.counter));
                        extract(&package.dsc_path, &odir, true)?;

                        let unpack = UpstreamUnpack {
                            orig_mtime: newest_mtime(&odir)?,
                            odir,
                        };
                        self.memo.insert(key.clone(), unpack.clone());
                        unpack
                    }
                };

                Some((key, unpack))
            }
        };

        Ok(Unpacked { xdir, upstream })
    }
}

/// Extract a dsc into `dest`.
///
/// With `skip_debianisation`, produces the upstream-only tree.
pub fn extract(dsc: &Path, dest: &Path, skip_debianisation: bool) -> Result<()> {
    let mut cmd = Command::new("dpkg-source");
    cmd.arg("--no-check").arg("--no-copy");
    if skip_debianisation {
        cmd.arg("--skip-debianisation");
    }
    cmd.arg("-x").arg(dsc).arg(dest);

    let output = cmd.output()?;
    if !output.status.success() {
        return Err(DebsnapError::Unpack(format!(
            "dpkg-source -x {}: {}",
            dsc.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// The newest mtime of any entry under `dir`, in unix seconds.
fn newest_mtime(dir: &Path) -> Result<i64> {
    let mut newest = 0i64;

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| DebsnapError::Unpack(e.to_string()))?;
        let meta = entry
            .metadata()
            .map_err(|e| DebsnapError::Unpack(e.to_string()))?;
        newest = newest.max(meta.mtime());
    }

    Ok(newest)
}
