// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Keyring discovery and acquisition.

Historical uploads were signed with keys long since retired, so the full
keyring set spans the active Debian keyring, the maintainers keyring, and
the emeritus/removed keyrings in both gpg and legacy pgp formats.
*/

use {
    crate::{
        error::{DebsnapError, Result},
        snapshot::SnapshotClient,
        store::ContentStore,
        unpack,
    },
    slog::{info, warn},
    std::path::{Path, PathBuf},
};

/// Keyring file names we look for, with the short names used in
/// diagnostics and upload tag annotations.
pub const KEYRING_FILES: &[(&str, &str)] = &[
    ("debian", "debian-keyring.gpg"),
    ("debian-maintainers", "debian-maintainers.gpg"),
    ("debian-emeritus", "emeritus-keyring.gpg"),
    ("debian-emeritus-pgp", "emeritus-keyring.pgp"),
    ("debian-removed", "removed-keys.gpg"),
    ("debian-removed-pgp", "removed-keys.pgp"),
];

/// Directories searched for keyring files, in order.
///
/// Note ~/.local/share/keyrings is read but never written: gnome-keyring
/// stores secrets there.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".local/share/public-keyrings"));
        paths.push(home.join(".local/share/keyrings"));
    }
    paths.push(PathBuf::from("/usr/share/keyrings"));
    paths
}

/// The directory `get-keyrings` installs into.
pub fn install_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(DebsnapError::NoKeyrings)?;
    Ok(home.join(".local/share/public-keyrings"))
}

/// Locate the known keyring files.
///
/// Returns `(name, path)` pairs for every keyring found, preserving the
/// [KEYRING_FILES] order, and whether any known keyring was absent.
pub fn discover() -> (Vec<(String, PathBuf)>, bool) {
    let search = search_paths();
    let mut found = vec![];
    let mut missing = false;

    for (name, file_name) in KEYRING_FILES {
        match search.iter().map(|dir| dir.join(file_name)).find(|p| p.exists()) {
            Some(path) => found.push((name.to_string(), path)),
            None => missing = true,
        }
    }

    (found, missing)
}

/// Export user-trusted keys from the caller's default gpg keyring into an
/// ephemeral keyring file under `dir`.
///
/// This is the implementation of the `trust=<kid>,…` URL query: the key
/// material lives in gpg-owned state, so gpg itself does the export.
pub fn export_trusted_keys(key_ids: &[String], dir: &Path) -> Result<PathBuf> {
    let path = dir.join("trusted.gpg");

    let output = std::process::Command::new("gpg")
        .arg("--export")
        .args(key_ids)
        .output()?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(DebsnapError::Gpg(format!(
            "gpg --export {} failed: {}",
            key_ids.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    std::fs::write(&path, &output.stdout)?;
    Ok(path)
}

/// Download and install the distribution keyrings.
///
/// Fetches the newest `debian-keyring` source package through the
/// snapshot client (the keyring package is its own trust anchor, so no
/// signature check applies here), unpacks it, and copies every keyring
/// file found in the tree into [install_dir], flattened to basenames.
pub fn install_keyrings(logger: &slog::Logger) -> Result<()> {
    let store = ContentStore::open_default()?;
    let client = SnapshotClient::new(store)?;

    let versions = client.list_versions("debian-keyring")?;
    let newest = versions
        .first()
        .ok_or_else(|| DebsnapError::MissingSource("debian-keyring".to_string()))?;

    info!(logger, "downloading debian-keyring {}", newest);
    let downloaded = client.download_version(logger, "debian-keyring", newest)?;

    let scratch = tempfile::TempDir::new()?;
    let tree = scratch.path().join("x");
    unpack::extract(&downloaded.dsc_path, &tree, false)?;

    let dest_dir = install_dir()?;
    std::fs::create_dir_all(&dest_dir)?;

    let mut installed = 0usize;
    for entry in walkdir::WalkDir::new(&tree) {
        let entry = entry.map_err(|e| DebsnapError::Unpack(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".gpg") && !name.ends_with(".pgp") {
            continue;
        }

        let dest = dest_dir.join(name.as_ref());
        std::fs::copy(entry.path(), &dest)?;
        installed += 1;
        info!(logger, "installed {}", dest.display());
    }

    if installed == 0 {
        warn!(logger, "no keyring files found in debian-keyring {}", newest);
    }

    Ok(())
}
