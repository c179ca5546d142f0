// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian source package history reconstruction.

This crate turns the publication history of a single Debian source package,
as recorded by <https://snapshot.debian.org>, into a commit graph that git
can consume through its fast-import protocol. It is the engine behind the
`git-remote-deb` helper: `git clone deb::<package>` ends up here.

# A Tour of Functionality

The [snapshot] module implements the snapshot archive client. It can
enumerate every version of a source package ever published
([snapshot::SnapshotClient::list_versions]) and download the files of a
given version into a local content-addressed store
([snapshot::SnapshotClient::fetch_source]). The store itself lives in
[store]: blobs are kept under their SHA-1 in a `by-hash` zone, mirrored
into per-archive directory trees via hard links, and JSON archive responses
are cached with per-endpoint freshness policies.

A downloaded `.dsc` is a PGP clearsigned manifest. The [signature] module
verifies the signature against a set of Debian keyrings discovered by
[keyring], returning the signer identity, key id, keyring of origin,
signature timestamp, and the signed cleartext. The cleartext is parsed with
the control-file primitives in [control] and modeled by
[dsc::SourcePackage], which classifies the package as native or split
(orig + debian delta) and validates its component file names.

[unpack::Unpacker] expands a source package into working trees: the fully
patched tree used for the main branch, and, for split packages, the
upstream-only tree used for the upstream branch. Upstream unpacks are
de-duplicated by the tuple of component content hashes, so a run over many
Debian revisions of one upstream release extracts that release once.

[changelog] reads `debian/changelog` to learn which version a package
declares as its predecessor. [history::HistoryBuilder] combines all of the
above: it decides which versions need importing, resolves predecessor
links, reports ghost versions, detects changelog loops, and produces an
[history::ImportPlan] in a safe emission order. [fastimport::Emitter]
materializes the plan as a fast-import stream: upstream commits, main
commits with merge parents, one lightweight tag per version and one
annotated upload tag per witnessed `.dsc`.

Finally, [remote] implements the git remote-helper dialogue
(`capabilities` / `option` / `list` / `import`) that drives the whole
pipeline, and [history::RunContext] carries the per-run state (package,
remote alias, store, keyrings, skips, email overrides, scratch directory,
logger) threaded through every stage.

# Version handling

[package_version::PackageVersion] implements Debian version parsing and
the policy comparison algorithm. History order is taken from changelogs,
never from version comparison; the total order exists for display and for
deriving tag-safe quoted forms ([package_version::PackageVersion::quoted]).
*/

pub mod changelog;
pub mod control;
pub mod dsc;
pub mod error;
pub mod fastimport;
pub mod history;
pub mod keyring;
pub mod package_version;
pub mod remote;
pub mod signature;
pub mod snapshot;
pub mod store;
pub mod unpack;
