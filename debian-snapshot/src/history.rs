// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! History graph construction.

Changelogs, not version comparison, define history: every version names
its predecessors, and the nearest declared predecessor that actually
exists in the archive becomes the parent link. The builder walks the
candidate versions oldest-first, fetches and unpacks whatever is not
already imported, resolves the predecessor links, and derives an emission
order in which every parent precedes its children.

Broken data does not stop a run: versions the archive lost are dropped
with a warning, versions with unusable changelogs start a new line of
history, and ghost versions (named in changelogs, absent from the
archive) are reported. A predecessor chain that revisits a version is a
changelog loop and aborts before anything is emitted.
*/

use {
    crate::{
        changelog::{parse_changelog, ParsedChangelog},
        error::{DebsnapError, Result},
        package_version::PackageVersion,
        signature::{signer_ident, Keyrings},
        snapshot::SnapshotClient,
        unpack::{OrigKey, Unpacker},
    },
    slog::{debug, warn},
    std::{
        collections::{HashMap, HashSet, VecDeque},
        path::PathBuf,
    },
};

/// Per-run state threaded through the builder and emitter.
pub struct RunContext {
    /// Base logger as constructed at startup.
    base_logger: slog::Logger,

    /// Active logger, possibly level-clamped by the `verbosity` option.
    pub logger: slog::Logger,

    /// Source package name being imported.
    pub package: String,

    /// Remote alias; appears in the branch refs the importer owns.
    pub remote: String,

    pub client: SnapshotClient,
    pub keyrings: Keyrings,

    /// Versions excluded from the working set by `skip=`.
    pub skip: HashSet<String>,

    /// key id -> fallback address, from `email=`.
    pub emails: HashMap<String, String>,

    /// Process-scoped scratch directory; working trees live here and die
    /// with the run.
    pub scratch: tempfile::TempDir,

    /// How many newest versions to consider; `None` means all.
    pub depth: Option<usize>,
}

impl RunContext {
    pub fn new(
        logger: slog::Logger,
        package: String,
        remote: String,
        client: SnapshotClient,
        keyrings: Keyrings,
        skip: HashSet<String>,
        emails: HashMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            base_logger: logger.clone(),
            logger,
            package,
            remote,
            client,
            keyrings,
            skip,
            emails,
            scratch: tempfile::TempDir::new()?,
            depth: None,
        })
    }

    /// Clamp logging to the level implied by a remote-helper verbosity.
    pub fn set_verbosity(&mut self, verbosity: u64) {
        use slog::Drain;

        let level = match verbosity {
            0 => slog::Level::Error,
            1 => slog::Level::Warning,
            2 => slog::Level::Info,
            _ => slog::Level::Debug,
        };

        let drain = slog::LevelFilter::new(self.base_logger.clone(), level).fuse();
        self.logger = slog::Logger::root(drain, slog::o!());
    }
}

/// Looks up already-imported versions in the host repository.
pub trait TagResolver {
    /// Resolve `refs/tags/<quoted version>` to a commit id, if present.
    fn resolve_tag(&self, quoted_version: &str) -> Option<String>;
}

/// Author identity for a main-branch commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitAuthor {
    /// `Name <email>`.
    pub ident: String,
    pub time: i64,
    /// UTC offset like `+0100`.
    pub offset: String,
}

/// Upstream import work attached to a version.
#[derive(Clone, Debug)]
pub struct UpstreamPlan {
    pub orig_key: OrigKey,
    pub odir: PathBuf,
    pub mtime: i64,
    pub upstream_version: String,
}

/// One annotated upload tag to emit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadTag {
    pub archive: String,
    /// Normalized signer identity.
    pub tagger: String,
    /// Signature timestamp.
    pub time: i64,
    /// Set when the signature is anything but a canonical-keyring
    /// GOODSIG.
    pub annotation: Option<String>,
}

/// Everything the emitter needs for one version.
#[derive(Clone, Debug)]
pub struct PlanEntry {
    pub version: PackageVersion,

    /// Linked predecessor; the emitted commit's first parent.
    pub prev: Option<String>,

    /// `None` when the changelog could not be parsed; the emitter falls
    /// back to a placeholder identity.
    pub author: Option<CommitAuthor>,

    /// Fully patched working tree.
    pub xdir: PathBuf,

    pub upstream: Option<UpstreamPlan>,
    pub uploads: Vec<UploadTag>,

    /// Raw dsc bytes, reproduced in upload tag messages.
    pub dsc: Vec<u8>,
}

/// The builder's output: versions to emit, in a parents-first order.
pub struct ImportPlan {
    pub order: Vec<String>,
    pub entries: HashMap<String, PlanEntry>,

    /// Versions already present in the host repository.
    pub resolved: HashMap<String, String>,

    /// The newest considered version; the main branch ref is anchored
    /// here after emission.
    pub tip: Option<String>,
}

pub struct HistoryBuilder<'a> {
    ctx: &'a RunContext,
    resolver: &'a dyn TagResolver,
}

impl<'a> HistoryBuilder<'a> {
    pub fn new(ctx: &'a RunContext, resolver: &'a dyn TagResolver) -> Self {
        Self { ctx, resolver }
    }

    /// Resolve the package's history into an [ImportPlan].
    pub fn build(&self) -> Result<ImportPlan> {
        let logger = &self.ctx.logger;

        let listed = self
            .ctx
            .client
            .list_versions(&self.ctx.package)?
            .into_iter()
            .filter(|version| !self.ctx.skip.contains(version))
            .collect::<Vec<_>>();

        let window_len = match self.ctx.depth {
            Some(depth) => depth.min(listed.len()),
            None => listed.len(),
        };
        let window = &listed[..window_len];
        let window_set = window.iter().cloned().collect::<HashSet<_>>();

        // Predecessor candidates may be anywhere in the archive, not
        // just inside the depth window.
        let mut working = listed.iter().cloned().collect::<HashSet<_>>();

        let mut unpacker = Unpacker::new(self.ctx.scratch.path());
        let mut resolved = HashMap::new();
        let mut entries: HashMap<String, PlanEntry> = HashMap::new();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut initial: Vec<String> = vec![];

        for version in window.iter().rev() {
            let parsed_version = PackageVersion::parse(version)?;

            if let Some(commit) = self.resolver.resolve_tag(&parsed_version.quoted()) {
                debug!(logger, "{} already imported as {}", version, commit);
                resolved.insert(version.clone(), commit);
                continue;
            }

            let package = match self.ctx.client.fetch_source(
                logger,
                &self.ctx.package,
                version,
                &self.ctx.keyrings,
            ) {
                Ok(package) => package,
                Err(DebsnapError::MissingSource(_)) => {
                    warn!(logger, "no source in the archive for {}; dropping it", version);
                    working.remove(version);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let unpacked = unpacker.unpack(logger, &package)?;

            let (author, declared) =
                self.read_changelog(&unpacked.xdir.join("debian/changelog"), version);

            let (prev, ghosts) = resolve_predecessor(&declared, &working, &self.ctx.skip);
            for ghost in ghosts {
                warn!(logger, "ghost version {} referenced by {}", ghost, version);
            }

            let mut uploads = vec![];
            let mut seen_tags = HashSet::new();
            for witness in &package.dscs {
                let tag_name = format!("{}/{}", witness.finfo.archive_name, parsed_version.quoted());
                if !seen_tags.insert(tag_name) {
                    continue;
                }

                let tagger =
                    signer_ident(&witness.sig.signer, &witness.sig.key_id, &self.ctx.emails)?;

                uploads.push(UploadTag {
                    archive: witness.finfo.archive_name.clone(),
                    tagger,
                    time: witness.sig.timestamp,
                    annotation: if witness.sig.is_canonical() {
                        None
                    } else {
                        Some(witness.sig.annotation())
                    },
                });
            }

            let upstream = unpacked.upstream.as_ref().map(|(key, up)| UpstreamPlan {
                orig_key: key.clone(),
                odir: up.odir.clone(),
                mtime: up.orig_mtime,
                upstream_version: package.version.upstream_version().to_string(),
            });

            // Linking: a predecessor that is pending in the window makes
            // this version its successor. A resolved or out-of-window
            // predecessor is a cut point, and a version with no
            // predecessor is a root; both enqueue immediately.
            let prev = match prev {
                Some(prev) if window_set.contains(&prev) && !resolved.contains_key(&prev) => {
                    successors.entry(prev.clone()).or_default().push(version.clone());
                    Some(prev)
                }
                Some(prev) if resolved.contains_key(&prev) => {
                    initial.push(version.clone());
                    Some(prev)
                }
                Some(prev) => {
                    debug!(
                        logger,
                        "predecessor {} of {} is outside the depth window", prev, version
                    );
                    initial.push(version.clone());
                    None
                }
                None => {
                    initial.push(version.clone());
                    None
                }
            };

            entries.insert(
                version.clone(),
                PlanEntry {
                    version: parsed_version,
                    prev,
                    author,
                    xdir: unpacked.xdir.clone(),
                    upstream,
                    uploads,
                    dsc: package.cleartext.clone(),
                },
            );
        }

        // A linked predecessor can disappear after linking (its source
        // went missing later in the pass). Versions stranded that way
        // restart as roots; stranded versions whose predecessors all
        // still exist form a cycle, which is fatal.
        let mut roots = initial;
        let mut order;
        loop {
            order = emission_order(&roots, &successors)?;

            let ordered = order.iter().collect::<HashSet<_>>();
            let mut stranded = entries
                .keys()
                .filter(|version| !ordered.contains(version))
                .cloned()
                .collect::<Vec<_>>();
            if stranded.is_empty() {
                break;
            }
            stranded.sort();

            let mut rescued = false;
            for version in &stranded {
                match entries.get(version).and_then(|entry| entry.prev.clone()) {
                    // Still waiting on a pending entry: a cycle member or
                    // downstream of one; leave it for the loop check.
                    Some(prev) if entries.contains_key(&prev) => continue,

                    // The predecessor resolved to an existing tag after
                    // this version linked to it; the link stands.
                    Some(prev) if resolved.contains_key(&prev) => {
                        roots.push(version.clone());
                        rescued = true;
                    }

                    _ => {
                        warn!(logger, "{} lost its predecessor; starting a new line", version);
                        roots.push(version.clone());
                        if let Some(entry) = entries.get_mut(version) {
                            entry.prev = None;
                        }
                        rescued = true;
                    }
                }
            }

            if !rescued {
                return Err(DebsnapError::ChangelogLoop(stranded.remove(0)));
            }
        }

        // The branch tip anchors to the newest version that exists.
        let tip = window
            .iter()
            .find(|version| entries.contains_key(*version) || resolved.contains_key(*version))
            .cloned();

        Ok(ImportPlan {
            order,
            entries,
            resolved,
            tip,
        })
    }

    /// Read and interpret a version's changelog.
    ///
    /// Returns the commit author (when recoverable) and the declared
    /// predecessor versions. A changelog that is unreadable, unparseable,
    /// or belongs to a different version yields no links: the version
    /// starts a new line of history.
    fn read_changelog(
        &self,
        path: &std::path::Path,
        version: &str,
    ) -> (Option<CommitAuthor>, Vec<String>) {
        let logger = &self.ctx.logger;

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(logger, "cannot read changelog of {}: {}", version, e);
                return (None, vec![]);
            }
        };

        let parsed = match parse_changelog(logger, &data, &self.ctx.skip) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(logger, "broken changelog on {}: {}", version, e);
                return (None, vec![]);
            }
        };

        let ParsedChangelog {
            author,
            when,
            versions,
        } = parsed;

        if versions.first().map(String::as_str) != Some(version) {
            warn!(
                logger,
                "changelog of {} starts with {:?}; ignoring its history",
                version,
                versions.first()
            );
            return (None, vec![]);
        }

        let (time, offset) = when.unwrap_or((0, "+0000".to_string()));

        (
            Some(CommitAuthor {
                ident: author,
                time,
                offset,
            }),
            versions,
        )
    }
}

/// Walk a changelog's declared predecessors for the nearest one present
/// in the working set.
///
/// `declared` starts with the version itself. Entries crossed before the
/// match that are neither present nor skipped are ghosts.
pub fn resolve_predecessor(
    declared: &[String],
    working: &HashSet<String>,
    skip: &HashSet<String>,
) -> (Option<String>, Vec<String>) {
    let mut ghosts = vec![];

    for candidate in declared.iter().skip(1) {
        if working.contains(candidate) {
            return (Some(candidate.clone()), ghosts);
        }
        if !skip.contains(candidate) {
            ghosts.push(candidate.clone());
        }
    }

    (None, ghosts)
}

/// Expand the initial enqueue set into a full emission order.
///
/// Every version is visited exactly once, parents before children.
/// Re-popping a visited version means the predecessor chain loops, which
/// is a broken changelog and fatal.
pub fn emission_order(
    initial: &[String],
    successors: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut queue = initial.iter().cloned().collect::<VecDeque<_>>();
    let mut done = HashSet::new();
    let mut order = vec![];

    while let Some(version) = queue.pop_front() {
        if !done.insert(version.clone()) {
            return Err(DebsnapError::ChangelogLoop(version));
        }
        if let Some(next) = successors.get(&version) {
            queue.extend(next.iter().cloned());
        }
        order.push(version);
    }

    Ok(order)
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn vec_of(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn predecessor_nearest_match() {
        let declared = vec_of(&["1.0-3", "1.0-2", "1.0-1"]);
        let working = set(&["1.0-3", "1.0-1"]);

        let (prev, ghosts) = resolve_predecessor(&declared, &working, &HashSet::new());
        assert_eq!(prev.as_deref(), Some("1.0-1"));
        assert_eq!(ghosts, vec_of(&["1.0-2"]));
    }

    #[test]
    fn predecessor_skipped_is_no_ghost() {
        let declared = vec_of(&["1.0-3", "1.0-2", "1.0-1"]);
        let working = set(&["1.0-3", "1.0-1"]);
        let skip = set(&["1.0-2"]);

        let (prev, ghosts) = resolve_predecessor(&declared, &working, &skip);
        assert_eq!(prev.as_deref(), Some("1.0-1"));
        assert!(ghosts.is_empty());
    }

    #[test]
    fn predecessor_none() {
        let declared = vec_of(&["1.0-1"]);
        let (prev, ghosts) = resolve_predecessor(&declared, &set(&["1.0-1"]), &HashSet::new());
        assert_eq!(prev, None);
        assert!(ghosts.is_empty());
    }

    #[test]
    fn order_parents_first() -> Result<()> {
        let mut successors = HashMap::new();
        successors.insert("1.0-1".to_string(), vec_of(&["1.0-2"]));
        successors.insert("1.0-2".to_string(), vec_of(&["1.0-3", "1.1-1"]));

        let order = emission_order(&vec_of(&["1.0-1"]), &successors)?;
        assert_eq!(order, vec_of(&["1.0-1", "1.0-2", "1.0-3", "1.1-1"]));

        Ok(())
    }

    #[test]
    fn order_multiple_roots() -> Result<()> {
        let mut successors = HashMap::new();
        successors.insert("2.0-1".to_string(), vec_of(&["2.0-2"]));

        let order = emission_order(&vec_of(&["1.0-1", "2.0-1"]), &successors)?;
        assert_eq!(order, vec_of(&["1.0-1", "2.0-1", "2.0-2"]));

        Ok(())
    }

    #[test]
    fn order_detects_loops() {
        let mut successors = HashMap::new();
        successors.insert("a".to_string(), vec_of(&["b"]));
        successors.insert("b".to_string(), vec_of(&["a"]));

        assert!(matches!(
            emission_order(&vec_of(&["a"]), &successors),
            Err(DebsnapError::ChangelogLoop(_))
        ));
    }
}
