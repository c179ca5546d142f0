// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fast-import stream emission.

The emitter turns an [ImportPlan] into the textual fast-import protocol
on the remote-helper's stdout. Trees are materialized into the host
repository's object store first (a scratch-index `git add -A` followed by
`git write-tree`), so commits reference tree ids instead of inline blobs.

Two phases: upstream commits for every distinct orig identity, then main
commits in graph order, each followed by a lightweight version tag and
the annotated upload tags. `data` lengths are byte-exact; every logical
record is flushed.
*/

use {
    crate::{
        error::{DebsnapError, Result},
        history::{ImportPlan, TagResolver},
        unpack::OrigKey,
    },
    slog::warn,
    std::{
        collections::{HashMap, HashSet},
        io::Write,
        path::{Path, PathBuf},
        process::Command,
    },
};

/// Materializes a working tree into the host VCS object store.
///
/// Only the fast-import text stream is pinned; how trees come into
/// existence is an implementation detail behind this trait, which also
/// keeps the emitter testable without a repository.
pub trait TreeWriter {
    /// Write `dir` as a tree object, returning its id.
    fn write_tree(&mut self, dir: &Path) -> Result<String>;
}

/// Handle on the host git repository the helper runs inside.
pub struct GitRepo {
    git_dir: PathBuf,
}

impl GitRepo {
    /// Discover the repository from the environment git set up for us.
    pub fn discover() -> Result<Self> {
        let git_dir = git_stdout(Command::new("git").args(["rev-parse", "--absolute-git-dir"]))?;

        Ok(Self {
            git_dir: PathBuf::from(git_dir),
        })
    }

    /// A tree writer using scratch index files under `scratch`.
    pub fn tree_writer(&self, scratch: &Path) -> GitTreeWriter {
        GitTreeWriter {
            git_dir: self.git_dir.clone(),
            scratch: scratch.to_path_buf(),
            counter: 0,
        }
    }
}

impl TagResolver for GitRepo {
    fn resolve_tag(&self, quoted_version: &str) -> Option<String> {
        git_stdout(Command::new("git").env("GIT_DIR", &self.git_dir).args([
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/tags/{}^{{commit}}", quoted_version),
        ]))
        .ok()
    }
}

/// [TreeWriter] shelling out to git.
pub struct GitTreeWriter {
    git_dir: PathBuf,
    scratch: PathBuf,
    counter: usize,
}

impl TreeWriter for GitTreeWriter {
    fn write_tree(&mut self, dir: &Path) -> Result<String> {
        self.counter += 1;
        let index = self.scratch.join(format!("index{}", self.counter));

        git_stdout(
            Command::new("git")
                .env("GIT_DIR", &self.git_dir)
                .env("GIT_INDEX_FILE", &index)
                .env("GIT_WORK_TREE", dir)
                .current_dir(dir)
                .args(["add", "-Af", "."]),
        )?;

        git_stdout(
            Command::new("git")
                .env("GIT_DIR", &self.git_dir)
                .env("GIT_INDEX_FILE", &index)
                .args(["write-tree"]),
        )
    }
}

/// Run a git command, returning trimmed stdout.
fn git_stdout(cmd: &mut Command) -> Result<String> {
    let output = cmd.output()?;

    if !output.status.success() {
        return Err(DebsnapError::Git(format!(
            "{:?}: {}",
            cmd,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct Emitter<'a, W: Write> {
    out: &'a mut W,
    trees: &'a mut dyn TreeWriter,
    remote: String,
    package: String,
    next_mark: usize,
}

impl<'a, W: Write> Emitter<'a, W> {
    pub fn new(
        out: &'a mut W,
        trees: &'a mut dyn TreeWriter,
        remote: &str,
        package: &str,
    ) -> Self {
        Self {
            out,
            trees,
            remote: remote.to_string(),
            package: package.to_string(),
            next_mark: 0,
        }
    }

    fn debian_ref(&self) -> String {
        format!("refs/debian/{}/{}", self.remote, self.package)
    }

    fn upstream_ref(&self) -> String {
        format!("refs/upstream/{}/{}", self.remote, self.package)
    }

    fn fresh_mark(&mut self) -> usize {
        self.next_mark += 1;
        self.next_mark
    }

    /// A `data` block with a byte-exact length and trailing newline.
    fn data(&mut self, payload: &[u8]) -> Result<()> {
        writeln!(self.out, "data {}", payload.len())?;
        self.out.write_all(payload)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn end_record(&mut self) -> Result<()> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    /// Emit the whole plan.
    pub fn emit(&mut self, logger: &slog::Logger, plan: &ImportPlan) -> Result<()> {
        let mut resolved = plan.resolved.clone();

        // Upstream phase. One commit per distinct orig identity; the
        // first owner carries the merge, siblings inherit it through
        // ancestry. Upstream commits chain on their branch in emission
        // order.
        let mut upstream_marks: HashMap<String, usize> = HashMap::new();
        let mut seen_keys: HashSet<OrigKey> = HashSet::new();

        for version in &plan.order {
            let entry = &plan.entries[version];
            let upstream = match &entry.upstream {
                Some(upstream) => upstream,
                None => continue,
            };

            if !seen_keys.insert(upstream.orig_key.clone()) {
                continue;
            }

            let tree = self.trees.write_tree(&upstream.odir)?;
            let mark = self.fresh_mark();

            writeln!(self.out, "commit {}", self.upstream_ref())?;
            writeln!(self.out, "mark :{}", mark)?;
            writeln!(self.out, "committer <tar-importer> {} +0000", upstream.mtime)?;
            self.data(format!("Import {}\n", upstream.upstream_version).as_bytes())?;
            writeln!(self.out, "deleteall")?;
            writeln!(self.out, "M 040000 {} \"\"", tree)?;
            self.end_record()?;

            upstream_marks.insert(version.clone(), mark);
        }

        // Main phase.
        for version in &plan.order {
            let entry = &plan.entries[version];

            let tree = self.trees.write_tree(&entry.xdir)?;
            let mark = self.fresh_mark();

            let from = match &entry.prev {
                Some(prev) => match resolved.get(prev) {
                    Some(commit) => Some(commit.clone()),
                    None => {
                        warn!(
                            logger,
                            "predecessor {} of {} has no commit; starting a new line",
                            prev,
                            version
                        );
                        None
                    }
                },
                None => None,
            };

            if from.is_none() {
                // Detach the branch so a root commit gets no implicit
                // parent from the current tip.
                writeln!(self.out, "reset {}", self.debian_ref())?;
                self.end_record()?;
            }

            writeln!(self.out, "commit {}", self.debian_ref())?;
            writeln!(self.out, "mark :{}", mark)?;
            match &entry.author {
                Some(author) => writeln!(
                    self.out,
                    "committer {} {} {}",
                    author.ident, author.time, author.offset
                )?,
                None => writeln!(self.out, "committer <malformed-changelog> 0 +0000")?,
            }
            self.data(format!("Import {}\n", version).as_bytes())?;
            if let Some(from) = &from {
                writeln!(self.out, "from {}", from)?;
            }
            if let Some(upstream_mark) = upstream_marks.get(version) {
                writeln!(self.out, "merge :{}", upstream_mark)?;
            }
            writeln!(self.out, "deleteall")?;
            writeln!(self.out, "M 040000 {} \"\"", tree)?;
            self.end_record()?;

            resolved.insert(version.clone(), format!(":{}", mark));

            let quoted = entry.version.quoted();

            writeln!(self.out, "reset refs/tags/{}", quoted)?;
            writeln!(self.out, "from :{}", mark)?;
            self.end_record()?;

            for upload in &entry.uploads {
                writeln!(self.out, "tag {}/{}", upload.archive, quoted)?;
                writeln!(self.out, "from :{}", mark)?;
                writeln!(self.out, "tagger {} {} +0000", upload.tagger, upload.time)?;

                let mut body = format!(
                    "Upload {}{}\n\n",
                    version,
                    upload.annotation.as_deref().unwrap_or("")
                )
                .into_bytes();
                body.extend_from_slice(&entry.dsc);
                self.data(&body)?;
                self.end_record()?;
            }
        }

        // Anchor the branch tip on the newest version.
        if let Some(commit) = plan.tip.as_ref().and_then(|tip| resolved.get(tip)) {
            writeln!(self.out, "reset {}", self.debian_ref())?;
            writeln!(self.out, "from {}", commit)?;
            self.end_record()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            history::{CommitAuthor, PlanEntry, UploadTag, UpstreamPlan},
            package_version::PackageVersion,
        },
    };

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// Hands out predictable ids so streams can be asserted exactly.
    struct FakeTrees {
        counter: usize,
    }

    impl TreeWriter for FakeTrees {
        fn write_tree(&mut self, _dir: &Path) -> Result<String> {
            self.counter += 1;
            Ok(format!("t{}", self.counter))
        }
    }

    fn native_entry(version: &str, prev: Option<&str>) -> PlanEntry {
        PlanEntry {
            version: PackageVersion::parse(version).unwrap(),
            prev: prev.map(|p| p.to_string()),
            author: Some(CommitAuthor {
                ident: "Ana Lopez <ana@debian.org>".to_string(),
                time: 1199358000,
                offset: "+0100".to_string(),
            }),
            xdir: PathBuf::from("/scratch/x"),
            upstream: None,
            uploads: vec![UploadTag {
                archive: "debian".to_string(),
                tagger: "Ana Lopez <ana@debian.org>".to_string(),
                time: 1199360000,
                annotation: None,
            }],
            dsc: b"DSC".to_vec(),
        }
    }

    fn emit(plan: &ImportPlan) -> String {
        let mut out = vec![];
        let mut trees = FakeTrees { counter: 0 };
        Emitter::new(&mut out, &mut trees, "origin", "gzrt")
            .emit(&logger(), plan)
            .expect("emission succeeds");
        String::from_utf8(out).expect("stream is UTF-8")
    }

    #[test]
    fn native_single_version() {
        let plan = ImportPlan {
            order: vec!["0.5-1".to_string()],
            entries: [("0.5-1".to_string(), native_entry("0.5-1", None))]
                .into_iter()
                .collect(),
            resolved: HashMap::new(),
            tip: Some("0.5-1".to_string()),
        };

        let expected = "\
reset refs/debian/origin/gzrt

commit refs/debian/origin/gzrt
mark :1
committer Ana Lopez <ana@debian.org> 1199358000 +0100
data 13
Import 0.5-1

deleteall
M 040000 t1 \"\"

reset refs/tags/0.5-1
from :1

tag debian/0.5-1
from :1
tagger Ana Lopez <ana@debian.org> 1199360000 +0000
data 17
Upload 0.5-1

DSC

reset refs/debian/origin/gzrt
from :1

";

        assert_eq!(emit(&plan), expected);
    }

    #[test]
    fn chained_versions_share_upstream() {
        let orig_key = vec!["aa".to_string()];

        let mut first = native_entry("1.0-1", None);
        first.upstream = Some(UpstreamPlan {
            orig_key: orig_key.clone(),
            odir: PathBuf::from("/scratch/o"),
            mtime: 1000,
            upstream_version: "1.0".to_string(),
        });

        let mut second = native_entry("1.0-2", Some("1.0-1"));
        second.upstream = Some(UpstreamPlan {
            orig_key,
            odir: PathBuf::from("/scratch/o"),
            mtime: 1000,
            upstream_version: "1.0".to_string(),
        });

        let plan = ImportPlan {
            order: vec!["1.0-1".to_string(), "1.0-2".to_string()],
            entries: [
                ("1.0-1".to_string(), first),
                ("1.0-2".to_string(), second),
            ]
            .into_iter()
            .collect(),
            resolved: HashMap::new(),
            tip: Some("1.0-2".to_string()),
        };

        let stream = emit(&plan);

        // One upstream commit for the shared orig identity.
        assert_eq!(stream.matches("commit refs/upstream/origin/gzrt").count(), 1);
        assert!(stream.contains("committer <tar-importer> 1000 +0000"));

        // The merge lands on the first owner only; the second commit
        // links to the first through the branch instead.
        assert_eq!(stream.matches("merge :1").count(), 1);
        assert!(stream.contains("from :2"));

        // The branch anchors on the newest version's mark.
        assert!(stream.ends_with("reset refs/debian/origin/gzrt\nfrom :3\n\n"));
    }

    #[test]
    fn resolved_predecessor_and_annotation() {
        let mut entry = native_entry("0.6-1", Some("0.5-1"));
        entry.uploads[0].annotation = Some(" (local/6908386EC98FE2A1 GOODSIG)".to_string());

        let plan = ImportPlan {
            order: vec!["0.6-1".to_string()],
            entries: [("0.6-1".to_string(), entry)].into_iter().collect(),
            resolved: [(
                "0.5-1".to_string(),
                "1111111111111111111111111111111111111111".to_string(),
            )]
            .into_iter()
            .collect(),
            tip: Some("0.6-1".to_string()),
        };

        let stream = emit(&plan);

        // No branch detach: the commit continues from the resolved tag.
        assert!(!stream.starts_with("reset"));
        assert!(stream.contains("from 1111111111111111111111111111111111111111\n"));
        assert!(stream.contains("Upload 0.6-1 (local/6908386EC98FE2A1 GOODSIG)\n\nDSC"));
    }

    #[test]
    fn rerun_emits_nothing() {
        let plan = ImportPlan {
            order: vec![],
            entries: HashMap::new(),
            resolved: [("0.5-1".to_string(), "1111".to_string())]
                .into_iter()
                .collect(),
            tip: Some("0.5-1".to_string()),
        };

        let stream = emit(&plan);

        // Only the final anchor, no commits and no tags.
        assert!(!stream.contains("commit"));
        assert!(!stream.contains("tag"));
        assert_eq!(stream, "reset refs/debian/origin/gzrt\nfrom 1111\n\n");
    }
}
