// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! git remote-helper protocol.

git invokes the helper with a remote alias and a `deb::` URL and speaks a
line-oriented dialogue on stdio: `capabilities`, zero or more `option`
commands, `list`, then a batch of `import` commands terminated by a blank
line. The helper answers on stdout and, for the import batch, streams the
fast-import data there as well, closing with `done`.

The URL's query string configures the run: `skip=` removes versions from
the working set, `trust=` extends the keyring set with keys exported from
the caller's gpg keyring, and `email=` repairs signer identities that
lack an address.
*/

use {
    crate::{
        error::{DebsnapError, Result},
        fastimport::{Emitter, GitRepo},
        history::{HistoryBuilder, RunContext},
        keyring,
        signature::{Keyring, Keyrings},
        snapshot::SnapshotClient,
        store::ContentStore,
    },
    slog::{debug, warn},
    std::{
        collections::{HashMap, HashSet},
        io::{BufRead, Write},
    },
    url::Url,
};

/// A parsed `deb::` URL.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HelperUrl {
    pub package: String,
    pub skip: HashSet<String>,
    pub trust: Vec<String>,
    pub emails: HashMap<String, String>,
}

/// Parse the URL argument git hands the helper.
///
/// Both spellings arrive in practice: `deb::gzrt?skip=…` from the
/// command line and the bare `gzrt?skip=…` remainder git strips for
/// `<transport>::<address>` remotes.
pub fn parse_helper_url(raw: &str) -> Result<HelperUrl> {
    let rest = raw.strip_prefix("deb::").unwrap_or(raw);
    let url = if rest.starts_with("deb:") {
        Url::parse(rest)?
    } else {
        Url::parse(&format!("deb:{}", rest))?
    };

    let mut parsed = HelperUrl {
        package: url.path().trim_matches('/').to_string(),
        ..Default::default()
    };

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "skip" => {
                parsed
                    .skip
                    .extend(value.split(',').filter(|v| !v.is_empty()).map(String::from));
            }
            "trust" => {
                parsed
                    .trust
                    .extend(value.split(',').filter(|v| !v.is_empty()).map(String::from));
            }
            "email" => {
                if let Some((kid, addr)) = value.split_once(' ') {
                    parsed.emails.insert(kid.to_string(), addr.trim().to_string());
                }
            }
            other => {
                return Err(DebsnapError::BadUrl(format!(
                    "unknown query key {:?} in {}",
                    other, raw
                )));
            }
        }
    }

    Ok(parsed)
}

/// Build the per-run context for a helper invocation.
///
/// Loads the system keyrings (aborting with guidance when none exist)
/// and honors `trust=` by exporting the named keys from the caller's gpg
/// keyring into an ephemeral `local` keyring.
pub fn context_from_url(
    logger: slog::Logger,
    remote: &str,
    parsed: HelperUrl,
) -> Result<RunContext> {
    let store = ContentStore::open_default()?;
    let client = SnapshotClient::new(store)?;
    let keyrings = Keyrings::discover(&logger)?;

    let mut ctx = RunContext::new(
        logger,
        parsed.package,
        remote.to_string(),
        client,
        keyrings,
        parsed.skip,
        parsed.emails,
    )?;

    if !parsed.trust.is_empty() {
        let path = keyring::export_trusted_keys(&parsed.trust, ctx.scratch.path())?;
        let ring = Keyring::load(&ctx.logger, "local", &path)?;
        ctx.keyrings.push(ring);
    }

    Ok(ctx)
}

/// Runs the actual import when the command batch completes.
///
/// Broken out as a trait so the dialogue can be exercised without a git
/// repository or network access.
pub trait Importer {
    fn import(&mut self, ctx: &mut RunContext, out: &mut dyn Write) -> Result<()>;
}

/// Production importer: plan against the host repository, then emit.
pub struct GitImporter;

impl Importer for GitImporter {
    fn import(&mut self, ctx: &mut RunContext, out: &mut dyn Write) -> Result<()> {
        let repo = GitRepo::discover()?;
        let plan = HistoryBuilder::new(ctx, &repo).build()?;

        let mut trees = repo.tree_writer(ctx.scratch.path());
        let mut out = out;
        Emitter::new(&mut out, &mut trees, &ctx.remote, &ctx.package).emit(&ctx.logger, &plan)
    }
}

/// Speak the remote-helper dialogue until stdin closes.
pub fn run_helper(
    ctx: &mut RunContext,
    input: impl BufRead,
    output: &mut impl Write,
    importer: &mut dyn Importer,
) -> Result<()> {
    let mut announced_done = false;
    let mut batch: Vec<String> = vec![];
    let mut imported = false;

    for line in input.lines() {
        let line = line?;
        let line = line.trim_end();

        if line.is_empty() {
            if !batch.is_empty() && !imported {
                imported = true;
                importer.import(ctx, output)?;
                writeln!(output, "done")?;
                output.flush()?;
            }
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "capabilities" => {
                writeln!(output, "*import")?;
                writeln!(output, "*option")?;
                writeln!(
                    output,
                    "*refspec refs/heads/*:refs/debian/{}/*",
                    ctx.remote
                )?;
                writeln!(output)?;
                output.flush()?;
            }
            "option" => {
                handle_option(ctx, rest, output)?;
            }
            "list" => {
                writeln!(output, "? refs/heads/{}", ctx.package)?;
                writeln!(output, "@refs/heads/{} HEAD", ctx.package)?;
                writeln!(output)?;
                output.flush()?;
            }
            "import" => {
                if !announced_done {
                    writeln!(output, "feature done")?;
                    output.flush()?;
                    announced_done = true;
                }

                let expected = format!("refs/heads/{}", ctx.package);
                if rest != expected {
                    warn!(ctx.logger, "ignoring import of unknown ref {:?}", rest);
                } else if !batch.contains(&expected) {
                    batch.push(expected);
                } else {
                    debug!(ctx.logger, "duplicate import of {:?} ignored", rest);
                }
            }
            other => {
                warn!(ctx.logger, "unknown remote-helper command {:?}", other);
            }
        }
    }

    Ok(())
}

/// Handle one `option <name> <value>` command.
fn handle_option(ctx: &mut RunContext, rest: &str, output: &mut impl Write) -> Result<()> {
    let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));

    match name {
        "depth" => {
            let depth = value
                .parse::<i64>()
                .map_err(|_| DebsnapError::InvalidDepth(value.to_string()))?;
            if depth <= 0 {
                writeln!(output, "error depth must be a positive integer")?;
                output.flush()?;
                return Err(DebsnapError::InvalidDepth(value.to_string()));
            }
            ctx.depth = Some(depth as usize);
            writeln!(output, "ok")?;
        }
        "verbosity" => {
            let verbosity = value.parse::<u64>().unwrap_or(1);
            ctx.set_verbosity(verbosity);
            writeln!(output, "ok")?;
        }
        _ => {
            writeln!(output, "unsupported")?;
        }
    }

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Cursor};

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn test_ctx(package: &str) -> (tempfile::TempDir, RunContext) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = ContentStore::open(dir.path().join("cache")).expect("store opens");
        // The dialogue itself never touches the network.
        let client = SnapshotClient::new(store).expect("client builds");

        let ctx = RunContext::new(
            logger(),
            package.to_string(),
            "origin".to_string(),
            client,
            Keyrings::from_rings(vec![]),
            HashSet::new(),
            HashMap::new(),
        )
        .expect("context builds");

        (dir, ctx)
    }

    struct RecordingImporter {
        runs: usize,
    }

    impl Importer for RecordingImporter {
        fn import(&mut self, _ctx: &mut RunContext, out: &mut dyn Write) -> Result<()> {
            self.runs += 1;
            writeln!(out, "progress fake import")?;
            Ok(())
        }
    }

    #[test]
    fn url_parsing() -> Result<()> {
        assert_eq!(parse_helper_url("deb::gzrt")?.package, "gzrt");
        assert_eq!(parse_helper_url("gzrt")?.package, "gzrt");
        assert_eq!(parse_helper_url("deb:gzrt")?.package, "gzrt");

        let parsed = parse_helper_url(
            "deb::gnupg?skip=1.4.6-2.1,1.2.5-3&trust=6908386EC98FE2A1&email=AABB00 me@example.org",
        )?;
        assert_eq!(parsed.package, "gnupg");
        assert!(parsed.skip.contains("1.4.6-2.1"));
        assert!(parsed.skip.contains("1.2.5-3"));
        assert_eq!(parsed.trust, vec!["6908386EC98FE2A1"]);
        assert_eq!(parsed.emails["AABB00"], "me@example.org");

        assert!(parse_helper_url("deb::gzrt?frobnicate=1").is_err());

        Ok(())
    }

    #[test]
    fn dialogue() -> Result<()> {
        let (_dir, mut ctx) = test_ctx("gzrt");
        let input = Cursor::new(
            "capabilities\n\
             option verbosity 2\n\
             option followtags true\n\
             list\n\
             import refs/heads/gzrt\n\
             import refs/heads/gzrt\n\
             \n",
        );
        let mut output = vec![];
        let mut importer = RecordingImporter { runs: 0 };

        run_helper(&mut ctx, input, &mut output, &mut importer)?;

        let output = String::from_utf8(output).expect("output is UTF-8");

        assert!(output.starts_with(
            "*import\n*option\n*refspec refs/heads/*:refs/debian/origin/*\n\n"
        ));
        assert!(output.contains("ok\nunsupported\n"));
        assert!(output.contains("? refs/heads/gzrt\n@refs/heads/gzrt HEAD\n\n"));
        assert!(output.contains("feature done\n"));
        assert!(output.ends_with("progress fake import\ndone\n"));

        // The duplicate import command ran the import once.
        assert_eq!(importer.runs, 1);

        Ok(())
    }

    #[test]
    fn depth_option() -> Result<()> {
        let (_dir, mut ctx) = test_ctx("gzrt");
        let mut output = vec![];

        handle_option(&mut ctx, "depth 7", &mut output)?;
        assert_eq!(ctx.depth, Some(7));
        assert_eq!(output, b"ok\n".to_vec());

        // Zero or negative depth aborts.
        let mut output = vec![];
        assert!(matches!(
            handle_option(&mut ctx, "depth 0", &mut output),
            Err(DebsnapError::InvalidDepth(_))
        ));
        assert!(String::from_utf8(output).unwrap().starts_with("error"));

        Ok(())
    }
}
