// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `deb::` remote helper. git invokes this as
//! `git-remote-deb <remote> <url>` and speaks the remote-helper
//! dialogue on stdio; everything else lives in the library.

use {
    debian_snapshot::{
        error::DebsnapError,
        remote::{self, GitImporter},
    },
    slog::{o, Drain},
    thiserror::Error,
};

#[derive(Debug, Error)]
enum HelperError {
    #[error("usage: git-remote-deb <remote> <url>")]
    Usage,

    #[error("{0}")]
    Debsnap(#[from] DebsnapError),
}

fn get_logger() -> slog::Logger {
    // stdout carries the protocol stream; diagnostics go to stderr.
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();

    slog::Logger::root(drain, o!())
}

fn run_helper() -> Result<(), HelperError> {
    let args = std::env::args().collect::<Vec<_>>();
    let (remote, url) = match args.as_slice() {
        [_, remote, url] => (remote.as_str(), url.as_str()),
        [_, url] => (url.as_str(), url.as_str()),
        _ => return Err(HelperError::Usage),
    };

    let logger = get_logger();
    let parsed = remote::parse_helper_url(url)?;
    let mut ctx = remote::context_from_url(logger, remote, parsed)?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut output = stdout.lock();

    remote::run_helper(&mut ctx, stdin.lock(), &mut output, &mut GitImporter)?;

    Ok(())
}

fn main() {
    std::process::exit(match run_helper() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    });
}
