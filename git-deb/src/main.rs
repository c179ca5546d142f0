// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{App, AppSettings, SubCommand},
    debian_snapshot::{error::DebsnapError, keyring},
    slog::{o, Drain},
    thiserror::Error,
};

const ABOUT: &str = "\
Bring any Debian package into git.

Cloning uses the deb:: remote helper:

    git clone deb::<package>

The URL accepts query keys to shape a run:

    skip=<ver>,...     omit versions from the reconstructed history
    trust=<keyid>,...  accept signatures from keys in your gpg keyring
    email=<keyid> <addr>  supply an email for a key lacking one

Verifying historical uploads needs the Debian keyrings; fetch them once
with `git deb get-keyrings`.
";

const GET_KEYRINGS_ABOUT: &str = "\
Download the Debian keyrings used to verify uploads.

The keyrings are taken from the newest debian-keyring source package on
snapshot.debian.org and installed as individual files under
~/.local/share/public-keyrings/.
";

#[derive(Debug, Error)]
pub enum GitDebError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Debsnap(#[from] DebsnapError),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, GitDebError>;

fn get_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();

    slog::Logger::root(drain, o!())
}

fn run_cli() -> Result<()> {
    let app = App::new("git-deb")
        .setting(AppSettings::ArgRequiredElseHelp)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bring any Debian package into git")
        .long_about(ABOUT);

    let app = app.subcommand(
        SubCommand::with_name("get-keyrings")
            .about("Download the Debian keyrings used to verify uploads")
            .long_about(GET_KEYRINGS_ABOUT),
    );

    let matches = app.get_matches();

    match matches.subcommand() {
        ("get-keyrings", _) => {
            let logger = get_logger();
            keyring::install_keyrings(&logger)?;
            Ok(())
        }
        (command, _) => Err(GitDebError::InvalidSubCommand(command.to_string())),
    }
}

fn main() {
    std::process::exit(match run_cli() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    });
}
