// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! debian/changelog reading.

See <https://www.debian.org/doc/debian-policy/ch-source.html#debian-changelog-debian-changelog>
for the format. The parser here is deliberately relaxed: it digests two
decades of hand-written changelogs, so it extracts only what history
reconstruction needs (the ordered version list and the newest entry's
author and date) and gives up quietly on trailing garbage.
*/

use {
    crate::error::{DebsnapError, Result},
    lazy_static::lazy_static,
    mailparse::dateparse,
    regex::Regex,
    slog::warn,
    std::{borrow::Cow, collections::HashSet},
};

lazy_static! {
    // Very relaxed; we are dealing with historical data.
    static ref VERSION_LINE: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9+.-]*\s+\(([^ ]+)\)").expect("static regex");
    static ref AUTHOR_LINE: Regex =
        Regex::new(r"^ --\s*([^<>]*<[^<>]+>)  (.*)$").expect("static regex");
}

/// The result of scanning a changelog.
#[derive(Clone, Debug)]
pub struct ParsedChangelog {
    /// The newest entry's author, as `Name <email>`.
    pub author: String,

    /// The newest entry's date as `(unix seconds, utc offset)`, when the
    /// trailer date could be parsed.
    pub when: Option<(i64, String)>,

    /// Every version declared, newest first, starting with the file's own
    /// version.
    pub versions: Vec<String>,
}

/// Decode changelog bytes.
///
/// Strict UTF-8 first; Windows-1252 recovers the historical Latin-ish
/// changelogs that predate the UTF-8 policy.
fn decode(data: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(data) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(data);
            text
        }
    }
}

/// Parse an entry trailer date like `Thu, 3 Jan 2008 12:00:00 +0100`.
fn parse_date(s: &str) -> Option<(i64, String)> {
    let s = s.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(s) {
        return Some((dt.timestamp(), dt.format("%z").to_string()));
    }

    // Lenient fallback; the offset is lost.
    dateparse(s).ok().map(|ts| (ts, "+0000".to_string()))
}

/// Scan a changelog for its declared version history.
///
/// Scanning stops at the legacy `Local variables:` / `Old Changelog:`
/// trailers, at the first line that is neither a version stanza header
/// nor part of one, and at the first non-top entry naming a version in
/// `skip` (so skipped versions never become predecessors). An error is
/// returned only when not even the top stanza parses.
pub fn parse_changelog(
    logger: &slog::Logger,
    data: &[u8],
    skip: &HashSet<String>,
) -> Result<ParsedChangelog> {
    let text = decode(data);

    let mut top_entry = true;
    let mut within = false;
    let mut author = None;
    let mut when = None;
    let mut versions = vec![];

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if !within {
            if line == "Local variables:" || line == "Old Changelog:" {
                break;
            }

            let version = match VERSION_LINE.captures(line) {
                Some(captures) => captures.get(1).expect("group 1 exists").as_str(),
                None => {
                    warn!(logger, "giving up on changelog line {:?}", line);
                    break;
                }
            };

            versions.push(version.to_string());
            if !top_entry && skip.contains(version) {
                break;
            }
            within = true;
        } else if let Some(captures) = AUTHOR_LINE.captures(line) {
            if top_entry {
                author = Some(captures.get(1).expect("group 1 exists").as_str().to_string());
                when = parse_date(captures.get(2).expect("group 2 exists").as_str());
            }
            top_entry = false;
            within = false;
        }
    }

    match author {
        Some(author) => Ok(ParsedChangelog {
            author,
            when,
            versions,
        }),
        // Not even one complete stanza.
        None => Err(DebsnapError::BrokenChangelog),
    }
}
