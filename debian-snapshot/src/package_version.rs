// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling.

Versions have the format `[epoch:]upstream_version[-debian_revision]` and
an ordering defined by
<https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.

History reconstruction never orders versions by this comparison; changelog
declarations drive history. The comparison exists for display purposes.
The type also derives the quoted form used for git tag names, where `:`
and `~` (both illegal in refnames) are substituted.
*/

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A Debian package version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // The epoch is everything before the first colon; the debian
        // revision everything after the last hyphen.
        let (epoch, rest) = match s.find(':') {
            Some(pos) => (Some(&s[..pos]), &s[pos + 1..]),
            None => (None, s),
        };

        let (upstream, revision) = match rest.rfind('-') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };

        let epoch = match epoch {
            Some(e) if e.chars().all(|c| c.is_ascii_digit()) => Some(u32::from_str(e)?),
            Some(_) => return Err(VersionError::EpochNonNumeric(s.to_string())),
            None => None,
        };

        // Hyphens in the upstream component are only legal when a debian
        // revision terminates the string.
        if !upstream.chars().all(|c| match c {
            c if c.is_ascii_alphanumeric() => true,
            '.' | '+' | '~' => true,
            '-' => revision.is_some(),
            _ => false,
        }) {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = match revision {
            Some(r) => {
                if !r
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '~'))
                {
                    return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
                }
                Some(r.to_string())
            }
            None => None,
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component, if explicitly present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The `upstream_version` component.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// The `debian_revision` component, if present.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }

    /// The version with the epoch stripped: `upstream[-revision]`.
    ///
    /// Source package component file names are built from this form.
    pub fn without_epoch(&self) -> String {
        match &self.debian_revision {
            Some(r) => format!("{}-{}", self.upstream_version, r),
            None => self.upstream_version.clone(),
        }
    }

    /// The tag-safe quoted form of this version.
    ///
    /// git refnames cannot contain `:` or `~`, so `1:2~rc1-1` becomes
    /// `1%2_rc1-1`. Debian versions never contain `%` or `_`, which makes
    /// the substitution reversible; see [unquote_tag].
    pub fn quoted(&self) -> String {
        quote_tag(&self.to_string())
    }
}

/// Quote a version string for use in a git tag name.
pub fn quote_tag(version: &str) -> String {
    version.replace(':', "%").replace('~', "_")
}

/// Recover a version string from its tag-quoted form.
pub fn unquote_tag(tag: &str) -> String {
    tag.replace('%', ":").replace('_', "~")
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        f.write_str(&self.upstream_version)?;
        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

/// Ordering of individual characters within a version component.
///
/// Tilde sorts before everything, including end of string; letters sort
/// before non-letters; otherwise ASCII order applies.
fn order_char(c: char) -> u32 {
    match c {
        '~' => 0,
        c if c.is_ascii_alphabetic() => 1 + c as u32,
        c => 256 + c as u32,
    }
}

/// Compare the leading non-digit spans of two component remainders.
fn compare_nondigits(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        match (a_chars.next(), b_chars.next()) {
            (None, None) => return Ordering::Equal,
            // A tilde sorts before the end of the part.
            (Some('~'), None) => return Ordering::Less,
            (None, Some('~')) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => match order_char(x).cmp(&order_char(y)) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Split `s` into its leading span matched by `pred` and the rest.
fn split_span(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    let pos = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    s.split_at(pos)
}

/// Compare one version component (upstream version or debian revision).
///
/// Alternates between a lexical comparison of non-digit spans and a
/// numeric comparison of digit spans until a difference is found or both
/// strings are exhausted. An absent digit span counts as zero.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;

    loop {
        let (a_alpha, a_rest) = split_span(a, |c| !c.is_ascii_digit());
        let (b_alpha, b_rest) = split_span(b, |c| !c.is_ascii_digit());

        match compare_nondigits(a_alpha, b_alpha) {
            Ordering::Equal => {}
            other => return other,
        }

        let (a_digits, a_rest) = split_span(a_rest, |c| c.is_ascii_digit());
        let (b_digits, b_rest) = split_span(b_rest, |c| c.is_ascii_digit());

        let a_num = u64::from_str(a_digits).unwrap_or(0);
        let b_num = u64::from_str(b_digits).unwrap_or(0);

        match a_num.cmp(&b_num) {
            Ordering::Equal => {}
            other => return other,
        }

        if a_rest.is_empty() && b_rest.is_empty() {
            return Ordering::Equal;
        }

        a = a_rest;
        b = b_rest;
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epoch compares numerically, with absence meaning 0. Then the
        // upstream versions, then the debian revisions, where an absent
        // revision is equivalent to "0".
        self.epoch
            .unwrap_or(0)
            .cmp(&other.epoch.unwrap_or(0))
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:4.7.0+dfsg1-2")?,
            PackageVersion {
                epoch: Some(1),
                upstream_version: "4.7.0+dfsg1".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("0.97-16.1~bpo.1")?,
            PackageVersion {
                epoch: None,
                upstream_version: "0.97".into(),
                debian_revision: Some("16.1~bpo.1".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("3.3.2.final~github")?,
            PackageVersion {
                epoch: None,
                upstream_version: "3.3.2.final~github".into(),
                debian_revision: None,
            }
        );

        assert!(PackageVersion::parse("a:1.0").is_err());
        assert!(PackageVersion::parse("1.0 beta").is_err());

        Ok(())
    }

    #[test]
    fn format_roundtrip() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            assert_eq!(PackageVersion::parse(s)?.to_string(), s);
        }

        Ok(())
    }

    #[test]
    fn without_epoch() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:1.4.6-2.1")?.without_epoch(),
            "1.4.6-2.1"
        );
        assert_eq!(PackageVersion::parse("1.23")?.without_epoch(), "1.23");

        Ok(())
    }

    #[test]
    fn ordering() -> Result<()> {
        let cmp = |a: &str, b: &str| {
            PackageVersion::parse(a)
                .unwrap()
                .cmp(&PackageVersion::parse(b).unwrap())
        };

        // 1.0~beta1~svn1245 < 1.0~beta1 < 1.0
        assert_eq!(cmp("1.0~beta1~svn1245", "1.0~beta1"), Ordering::Less);
        assert_eq!(cmp("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1:0.1", "2.0"), Ordering::Greater);
        assert_eq!(cmp("1.6.2p2-2.2", "1.6.2p2-2"), Ordering::Greater);
        assert_eq!(cmp("0.97-16.1~bpo.1", "0.97-16.1"), Ordering::Less);
        assert_eq!(cmp("2.4a", "2.4+"), Ordering::Less);
        assert_eq!(cmp("1.2", "1.2"), Ordering::Equal);

        Ok(())
    }

    #[test]
    fn tag_quoting() {
        assert_eq!(quote_tag("1:2~rc1-1"), "1%2_rc1-1");
        assert_eq!(unquote_tag("1%2_rc1-1"), "1:2~rc1-1");

        // Round-trip over every character class Debian permits.
        for s in [
            "0.97-16.1~bpo.1",
            "1:1.4.6-2.1",
            "2.3.4+dfsg1-0.1",
            "1.0~~~weird",
        ] {
            assert_eq!(unquote_tag(&quote_tag(s)), s);
        }
    }
}
