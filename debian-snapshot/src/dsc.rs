// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source package modeling.

A `.dsc` cleartext describes one revision of a source package: a Files
field enumerating component tarballs and patches, plus metadata. This
module parses that manifest, validates the component file names against
the layouts Debian permits, and classifies the package as native (one
tarball) or split (an upstream orig plus a Debian delta).
*/

use {
    crate::{
        control::ControlParagraph,
        error::{DebsnapError, Result},
        package_version::PackageVersion,
        signature::SigInfo,
        snapshot::FileInfo,
    },
    slog::warn,
    std::{collections::HashMap, path::PathBuf},
};

/// One `.dsc` file witnessing a version, with its verified signature.
///
/// A version usually has exactly one witness. Several can exist when the
/// same version was published through multiple archives; they share a
/// cleartext but produce distinct upload tags.
#[derive(Clone, Debug)]
pub struct DscWitness {
    pub finfo: FileInfo,
    pub sig: SigInfo,
}

/// The component layout of a source package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageLayout {
    /// A single tarball and no Debian delta.
    Native { tarball: String },

    /// An upstream orig tarball, optional additional component tarballs,
    /// and at least one Debian delta (diff or debian tarball).
    Split {
        orig: String,
        components: Vec<String>,
        deltas: Vec<String>,
    },
}

/// One record per distinct published version of the package.
#[derive(Clone, Debug)]
pub struct SourcePackage {
    /// The version string exactly as the archive lists it.
    pub version_str: String,

    /// The parsed version.
    pub version: PackageVersion,

    /// Every dsc witnessing this version, in upload precedence order.
    pub dscs: Vec<DscWitness>,

    /// Canonical dsc cleartext bytes shared by all witnesses.
    pub cleartext: Vec<u8>,

    /// Component layout derived from the Files field.
    pub layout: PackageLayout,

    /// Content hash of every component file, by name.
    pub hashes: HashMap<String, String>,

    /// Local path of the dsc inside the archive mirror, components
    /// alongside it, as the source extraction tool expects.
    pub dsc_path: PathBuf,
}

impl SourcePackage {
    pub fn new(
        logger: &slog::Logger,
        package: &str,
        version_str: &str,
        dscs: Vec<DscWitness>,
        cleartext: Vec<u8>,
        hashes: HashMap<String, String>,
        dsc_path: PathBuf,
    ) -> Result<Self> {
        let version = PackageVersion::parse(version_str)?;

        let text = String::from_utf8_lossy(&cleartext);
        let paragraph = ControlParagraph::parse(&text)?;
        let components = component_names(&paragraph)?;
        let layout = classify_components(logger, package, &version, &components)?;

        Ok(Self {
            version_str: version_str.to_string(),
            version,
            dscs,
            cleartext,
            layout,
            hashes,
            dsc_path,
        })
    }

    /// Whether this is a native package.
    pub fn is_native(&self) -> bool {
        matches!(self.layout, PackageLayout::Native { .. })
    }

    /// The upstream identity key: content hashes of `(orig, comp…)`.
    ///
    /// Versions sharing this key share one upstream import commit.
    /// Native packages have no upstream identity.
    pub fn orig_key(&self) -> Option<Vec<String>> {
        match &self.layout {
            PackageLayout::Native { .. } => None,
            PackageLayout::Split {
                orig, components, ..
            } => {
                let mut key = Vec::with_capacity(1 + components.len());
                key.push(self.hashes.get(orig)?.clone());
                for comp in components {
                    key.push(self.hashes.get(comp)?.clone());
                }
                Some(key)
            }
        }
    }
}

/// Extract component file names from a dsc paragraph's Files field.
///
/// Each line has the form `<md5> <size> <name>`.
pub fn component_names(paragraph: &ControlParagraph) -> Result<Vec<String>> {
    let files = paragraph
        .field("Files")
        .ok_or(DebsnapError::ControlFieldMissing("Files"))?;

    let names = files
        .iter_lines()
        .map(|line| {
            line.split_ascii_whitespace()
                .nth(2)
                .map(|name| name.to_string())
                .ok_or_else(|| DebsnapError::ControlParse(format!("bad Files line: {:?}", line)))
        })
        .collect::<Result<Vec<_>>>()?;

    if names.is_empty() {
        return Err(DebsnapError::NoComponents);
    }

    Ok(names)
}

/// Validate component names and derive the package layout.
///
/// The name discipline follows dpkg-source: a native tarball is
/// `<pkg>_<ver>.tar.<ext>`; a split package has exactly one
/// `<pkg>_<upstream>.orig.<ext>`, any number of
/// `<pkg>_<upstream>.orig-<sub>.<ext>` components, and at least one
/// `<pkg>_<ver>.(diff|debian).<ext>` delta, where `<ver>` is the version
/// without its epoch. A multi-file set with no orig match but a single
/// plain `<pkg>_<ver>.tar.<ext>` beside the deltas (ancient uploads like
/// atop 1.23) degrades to the native layout. Anything else is fatal.
pub fn classify_components(
    logger: &slog::Logger,
    package: &str,
    version: &PackageVersion,
    names: &[String],
) -> Result<PackageLayout> {
    for name in names {
        if name.contains('/') {
            return Err(DebsnapError::ComponentName(name.clone(), package.to_string()));
        }
    }

    let base = version.without_epoch();
    let upstream = version.upstream_version();

    if names.len() == 1 {
        let name = &names[0];
        let prefix = format!("{}_{}.tar.", package, base);
        if !name.starts_with(&prefix) || name.len() == prefix.len() {
            return Err(DebsnapError::ComponentName(name.clone(), package.to_string()));
        }
        if version.debian_revision().is_some() {
            warn!(
                logger,
                "native package {} {} has a debian revision; importing anyway", package, version
            );
        }
        return Ok(PackageLayout::Native {
            tarball: name.clone(),
        });
    }

    if version.debian_revision().is_none() {
        warn!(
            logger,
            "split package {} {} has no debian revision; importing anyway", package, version
        );
    }

    let orig_prefix = format!("{}_{}.orig.", package, upstream);
    let comp_prefix = format!("{}_{}.orig-", package, upstream);
    let diff_prefix = format!("{}_{}.diff.", package, base);
    let debian_prefix = format!("{}_{}.debian.", package, base);
    let tar_prefix = format!("{}_{}.tar.", package, base);

    let mut orig = None;
    let mut plain_tarball = None;
    let mut components = vec![];
    let mut deltas = vec![];

    for name in names {
        if name.starts_with(&orig_prefix) {
            if orig.replace(name.clone()).is_some() {
                return Err(DebsnapError::ComponentName(name.clone(), package.to_string()));
            }
        } else if name.starts_with(&comp_prefix) {
            components.push(name.clone());
        } else if name.starts_with(&diff_prefix) || name.starts_with(&debian_prefix) {
            deltas.push(name.clone());
        } else if name.starts_with(&tar_prefix) {
            if plain_tarball.replace(name.clone()).is_some() {
                return Err(DebsnapError::ComponentName(name.clone(), package.to_string()));
            }
        } else {
            return Err(DebsnapError::ComponentName(name.clone(), package.to_string()));
        }
    }

    match (orig, plain_tarball) {
        (Some(orig), None) if !deltas.is_empty() => Ok(PackageLayout::Split {
            orig,
            components,
            deltas,
        }),
        (Some(orig), None) => Err(DebsnapError::ComponentName(orig, package.to_string())),

        // Nothing matched the orig pattern, but a single plain tarball
        // sits beside the deltas. There is no upstream identity to split
        // on; the extraction tool decides how the delta applies.
        (None, Some(tarball)) if components.is_empty() && !deltas.is_empty() => {
            warn!(
                logger,
                "{} {} has no orig component; importing as native", package, version
            );
            Ok(PackageLayout::Native { tarball })
        }

        _ => Err(DebsnapError::ComponentName(
            names[0].clone(),
            package.to_string(),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn classify(package: &str, version: &str, names: &[&str]) -> Result<PackageLayout> {
        let version = PackageVersion::parse(version)?;
        let names = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        classify_components(&logger(), package, &version, &names)
    }

    #[test]
    fn native() -> Result<()> {
        assert_eq!(
            classify("atop", "1.23", &["atop_1.23.tar.gz"])?,
            PackageLayout::Native {
                tarball: "atop_1.23.tar.gz".to_string()
            }
        );

        // Native with a revision: flagged, not fatal.
        assert_eq!(
            classify("gzrt", "0.5-1", &["gzrt_0.5-1.tar.gz"])?,
            PackageLayout::Native {
                tarball: "gzrt_0.5-1.tar.gz".to_string()
            }
        );

        assert!(classify("atop", "1.23", &["other_1.23.tar.gz"]).is_err());
        Ok(())
    }

    #[test]
    fn split() -> Result<()> {
        assert_eq!(
            classify(
                "gnupg",
                "1.4.6-2.1",
                &["gnupg_1.4.6.orig.tar.gz", "gnupg_1.4.6-2.1.diff.gz"]
            )?,
            PackageLayout::Split {
                orig: "gnupg_1.4.6.orig.tar.gz".to_string(),
                components: vec![],
                deltas: vec!["gnupg_1.4.6-2.1.diff.gz".to_string()],
            }
        );

        // Epoch does not appear in file names.
        assert_eq!(
            classify(
                "sudo",
                "1:1.6.2p2-2.2",
                &["sudo_1.6.2p2.orig.tar.gz", "sudo_1.6.2p2-2.2.diff.gz"]
            )?,
            PackageLayout::Split {
                orig: "sudo_1.6.2p2.orig.tar.gz".to_string(),
                components: vec![],
                deltas: vec!["sudo_1.6.2p2-2.2.diff.gz".to_string()],
            }
        );

        // Additional orig components.
        assert_eq!(
            classify(
                "libfoo",
                "2.0-1",
                &[
                    "libfoo_2.0.orig.tar.xz",
                    "libfoo_2.0.orig-docs.tar.xz",
                    "libfoo_2.0-1.debian.tar.xz"
                ]
            )?,
            PackageLayout::Split {
                orig: "libfoo_2.0.orig.tar.xz".to_string(),
                components: vec!["libfoo_2.0.orig-docs.tar.xz".to_string()],
                deltas: vec!["libfoo_2.0-1.debian.tar.xz".to_string()],
            }
        );

        Ok(())
    }

    #[test]
    fn split_without_orig_degrades_to_native() -> Result<()> {
        // The atop_1.23 shape: no debian revision, a plain tarball and a
        // diff, nothing matching the orig pattern.
        assert_eq!(
            classify("atop", "1.23", &["atop_1.23.tar.gz", "atop_1.23.diff.gz"])?,
            PackageLayout::Native {
                tarball: "atop_1.23.tar.gz".to_string()
            }
        );

        // Two plain tarballs leave nothing to decide between.
        assert!(classify("atop", "1.23", &["atop_1.23.tar.gz", "atop_1.23.tar.bz2"]).is_err());

        // Orig-style components without an orig stay fatal; so does a
        // set with no delta.
        assert!(classify(
            "atop",
            "1.23",
            &["atop_1.23.tar.gz", "atop_1.23.orig-sub.tar.gz"]
        )
        .is_err());

        Ok(())
    }

    #[test]
    fn split_rejects_strays() {
        // Slash in a component name.
        assert!(classify("x", "1-1", &["../evil.tar.gz", "x_1-1.diff.gz"]).is_err());

        // Two origs.
        assert!(classify(
            "x",
            "1-1",
            &[
                "x_1.orig.tar.gz",
                "x_1.orig.tar.xz",
                "x_1-1.diff.gz"
            ]
        )
        .is_err());

        // Orig but no delta.
        assert!(classify("x", "1-1", &["x_1.orig.tar.gz", "x_1.orig-sub.tar.gz"]).is_err());

        // Name from a different upstream version.
        assert!(classify("x", "1-1", &["x_2.orig.tar.gz", "x_1-1.diff.gz"]).is_err());
    }

    #[test]
    fn orig_key_order() {
        let layout = PackageLayout::Split {
            orig: "x_1.orig.tar.gz".to_string(),
            components: vec!["x_1.orig-sub.tar.gz".to_string()],
            deltas: vec!["x_1-1.diff.gz".to_string()],
        };

        let mut hashes = HashMap::new();
        hashes.insert("x_1.orig.tar.gz".to_string(), "aa".to_string());
        hashes.insert("x_1.orig-sub.tar.gz".to_string(), "bb".to_string());
        hashes.insert("x_1-1.diff.gz".to_string(), "cc".to_string());

        let pkg = SourcePackage {
            version_str: "1-1".to_string(),
            version: PackageVersion::parse("1-1").unwrap(),
            dscs: vec![],
            cleartext: vec![],
            layout,
            hashes,
            dsc_path: PathBuf::new(),
        };

        assert_eq!(
            pkg.orig_key(),
            Some(vec!["aa".to_string(), "bb".to_string()])
        );
        assert!(!pkg.is_native());
    }
}
