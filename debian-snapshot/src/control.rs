// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file primitives.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html> for
the canonical description of the format. Only the single-paragraph subset
needed for `.dsc` cleartexts is implemented here.
*/

use crate::error::{DebsnapError, Result};

/// A field in a control paragraph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, with continuation lines joined by `\n`.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Iterate over the value's lines with leading whitespace stripped.
    ///
    /// For multiline fields like `Files` the first line is typically
    /// empty and is skipped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value
            .lines()
            .map(|line| line.trim_start())
            .filter(|line| !line.is_empty())
    }
}

/// A single control paragraph: an ordered series of fields.
///
/// Field lookup is case insensitive; names are case preserving.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Parse the first paragraph from control file text.
    ///
    /// Input beyond the first empty line is ignored, which is what `.dsc`
    /// consumers want: a dsc consists of exactly one paragraph.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields: Vec<ControlField> = vec![];

        for line in text.lines() {
            if line.trim().is_empty() {
                if fields.is_empty() {
                    continue;
                }
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of the previous field.
                let field = fields.last_mut().ok_or_else(|| {
                    DebsnapError::ControlParse(format!(
                        "continuation line without a field: {:?}",
                        line
                    ))
                })?;
                field.value.push('\n');
                field.value.push_str(line.trim_start());
                continue;
            }

            let (name, value) = line.split_once(':').ok_or_else(|| {
                DebsnapError::ControlParse(format!("line is not a field: {:?}", line))
            })?;

            fields.push(ControlField {
                name: name.to_string(),
                value: value.trim_start().to_string(),
            });
        }

        if fields.is_empty() {
            return Err(DebsnapError::ControlParse(
                "no fields in control paragraph".to_string(),
            ));
        }

        Ok(Self { fields })
    }

    /// Obtain a field by name.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain a field's string value by name.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value())
    }

    /// Obtain a field's string value, erroring if the field is missing.
    pub fn required_field_str(&self, name: &'static str) -> Result<&str> {
        self.field_str(name)
            .ok_or(DebsnapError::ControlFieldMissing(name))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DSC_BODY: &str = "Format: 1.0\n\
        Source: gzrt\n\
        Version: 0.5-1\n\
        Maintainer: Someone <someone@debian.org>\n\
        Files:\n \
        0123456789abcdef0123456789abcdef 1234 gzrt_0.5.orig.tar.gz\n \
        fedcba9876543210fedcba9876543210 567 gzrt_0.5-1.diff.gz\n";

    #[test]
    fn parse_fields() -> Result<()> {
        let para = ControlParagraph::parse(DSC_BODY)?;

        assert_eq!(para.field_str("Source"), Some("gzrt"));
        // Case insensitive lookup.
        assert_eq!(para.field_str("source"), Some("gzrt"));
        assert_eq!(para.required_field_str("Version")?, "0.5-1");
        assert!(para.required_field_str("Binary").is_err());

        let files = para.field("Files").unwrap().iter_lines().collect::<Vec<_>>();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("gzrt_0.5.orig.tar.gz"));

        Ok(())
    }

    #[test]
    fn first_paragraph_only() -> Result<()> {
        let para = ControlParagraph::parse("A: 1\n\nB: 2\n")?;

        assert_eq!(para.field_str("A"), Some("1"));
        assert_eq!(para.field_str("B"), None);

        Ok(())
    }

    #[test]
    fn rejects_junk() {
        assert!(ControlParagraph::parse("").is_err());
        assert!(ControlParagraph::parse("not a field\n").is_err());
        assert!(ControlParagraph::parse(" leading continuation\n").is_err());
    }
}
