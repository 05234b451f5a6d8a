//! Placement-path templates.
//!
//! Store directory layouts may contain `{field}` placeholders expanded
//! per artifact. Only the whitelisted fields below are substitutable;
//! anything else is a configuration error.

use repoctl_common::error::{RepoctlError, Result};

/// The whitelisted substitution fields.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields {
    pub name: String,
    pub version: String,
    pub major_version: String,
    pub distro: String,
    pub arch: String,
}

impl TemplateFields {
    fn lookup(&self, field: &str) -> Option<&str> {
        match field {
            "name" => Some(&self.name),
            "version" => Some(&self.version),
            "major_version" => Some(&self.major_version),
            "distro" => Some(&self.distro),
            "arch" => Some(&self.arch),
            _ => None,
        }
    }
}

/// Expand `{field}` placeholders in `template` from `fields`.
pub fn expand(template: &str, fields: &TemplateFields) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            RepoctlError::Template(format!("unclosed placeholder in '{template}'"))
        })?;
        let field = &after[..close];
        match fields.lookup(field) {
            Some(value) => out.push_str(value),
            None => {
                return Err(RepoctlError::Template(format!(
                    "unknown placeholder '{{{field}}}' in '{template}'"
                )))
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> TemplateFields {
        TemplateFields {
            name: "vdsm".to_string(),
            version: "4.2.1".to_string(),
            major_version: "4".to_string(),
            distro: "el8".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    #[test]
    fn plain_templates_pass_through() {
        assert_eq!(expand("rpm", &fields()).unwrap(), "rpm");
    }

    #[test]
    fn whitelisted_fields_expand() {
        assert_eq!(
            expand("rpm/{major_version}/{distro}", &fields()).unwrap(),
            "rpm/4/el8"
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(expand("rpm/{secret}", &fields()).is_err());
    }

    #[test]
    fn unclosed_placeholder_is_rejected() {
        assert!(expand("rpm/{major_version", &fields()).is_err());
    }
}
