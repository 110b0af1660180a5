//! Layered client configuration
//!
//! A [`ComposedConfig`] is an immutable section -> option -> value map. It is
//! built from a [`ConfigTemplate`] bound to live backend identifiers, then
//! refined with overrides and removals. Each step returns a new value; nothing
//! is ever mutated after it has been handed out.
//!
//! The on-disk form is the INI dialect the updater reads:
//!
//! ```text
//! [client]
//! hawkbit_server = localhost:8080
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

/// Sections the updater refuses to start without
pub const REQUIRED_SECTIONS: [&str; 2] = ["client", "device"];

/// Placeholder names understood by the default client template
pub mod bindings {
    pub const HAWKBIT_SERVER: &str = "hawkbit_server";
    pub const TARGET_NAME: &str = "target_name";
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const BUNDLE_LOCATION: &str = "bundle_location";
}

/// One `(section, key, value)` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionOverride {
    pub section: String,
    pub key: String,
    pub value: String,
}

impl OptionOverride {
    pub fn new(section: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One `(section, key)` removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRemoval {
    pub section: String,
    pub key: String,
}

impl OptionRemoval {
    pub fn new(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
        }
    }
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposedConfig {
    sections: Sections,
}

impl ComposedConfig {
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Copy with every override applied.
    ///
    /// # Errors
    /// `SectionNotFound` if an override names a section that does not exist,
    /// `TemplateError` if its key or value could not survive a reparse.
    pub fn with_overrides<'a, I>(&self, overrides: I) -> HarnessResult<ComposedConfig>
    where
        I: IntoIterator<Item = &'a OptionOverride>,
    {
        let mut sections = self.sections.clone();
        for ov in overrides {
            check_option(&ov.section, &ov.key, &ov.value)?;
            let options = sections
                .get_mut(&ov.section)
                .ok_or_else(|| HarnessError::SectionNotFound {
                    section: ov.section.clone(),
                })?;
            options.insert(ov.key.clone(), ov.value.clone());
        }
        Ok(ComposedConfig { sections })
    }

    /// Copy with every listed option removed.
    ///
    /// # Errors
    /// `KeyNotFound` if an option is not present; removing something that was
    /// never there is a test authoring mistake.
    pub fn with_removals<'a, I>(&self, removals: I) -> HarnessResult<ComposedConfig>
    where
        I: IntoIterator<Item = &'a OptionRemoval>,
    {
        let mut sections = self.sections.clone();
        for rm in removals {
            let removed = sections
                .get_mut(&rm.section)
                .and_then(|options| options.remove(&rm.key));
            if removed.is_none() {
                return Err(HarnessError::KeyNotFound {
                    section: rm.section.clone(),
                    key: rm.key.clone(),
                });
            }
        }
        Ok(ComposedConfig { sections })
    }

    /// Serialize in the INI dialect, sections and keys in sorted order
    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        for (section, options) in &self.sections {
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in options {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Parse the INI dialect written by [`ComposedConfig::to_ini`].
    ///
    /// Accepts `key = value` and `key=value`, `#`/`;` comment lines and blank
    /// lines. Later duplicates of a key win.
    pub fn parse(text: &str) -> HarnessResult<ComposedConfig> {
        let mut sections = Sections::new();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| HarnessError::ConfigParse {
                    line: line_no,
                    message: format!("unterminated section header '{line}'"),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(HarnessError::ConfigParse {
                        line: line_no,
                        message: "empty section name".to_string(),
                    });
                }
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let section = current.as_ref().ok_or_else(|| HarnessError::ConfigParse {
                line: line_no,
                message: "option outside of any section".to_string(),
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| HarnessError::ConfigParse {
                line: line_no,
                message: format!("expected 'key = value', got '{line}'"),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(HarnessError::ConfigParse {
                    line: line_no,
                    message: "empty option name".to_string(),
                });
            }
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), value.trim().to_string());
        }

        Ok(ComposedConfig { sections })
    }

    /// Read and parse a persisted config
    pub async fn load(path: &Path) -> HarnessResult<ComposedConfig> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }
}

impl fmt::Display for ComposedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ini())
    }
}

/// Section/key skeleton whose values may contain `{placeholder}` tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplate {
    sections: Sections,
}

impl ConfigTemplate {
    pub fn new() -> Self {
        Self {
            sections: Sections::new(),
        }
    }

    /// Add (or replace) one option in the skeleton
    pub fn option(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// The updater's client configuration, matching a backend with target
    /// token authentication and a fixed fake device.
    pub fn client_default() -> Self {
        Self::new()
            .option("client", "hawkbit_server", "{hawkbit_server}")
            .option("client", "ssl", "false")
            .option("client", "ssl_verify", "false")
            .option("client", "tenant_id", "DEFAULT")
            .option("client", "target_name", "{target_name}")
            .option("client", "auth_token", "{auth_token}")
            .option("client", "bundle_download_location", "{bundle_location}")
            .option("client", "retry_wait", "60")
            .option("client", "connect_timeout", "20")
            .option("client", "timeout", "60")
            .option("client", "log_level", "debug")
            .option("device", "product", "Terminator")
            .option("device", "model", "T-1000")
            .option("device", "serialnumber", "8922673153")
            .option("device", "hw_revision", "2")
            .option("device", "mac_address", "ff:ff:ff:ff:ff:ff")
    }

    /// Substitute every placeholder.
    ///
    /// # Errors
    /// `TemplateError` if a required section is missing from the skeleton, a
    /// placeholder has no binding, or a name or bound value cannot be written
    /// as a single INI line.
    pub fn render(&self, bindings: &HashMap<String, String>) -> HarnessResult<ComposedConfig> {
        for required in REQUIRED_SECTIONS {
            if !self.sections.contains_key(required) {
                return Err(HarnessError::TemplateError {
                    detail: format!("required section [{required}] missing from template"),
                });
            }
        }

        let mut sections = Sections::new();
        for (section, options) in &self.sections {
            let rendered = sections.entry(section.clone()).or_default();
            for (key, value) in options {
                let value = substitute(value, bindings)?;
                check_option(section, key, &value)?;
                rendered.insert(key.clone(), value);
            }
        }
        Ok(ComposedConfig { sections })
    }
}

impl Default for ConfigTemplate {
    fn default() -> Self {
        Self::client_default()
    }
}

/// Names and values must reparse to themselves: one line each, no
/// surrounding whitespace, and no INI syntax in section or option names.
fn check_option(section: &str, key: &str, value: &str) -> HarnessResult<()> {
    let unsafe_name = |name: &str, reserved: &[char]| {
        name.is_empty() || name != name.trim() || name.contains(['\n', '\r']) || name.contains(reserved)
    };

    let detail = if unsafe_name(section, &['[', ']']) {
        format!("section name {section:?} cannot be written as a header")
    } else if unsafe_name(key, &['=', '[']) || key.starts_with(['#', ';']) {
        format!("option name {key:?} in [{section}] cannot be written as a key")
    } else if value.contains(['\n', '\r']) || value != value.trim() {
        format!("value of {section}.{key} must be a single trimmed line, got {value:?}")
    } else {
        return Ok(());
    };
    Err(HarnessError::TemplateError { detail })
}

/// Substitute `{name}` tokens; `{{` and `}}` escape literal braces
pub fn substitute(template: &str, bindings: &HashMap<String, String>) -> HarnessResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(HarnessError::TemplateError {
                        detail: format!("unterminated placeholder '{{{name}'"),
                    });
                }
                let value = bindings.get(&name).ok_or_else(|| HarnessError::TemplateError {
                    detail: format!("placeholder '{{{name}}}' has no binding"),
                })?;
                out.push_str(value);
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
