//! Converter settings and loader.
//!
//! Settings live in a small TOML file. Every field is optional; anything
//! missing takes its default. A file that cannot be read or parsed falls back
//! to the defaults entirely.

use anyhow::{Context, Result};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::ConvertError;

pub const DEFAULT_PLAYER_NAME: &str = "Player";
pub const DEFAULT_ACTOR_REGEX: &str = r"^(.+?):";
pub const DEFAULT_LINE_PREFIX_REGEX: &str = r"^.+?:\s*";
pub const DEFAULT_LOCALE_REGEX: &str = r".+\((.+)\)\.csv";

/// User-tunable conversion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Name of the player actor.
    pub player_name: String,
    /// Extracts the speaker from a line (first capture group). Empty means
    /// every line is spoken by the player.
    pub actor_regex: String,
    /// Prefix stripped from the start of every line. Empty keeps lines as written.
    pub line_prefix_regex: String,
    /// Extracts the locale from a localized string file name (first capture group).
    pub locale_regex: String,
    /// Replace the database's global user script instead of prepending to it.
    pub overwrite_global_script: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            player_name: DEFAULT_PLAYER_NAME.to_string(),
            actor_regex: DEFAULT_ACTOR_REGEX.to_string(),
            line_prefix_regex: DEFAULT_LINE_PREFIX_REGEX.to_string(),
            locale_regex: DEFAULT_LOCALE_REGEX.to_string(),
            overwrite_global_script: false,
        }
    }
}

impl ConverterConfig {
    /// Player actor name, falling back to the default when blank.
    pub fn player_name(&self) -> &str {
        match self.player_name.trim() {
            "" => DEFAULT_PLAYER_NAME,
            name => name,
        }
    }

    /// Compile the text patterns once for a conversion run.
    ///
    /// # Errors
    /// Returns [`ConvertError::InvalidPattern`] naming the offending field.
    pub fn patterns(&self) -> Result<TextPatterns, ConvertError> {
        Ok(TextPatterns {
            actor: compile("actor_regex", &self.actor_regex)?,
            line_prefix: compile("line_prefix_regex", &self.line_prefix_regex)?,
            locale: compile("locale_regex", &self.locale_regex)?,
        })
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<Option<Regex>, ConvertError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| ConvertError::InvalidPattern { field, source })
}

/// Compiled forms of the configured patterns. `None` marks a blank pattern.
#[derive(Debug, Clone)]
pub struct TextPatterns {
    pub actor: Option<Regex>,
    pub line_prefix: Option<Regex>,
    pub locale: Option<Regex>,
}

impl TextPatterns {
    /// Speaker named at the start of `text`; `None` when the actor pattern is
    /// blank or does not match.
    pub fn speaker<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.actor
            .as_ref()?
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty())
    }

    /// `text` with its speaker prefix removed.
    pub fn strip_prefix<'t>(&self, text: &'t str) -> &'t str {
        match self.line_prefix.as_ref().and_then(|re| re.find(text)) {
            Some(m) if m.start() == 0 => &text[m.end()..],
            _ => text,
        }
    }

    /// Locale named by a localized string file name.
    pub fn locale<'t>(&self, file_name: &'t str) -> Option<&'t str> {
        self.locale
            .as_ref()?
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Parse settings from TOML text.
///
/// # Errors
/// Returns an error when the text is not valid TOML for [`ConverterConfig`].
pub fn parse_config(text: &str) -> Result<ConverterConfig> {
    toml::from_str(text).context("parsing converter settings")
}

/// Loads settings from a TOML file, falling back to defaults on error.
///
/// # Logging
/// - `info!` on successful load
/// - `warn!` if the file cannot be read or parsed
pub fn load_config(toml_path: &Path) -> ConverterConfig {
    match try_load_config(toml_path) {
        Ok(config) => {
            info!("converter settings loaded from '{}'", toml_path.display());
            config
        },
        Err(e) => {
            warn!(
                "Could not load converter settings from '{}': {e:#}. Using defaults.",
                toml_path.display()
            );
            ConverterConfig::default()
        },
    }
}

fn try_load_config(toml_path: &Path) -> Result<ConverterConfig> {
    let text = fs::read_to_string(toml_path)
        .with_context(|| format!("reading converter settings from '{}'", toml_path.display()))?;
    parse_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = parse_config("player_name = \"Ada\"\n").expect("valid toml");
        assert_eq!(config.player_name, "Ada");
        assert_eq!(config.actor_regex, DEFAULT_ACTOR_REGEX);
        assert!(!config.overwrite_global_script);
    }

    #[test]
    fn blank_player_name_uses_default() {
        let config = ConverterConfig {
            player_name: "  ".into(),
            ..ConverterConfig::default()
        };
        assert_eq!(config.player_name(), "Player");
    }

    #[test]
    fn load_config_falls_back_on_bad_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "player_name = [").expect("write");
        assert_eq!(load_config(file.path()), ConverterConfig::default());
        assert_eq!(
            load_config(Path::new("definitely/not/here.toml")),
            ConverterConfig::default()
        );
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "actor_regex = \"\"\noverwrite_global_script = true").expect("write");
        let config = load_config(file.path());
        assert!(config.actor_regex.is_empty());
        assert!(config.overwrite_global_script);
    }

    #[test]
    fn default_patterns_split_speaker_and_text() {
        let patterns = ConverterConfig::default().patterns().expect("patterns");
        assert_eq!(patterns.speaker("Sally: Oh! Hi."), Some("Sally"));
        assert_eq!(patterns.speaker("No speaker here"), None);
        assert_eq!(patterns.strip_prefix("Sally: Oh! Hi."), "Oh! Hi.");
        assert_eq!(patterns.strip_prefix("No speaker here"), "No speaker here");
        assert_eq!(patterns.locale("Sally (de).csv"), Some("de"));
        assert_eq!(patterns.locale("Sally.csv"), None);
    }

    #[test]
    fn blank_actor_pattern_means_player() {
        let config = ConverterConfig {
            actor_regex: String::new(),
            line_prefix_regex: String::new(),
            ..ConverterConfig::default()
        };
        let patterns = config.patterns().expect("patterns");
        assert_eq!(patterns.speaker("Sally: Oh! Hi."), None);
        assert_eq!(patterns.strip_prefix("Sally: Oh! Hi."), "Sally: Oh! Hi.");
    }

    #[test]
    fn invalid_pattern_names_its_field() {
        let config = ConverterConfig {
            locale_regex: "(".into(),
            ..ConverterConfig::default()
        };
        let err = config.patterns().expect_err("invalid");
        assert!(matches!(err, ConvertError::InvalidPattern { field: "locale_regex", .. }));
    }
}
