//! Localized string tables.
//!
//! Yarn writes one CSV per locale, with the locale only in the file name
//! (`Sally (de).csv`). Rows are grouped by node, then line key, then locale.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use yarn_data::LocalizedString;

use crate::config::TextPatterns;
use crate::sources::{SourceError, read_string_rows};

/// Locale to text.
pub type LocaleTexts = BTreeMap<String, String>;

/// Read localized string files. Files whose name carries no locale are skipped.
///
/// # Errors
/// Fails when a matching file cannot be read or parsed.
pub fn load_localized_strings(
    paths: &[PathBuf],
    patterns: &TextPatterns,
) -> Result<Vec<LocalizedString>, SourceError> {
    let mut strings = Vec::new();
    for path in paths {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(locale) = patterns.locale(file_name) else {
            warn!(
                "skipping localized string file '{}': no locale in its name",
                path.display()
            );
            continue;
        };
        let file = fs::File::open(path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let rows = read_string_rows(file, path)?;
        debug!("{} '{locale}' string(s) in '{}'", rows.len(), path.display());
        strings.extend(rows.into_iter().map(|row| LocalizedString {
            locale: locale.to_string(),
            key: row.id,
            text: row.text,
            file: row.file,
            node: row.node,
        }));
    }
    Ok(strings)
}

/// Localized text lookup: node, then line key, then locale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedStringTable {
    by_node: BTreeMap<String, BTreeMap<String, LocaleTexts>>,
    locales: BTreeSet<String>,
}

impl LocalizedStringTable {
    pub fn new(strings: impl IntoIterator<Item = LocalizedString>) -> Self {
        let mut table = Self::default();
        for s in strings {
            table.locales.insert(s.locale.clone());
            table
                .by_node
                .entry(s.node)
                .or_default()
                .entry(s.key)
                .or_default()
                .insert(s.locale, s.text);
        }
        if !table.locales.is_empty() {
            info!("localized text cached for {} locale(s)", table.locales.len());
        }
        table
    }

    /// Translations of one line, if any.
    pub fn texts(&self, node: &str, key: &str) -> Option<&LocaleTexts> {
        self.by_node.get(node).and_then(|keys| keys.get(key))
    }

    /// Every locale seen, sorted.
    pub fn locales(&self) -> Vec<String> {
        self.locales.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;
    use std::io::Write;

    fn localized(locale: &str, node: &str, key: &str, text: &str) -> LocalizedString {
        LocalizedString {
            locale: locale.into(),
            key: key.into(),
            text: text.into(),
            file: node.into(),
            node: node.into(),
        }
    }

    #[test]
    fn table_groups_by_node_key_and_locale() {
        let table = LocalizedStringTable::new([
            localized("fr", "Sally", "line:1", "Sally : Salut."),
            localized("de", "Sally", "line:1", "Sally: Hallo."),
            localized("de", "Shop", "line:9", "Laden"),
        ]);
        assert_eq!(table.locales(), vec!["de".to_string(), "fr".to_string()]);
        let texts = table.texts("Sally", "line:1").expect("texts");
        assert_eq!(texts.get("de").map(String::as_str), Some("Sally: Hallo."));
        assert_eq!(texts.len(), 2);
        assert!(table.texts("Shop", "line:1").is_none());
    }

    #[test]
    fn files_without_locale_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let good = dir.path().join("Sally (de).csv");
        let bad = dir.path().join("Sally.csv");
        for path in [&good, &bad] {
            let mut file = fs::File::create(path).expect("create");
            writeln!(file, "id,text,file,node,lineNumber\nline:1,Sally: Hallo.,Sally,Sally,3").expect("write");
        }
        let patterns = ConverterConfig::default().patterns().expect("patterns");
        let strings = load_localized_strings(&[good, bad], &patterns).expect("load");
        assert_eq!(strings, vec![localized("de", "Sally", "line:1", "Sally: Hallo.")]);
    }
}
