//! Script registry: which writing system a language is written in.
//!
//! Token counting depends on the script of a language. Logographic scripts
//! are counted per codepoint, everything else per whitespace-separated word.
//! The table is read-only data initialized once on first access.

use std::sync::OnceLock;

/// Scripts counted one token per codepoint.
pub const CJK_SCRIPTS: &[&str] = &[
    "Bopo", "Hang", "Hani", "Hans", "Hant", "Hira", "Jpan", "Kana", "Kore", "Yiii",
];

/// Script used for language codes missing from the registry.
pub const DEFAULT_SCRIPT: &str = "Latn";

/// Script metadata for a single language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Language code (e.g., "en", "zh-hant")
    pub code: &'static str,

    /// English name of the language
    pub name: &'static str,

    /// ISO 15924 script code (e.g., "Latn", "Hans")
    pub script: &'static str,
}

impl LanguageConfig {
    /// Whether this language is written in a CJK script.
    pub fn is_cjk(&self) -> bool {
        CJK_SCRIPTS.contains(&self.script)
    }
}

/// Global script registry.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the global registry instance.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Get a language configuration by its exact code (case-insensitive).
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages
            .iter()
            .find(|lang| lang.code.eq_ignore_ascii_case(code))
    }

    /// Resolve the script of a language code.
    ///
    /// Unknown regional variants fall back to their base language
    /// ("ja-JP" → "ja"), and unknown languages to [`DEFAULT_SCRIPT`].
    pub fn script_for(&self, code: &str) -> &'static str {
        if let Some(config) = self.get_by_code(code) {
            return config.script;
        }

        code.split(['-', '_'])
            .next()
            .and_then(|base| self.get_by_code(base))
            .map(|config| config.script)
            .unwrap_or(DEFAULT_SCRIPT)
    }

    /// Whether text in this language is tokenized per codepoint.
    pub fn is_cjk(&self, code: &str) -> bool {
        CJK_SCRIPTS.contains(&self.script_for(code))
    }

    /// All registered languages.
    pub fn list_all(&self) -> Vec<&LanguageConfig> {
        self.languages.iter().collect()
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    let table: &[(&'static str, &'static str, &'static str)] = &[
        ("ar", "Arabic", "Arab"),
        ("bn", "Bangla", "Beng"),
        ("ca", "Catalan", "Latn"),
        ("de", "German", "Latn"),
        ("el", "Greek", "Grek"),
        ("en", "English", "Latn"),
        ("es", "Spanish", "Latn"),
        ("fa", "Persian", "Arab"),
        ("fr", "French", "Latn"),
        ("gan", "Gan", "Hani"),
        ("he", "Hebrew", "Hebr"),
        ("hi", "Hindi", "Deva"),
        ("id", "Indonesian", "Latn"),
        ("ii", "Sichuan Yi", "Yiii"),
        ("it", "Italian", "Latn"),
        ("ja", "Japanese", "Jpan"),
        ("ko", "Korean", "Kore"),
        ("ml", "Malayalam", "Mlym"),
        ("nl", "Dutch", "Latn"),
        ("pl", "Polish", "Latn"),
        ("pt", "Portuguese", "Latn"),
        ("ru", "Russian", "Cyrl"),
        ("sv", "Swedish", "Latn"),
        ("ta", "Tamil", "Taml"),
        ("th", "Thai", "Thai"),
        ("tr", "Turkish", "Latn"),
        ("uk", "Ukrainian", "Cyrl"),
        ("vi", "Vietnamese", "Latn"),
        ("wuu", "Wu", "Hans"),
        ("yue", "Cantonese", "Hant"),
        ("zh", "Chinese", "Hans"),
        ("zh-hans", "Simplified Chinese", "Hans"),
        ("zh-hant", "Traditional Chinese", "Hant"),
        ("zh-tw", "Chinese (Taiwan)", "Hant"),
    ];

    table
        .iter()
        .map(|&(code, name, script)| LanguageConfig { code, name, script })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_get_returns_singleton() {
        let registry1 = LanguageRegistry::get();
        let registry2 = LanguageRegistry::get();

        assert!(std::ptr::eq(registry1, registry2));
    }

    #[test]
    fn test_get_by_code_is_case_insensitive() {
        let registry = LanguageRegistry::get();
        let config = registry.get_by_code("ZH-Hant").expect("registered");
        assert_eq!(config.script, "Hant");
        assert!(config.is_cjk());
    }

    #[test]
    fn test_script_for_regional_variant_falls_back_to_base() {
        let registry = LanguageRegistry::get();
        assert_eq!(registry.script_for("ja-JP"), "Jpan");
        assert_eq!(registry.script_for("pt_BR"), "Latn");
    }

    #[test]
    fn test_script_for_unknown_language_is_latin() {
        let registry = LanguageRegistry::get();
        assert_eq!(registry.script_for("xx"), DEFAULT_SCRIPT);
        assert_eq!(registry.script_for(""), DEFAULT_SCRIPT);
    }

    #[test]
    fn test_is_cjk() {
        let registry = LanguageRegistry::get();
        assert!(registry.is_cjk("zh"));
        assert!(registry.is_cjk("ja"));
        assert!(registry.is_cjk("ko"));
        assert!(registry.is_cjk("yue"));
        assert!(!registry.is_cjk("en"));
        assert!(!registry.is_cjk("th"));
        assert!(!registry.is_cjk("ru"));
    }

    #[test]
    fn test_codes_are_unique() {
        let registry = LanguageRegistry::get();
        let all = registry.list_all();
        let mut codes: Vec<_> = all.iter().map(|lang| lang.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
