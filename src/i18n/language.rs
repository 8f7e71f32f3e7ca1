//! Language type: validated language code with script lookup.

use crate::i18n::LanguageRegistry;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated language code.
///
/// Any well-formed code is accepted; the registry is only consulted for
/// script information, so languages missing from it still work (and are
/// tokenized as whitespace-separated text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language {
    code: String,
}

impl Language {
    /// Create a Language from a language code string.
    ///
    /// # Returns
    /// * `Ok(Language)` if the code is non-empty and made of ASCII letters,
    ///   digits, `-` or `_`
    /// * `Err` otherwise
    pub fn from_code(code: &str) -> Result<Language> {
        let code = code.trim();
        if code.is_empty() {
            bail!("Language code cannot be empty");
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Invalid language code: '{}'", code);
        }

        Ok(Language {
            code: code.to_ascii_lowercase(),
        })
    }

    /// The normalized (lowercase) language code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// ISO 15924 script code of this language.
    pub fn script(&self) -> &'static str {
        LanguageRegistry::get().script_for(&self.code)
    }

    /// Whether this language is written in a logographic (CJK) script.
    pub fn is_logographic(&self) -> bool {
        LanguageRegistry::get().is_cjk(&self.code)
    }

    /// English name of the language, when known.
    pub fn name(&self) -> Option<&'static str> {
        LanguageRegistry::get()
            .get_by_code(&self.code)
            .map(|config| config.name)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl TryFrom<String> for Language {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Language::from_code(&value)
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.code
    }
}
