//! Language and script data.
//!
//! - `registry`: script of each known language and the CJK script group
//! - `language`: validated `Language` type used by translation sessions

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry, CJK_SCRIPTS, DEFAULT_SCRIPT};
