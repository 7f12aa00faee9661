use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;

use super::error::{ServiceError, ServiceResult};

pub const DEFAULT_LANGUAGE: &str = "Text";
pub const AUTODETECT: &str = "Autodetect";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub name: String,
    pub aliases: Vec<String>,
    /// Including the leading dot.
    pub extensions: Vec<String>,
    pub color: Option<String>,
}

impl Language {
    fn new(name: &str, aliases: &[&str], extensions: &[&str], color: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            color: color.map(str::to_string),
        }
    }

    fn matches_alias_or_extension(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
            || self
                .extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(name))
    }
}

/// Lookup and detection of pasty languages.
#[async_trait]
pub trait LanguageResolver: Send + Sync {
    /// Matches names, aliases and extensions case-insensitively. An exact name wins.
    fn find_by_name(&self, name: &str) -> Option<Language>;

    /// `None` when the content could not be classified.
    async fn autodetect(&self, content: &str) -> Option<Language>;
}

static BUILTIN: Lazy<Vec<Language>> = Lazy::new(|| {
    vec![
        Language::new(AUTODETECT, &["autodetect"], &[], None),
        Language::new(DEFAULT_LANGUAGE, &["fundamental", "plain text"], &[".txt"], None),
        Language::new("C", &[], &[".c", ".h"], Some("#555555")),
        Language::new("C#", &["csharp", "cake"], &[".cs", ".csx"], Some("#178600")),
        Language::new("C++", &["cpp"], &[".cpp", ".cc", ".cxx", ".hpp"], Some("#f34b7d")),
        Language::new("CSS", &[], &[".css"], Some("#563d7c")),
        Language::new("D", &["dlang"], &[".d", ".di"], Some("#ba595e")),
        Language::new("Dart", &[], &[".dart"], Some("#00B4AB")),
        Language::new("Go", &["golang"], &[".go"], Some("#00ADD8")),
        Language::new("Haskell", &[], &[".hs", ".hsc"], Some("#5e5086")),
        Language::new("HTML", &["xhtml"], &[".html", ".htm"], Some("#e34c26")),
        Language::new("Java", &[], &[".java"], Some("#b07219")),
        Language::new("JavaScript", &["js", "node"], &[".js", ".mjs", ".cjs"], Some("#f1e05a")),
        Language::new("JSON", &["geojson", "jsonl"], &[".json"], Some("#292929")),
        Language::new("Kotlin", &[], &[".kt", ".kts"], Some("#A97BFF")),
        Language::new("Markdown", &["md", "pandoc"], &[".md", ".markdown"], Some("#083fa1")),
        Language::new("Objective-C", &["obj-c", "objc", "objectivec"], &[".m"], Some("#438eff")),
        Language::new("Perl", &["cperl"], &[".pl", ".pm"], Some("#0298c3")),
        Language::new("PHP", &["inc"], &[".php"], Some("#4F5D95")),
        Language::new("PowerShell", &["posh", "pwsh"], &[".ps1", ".psm1"], Some("#012456")),
        Language::new("Python", &["python3", "rusthon"], &[".py", ".pyw"], Some("#3572A5")),
        Language::new("Ruby", &["jruby", "macruby", "rake", "rb"], &[".rb"], Some("#701516")),
        Language::new("Rust", &["rs"], &[".rs"], Some("#dea584")),
        Language::new("Scala", &[], &[".scala", ".sc"], Some("#c22d40")),
        Language::new("Shell", &["sh", "bash", "zsh"], &[".sh", ".bash", ".zsh"], Some("#89e051")),
        Language::new("Swift", &[], &[".swift"], Some("#F05138")),
        Language::new("TOML", &[], &[".toml"], Some("#9c4221")),
        Language::new("TypeScript", &["ts"], &[".ts", ".cts", ".mts"], Some("#3178c6")),
        Language::new("YAML", &["yml"], &[".yml", ".yaml"], Some("#cb171e")),
    ]
});

/// Static table of popular languages. It has no detector, so autodetection yields nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLanguages;

#[async_trait]
impl LanguageResolver for BuiltinLanguages {
    fn find_by_name(&self, name: &str) -> Option<Language> {
        let name = name.trim();
        let mut fallback = None;
        for language in BUILTIN.iter() {
            if language.name.eq_ignore_ascii_case(name) {
                return Some(language.clone());
            }
            if fallback.is_none() && language.matches_alias_or_extension(name) {
                fallback = Some(language);
            }
        }
        fallback.cloned()
    }

    async fn autodetect(&self, _content: &str) -> Option<Language> {
        None
    }
}

/// Canonical language name for a pasty: missing means plain text, `Autodetect` asks the resolver.
pub async fn resolve_language(
    resolver: &dyn LanguageResolver,
    declared: Option<&str>,
    content: &str,
) -> ServiceResult<String> {
    let declared = match declared.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_LANGUAGE.to_string()),
        Some(name) => name,
    };

    let language = resolver
        .find_by_name(declared)
        .ok_or_else(|| ServiceError::BadRequest(format!("Language {declared} not found.")))?;

    if language.name != AUTODETECT {
        return Ok(language.name);
    }

    match resolver.autodetect(content).await {
        Some(detected) if detected.name != AUTODETECT => Ok(detected.name),
        _ => {
            log::debug!("autodetection gave no answer, falling back to {DEFAULT_LANGUAGE}");
            Ok(DEFAULT_LANGUAGE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysRust;

    #[async_trait]
    impl LanguageResolver for AlwaysRust {
        fn find_by_name(&self, name: &str) -> Option<Language> {
            BuiltinLanguages.find_by_name(name)
        }

        async fn autodetect(&self, _content: &str) -> Option<Language> {
            BuiltinLanguages.find_by_name("rust")
        }
    }

    #[test]
    fn finds_by_name_alias_and_extension() {
        let langs = BuiltinLanguages;
        assert_eq!(langs.find_by_name("rust").unwrap().name, "Rust");
        assert_eq!(langs.find_by_name("rs").unwrap().name, "Rust");
        assert_eq!(langs.find_by_name("yml").unwrap().name, "YAML");
        assert_eq!(langs.find_by_name("cpp").unwrap().name, "C++");
        assert!(langs.find_by_name("brainfudge").is_none());
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(BuiltinLanguages.find_by_name("d").unwrap().name, "D");
        assert_eq!(BuiltinLanguages.find_by_name("JAVASCRIPT").unwrap().name, "JavaScript");
        assert_eq!(BuiltinLanguages.find_by_name("python3").unwrap().name, "Python");
    }

    #[tokio::test]
    async fn missing_language_defaults_to_text() {
        let name = resolve_language(&BuiltinLanguages, None, "Hello, World!")
            .await
            .unwrap();
        assert_eq!(name, DEFAULT_LANGUAGE);
        let name = resolve_language(&BuiltinLanguages, Some("  "), "x").await.unwrap();
        assert_eq!(name, DEFAULT_LANGUAGE);
    }

    #[tokio::test]
    async fn autodetect_delegates_to_resolver() {
        let name = resolve_language(&AlwaysRust, Some("autodetect"), "fn main() {}")
            .await
            .unwrap();
        assert_eq!(name, "Rust");

        let name = resolve_language(&BuiltinLanguages, Some("Autodetect"), "fn main() {}")
            .await
            .unwrap();
        assert_eq!(name, DEFAULT_LANGUAGE);
    }

    #[tokio::test]
    async fn unknown_language_is_bad_request() {
        let err = resolve_language(&BuiltinLanguages, Some("klingon"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }
}
