use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::{ExpiresIn, Paste, Scope};

use super::error::{ServiceError, ServiceResult};
use super::stats::LanguageStat;

pub const MAX_TITLE_LEN: usize = 128;
pub const MAX_PASTY_TITLE_LEN: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PastyCreateInfo {
    pub title: String,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasteCreateInfo {
    pub title: String,
    pub pasties: Vec<PastyCreateInfo>,
    pub expires_in: ExpiresIn,
    pub anonymous: bool,
    pub private: bool,
    pub pinned: bool,
    pub encrypted: bool,
    pub tags: Vec<String>,
}

impl PasteCreateInfo {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_title(&self.title)?;
        if self.pasties.is_empty() {
            return Err(ServiceError::BadRequest(
                "A paste needs at least one pasty.".into(),
            ));
        }
        self.pasties
            .iter()
            .try_for_each(|p| validate_pasty_title(&p.title))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PastyEditInfo {
    /// Existing pasty id to keep; a fresh one is generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasteEditInfo {
    pub title: String,
    pub pasties: Vec<PastyEditInfo>,
}

impl PasteEditInfo {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_title(&self.title)?;
        if self.pasties.is_empty() {
            return Err(ServiceError::BadRequest(
                "A paste needs at least one pasty.".into(),
            ));
        }
        self.pasties
            .iter()
            .try_for_each(|p| validate_pasty_title(&p.title))
    }
}

fn validate_title(title: &str) -> ServiceResult<()> {
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::BadRequest(format!(
            "Paste title can be at most {MAX_TITLE_LEN} characters long."
        )));
    }
    Ok(())
}

fn validate_pasty_title(title: &str) -> ServiceResult<()> {
    if title.chars().count() > MAX_PASTY_TITLE_LEN {
        return Err(ServiceError::BadRequest(format!(
            "Pasty title can be at most {MAX_PASTY_TITLE_LEN} characters long."
        )));
    }
    Ok(())
}

/// Trims tags and drops empty and repeated ones, keeping first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Zero-based page index and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ServiceError::BadRequest(format!(
                "Page size must be between 1 and {MAX_PAGE_SIZE}."
            )));
        }
        Ok(())
    }

    pub fn skip(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub page_size: usize,
    pub has_next_page: bool,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_items: usize) -> Self {
        let total_pages = total_items.div_ceil(request.page_size.max(1));
        Self {
            items,
            current_page: request.page,
            page_size: request.page_size,
            has_next_page: request.page.saturating_add(1) < total_pages,
            total_pages,
        }
    }
}

/// Listing entry; language stats are absent for encrypted pastes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PasteWithLangStats {
    pub paste: Paste,
    pub language_stats: Option<Vec<LanguageStat>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedPastesQuery {
    pub tag: Option<String>,
    pub pinned_only: bool,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAccessTokenRequest {
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub expires_in: ExpiresIn,
    #[serde(default)]
    pub description: String,
}

/// Returned once on issue; the secret is never readable again.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAccessTokenResponse {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<Scope>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pasty(title: &str) -> PastyCreateInfo {
        PastyCreateInfo {
            title: title.into(),
            content: "x".into(),
            language: None,
        }
    }

    #[test]
    fn create_info_requires_a_pasty() {
        let info = PasteCreateInfo::default();
        assert!(matches!(info.validate(), Err(ServiceError::BadRequest(_))));
    }

    #[test]
    fn title_limits_count_characters() {
        let info = PasteCreateInfo {
            title: "é".repeat(MAX_TITLE_LEN),
            pasties: vec![pasty(&"a".repeat(MAX_PASTY_TITLE_LEN))],
            ..Default::default()
        };
        assert!(info.validate().is_ok());

        let info = PasteCreateInfo {
            pasties: vec![pasty(&"a".repeat(MAX_PASTY_TITLE_LEN + 1))],
            ..Default::default()
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn create_info_deserializes_with_defaults() {
        let info: PasteCreateInfo = serde_json::from_str(
            r#"{"pasties":[{"content":"Hello, World!"}],"expiresIn":"1d"}"#,
        )
        .unwrap();
        assert_eq!(info.expires_in, ExpiresIn::OneDay);
        assert_eq!(info.pasties[0].language, None);
        assert!(!info.private && !info.encrypted);
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        assert_eq!(
            normalize_tags([" rust ", "", "web", "rust", "   "]),
            vec!["rust".to_string(), "web".to_string()]
        );
    }

    #[test]
    fn page_math() {
        let page: Page<u8> = Page::new(vec![1, 2], PageRequest::new(0, 2), 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);

        let page: Page<u8> = Page::new(vec![5], PageRequest::new(2, 2), 5);
        assert!(!page.has_next_page);

        let page: Page<u8> = Page::new(Vec::new(), PageRequest::default(), 0);
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next_page);

        assert!(PageRequest::new(0, 31).validate().is_err());
        assert_eq!(PageRequest::new(3, 15).skip(), 45);
    }

    #[test]
    fn last_representable_page_is_empty_not_a_panic() {
        let request = PageRequest::new(usize::MAX, 15);
        assert!(request.validate().is_ok());
        assert_eq!(request.skip(), usize::MAX);

        let page: Page<u8> = Page::new(Vec::new(), request, 40);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next_page);
    }
}
