use std::collections::BTreeMap;

use serde::Serialize;

use crate::Pasty;

use super::languages::{Language, LanguageResolver};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub lines: usize,
    pub words: usize,
    pub bytes: usize,
}

impl Stats {
    pub fn of(content: &str) -> Self {
        Self {
            lines: content.matches('\n').count() + 1,
            words: content
                .split([' ', '\r', '\n'])
                .filter(|w| !w.is_empty())
                .count(),
            bytes: content.len(),
        }
    }
}

/// Totals across the paste plus a breakdown keyed by pasty id.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PasteStats {
    pub lines: usize,
    pub words: usize,
    pub bytes: usize,
    pub pasties: BTreeMap<String, Stats>,
}

pub fn paste_stats(pasties: &[Pasty]) -> PasteStats {
    let mut stats = PasteStats::default();
    for pasty in pasties {
        let s = Stats::of(&pasty.content);
        stats.lines += s.lines;
        stats.words += s.words;
        stats.bytes += s.bytes;
        stats.pasties.insert(pasty.id.clone(), s);
    }
    stats
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LanguageStat {
    pub language: Language,
    pub percentage: f32,
}

/// Share of characters per language, largest first.
pub fn language_stats(pasties: &[Pasty], resolver: &dyn LanguageResolver) -> Vec<LanguageStat> {
    let mut chars_per_language: Vec<(&str, usize)> = Vec::new();
    let mut total = 0usize;

    for pasty in pasties {
        let chars = pasty.content.chars().count();
        total += chars;
        match chars_per_language
            .iter_mut()
            .find(|(name, _)| *name == pasty.language)
        {
            Some((_, count)) => *count += chars,
            None => chars_per_language.push((pasty.language.as_str(), chars)),
        }
    }

    if total == 0 {
        return Vec::new();
    }

    let mut stats: Vec<LanguageStat> = chars_per_language
        .into_iter()
        .filter(|(_, chars)| *chars > 0)
        .map(|(name, chars)| LanguageStat {
            language: resolver.find_by_name(name).unwrap_or_else(|| Language {
                name: name.to_string(),
                aliases: Vec::new(),
                extensions: Vec::new(),
                color: None,
            }),
            percentage: chars as f32 / total as f32 * 100.0,
        })
        .collect();

    stats.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
    stats
}
