use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::profile::RoleProfile;
use crate::task::Task;

/// Strongest signal that tied a task to a profile, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    None,
    Pattern,
    Keyword,
    Archetype,
    ExactName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchScore {
    pub kind: MatchKind,
    /// Matched words or patterns within `kind`.
    pub strength: usize,
}

impl MatchScore {
    pub const NONE: Self = Self {
        kind: MatchKind::None,
        strength: 0,
    };

    pub fn is_match(&self) -> bool {
        self.kind != MatchKind::None
    }
}

/// Normalized view of a task's matching signals.
#[derive(Debug, Clone)]
pub struct TaskFeatures {
    role_hint: Option<String>,
    archetype: Option<String>,
    words: HashSet<String>,
    text: String,
}

impl TaskFeatures {
    pub fn from_task(task: &Task) -> Self {
        let text = task.match_text().to_lowercase();
        Self {
            role_hint: task.role_hint.as_deref().map(|r| r.trim().to_lowercase()),
            archetype: task.archetype.as_deref().map(|a| a.trim().to_lowercase()),
            words: words(&text).collect(),
            text,
        }
    }
}

/// A profile with its matching signals precompiled. Profiles are immutable
/// per `name@version`, so instances can be cached by key.
#[derive(Debug)]
pub struct CompiledProfile {
    profile: Arc<RoleProfile>,
    name: String,
    archetype: String,
    archetype_words: Vec<String>,
    keywords: Vec<Vec<String>>,
    patterns: Vec<Regex>,
}

impl CompiledProfile {
    pub fn new(profile: Arc<RoleProfile>) -> Self {
        let archetype = profile.archetype.trim().to_lowercase();
        let archetype_words = words(&archetype).collect();
        let keywords = profile
            .keywords
            .iter()
            .map(|k| words(&k.to_lowercase()).collect::<Vec<_>>())
            .filter(|k| !k.is_empty())
            .collect();
        let patterns = profile
            .match_patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(profile = %profile.key(), pattern = %p, error = %e, "skipping invalid match pattern");
                    None
                }
            })
            .collect();

        Self {
            name: profile.name.to_lowercase(),
            profile,
            archetype,
            archetype_words,
            keywords,
            patterns,
        }
    }

    pub fn profile(&self) -> &Arc<RoleProfile> {
        &self.profile
    }

    /// Pure and total: the same task and profile always give the same score.
    pub fn score(&self, task: &TaskFeatures) -> MatchScore {
        if task.role_hint.as_deref() == Some(self.name.as_str()) {
            return MatchScore {
                kind: MatchKind::ExactName,
                strength: 1,
            };
        }

        if !self.archetype.is_empty() {
            if task.archetype.as_deref() == Some(self.archetype.as_str()) {
                return MatchScore {
                    kind: MatchKind::Archetype,
                    strength: self.archetype_words.len().max(1),
                };
            }
            if !self.archetype_words.is_empty()
                && self.archetype_words.iter().all(|w| task.words.contains(w))
            {
                return MatchScore {
                    kind: MatchKind::Archetype,
                    strength: self.archetype_words.len(),
                };
            }
        }

        let keyword_hits = self
            .keywords
            .iter()
            .filter(|k| k.iter().all(|w| task.words.contains(w)))
            .count();
        if keyword_hits > 0 {
            return MatchScore {
                kind: MatchKind::Keyword,
                strength: keyword_hits,
            };
        }

        let pattern_hits = self
            .patterns
            .iter()
            .filter(|re| re.is_match(&task.text))
            .count();
        if pattern_hits > 0 {
            return MatchScore {
                kind: MatchKind::Pattern,
                strength: pattern_hits,
            };
        }

        MatchScore::NONE
    }
}

#[derive(Debug, Clone)]
pub struct RankedProfile {
    pub profile: Arc<RoleProfile>,
    pub score: MatchScore,
}

/// Deterministic order: score, then higher version, then name.
pub fn compare_ranked(a: &RankedProfile, b: &RankedProfile) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.profile.version.cmp(&a.profile.version))
        .then_with(|| a.profile.name.cmp(&b.profile.name))
}

/// Scores every candidate and keeps the matching ones, best first.
pub fn rank<'a, I>(task: &Task, candidates: I) -> Vec<RankedProfile>
where
    I: IntoIterator<Item = &'a CompiledProfile>,
{
    let features = TaskFeatures::from_task(task);
    let mut ranked: Vec<RankedProfile> = candidates
        .into_iter()
        .map(|c| RankedProfile {
            profile: c.profile().clone(),
            score: c.score(&features),
        })
        .filter(|r| r.score.is_match())
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(normalize_word)
}

// Folds simple plurals so "APIs" matches an "api" archetype.
fn normalize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ConfidenceThresholds;

    fn profile(name: &str, version: &str, archetype: &str) -> RoleProfile {
        RoleProfile {
            name: name.into(),
            version: version.parse().unwrap(),
            archetype: archetype.into(),
            instructions: "x".into(),
            tone_rules: vec![],
            constraints: vec!["c".into()],
            preferred_backends: vec![],
            tool_permissions: Default::default(),
            confidence_thresholds: ConfidenceThresholds::default(),
            base: None,
            keywords: vec![],
            match_patterns: vec![],
        }
    }

    fn compiled(p: RoleProfile) -> CompiledProfile {
        CompiledProfile::new(Arc::new(p))
    }

    fn names(ranked: &[RankedProfile]) -> Vec<String> {
        ranked
            .iter()
            .map(|r| format!("{}@{}", r.profile.name, r.profile.version))
            .collect()
    }

    #[test]
    fn test_archetype_word_match() {
        let api = compiled(profile("API_DESIGNER", "1.0.0", "api"));
        let generic = compiled(profile("GENERIC", "1.0.0", "generic"));
        let task = Task::with_id("t", "Design a REST API for user management");
        let ranked = rank(&task, [&api, &generic]);
        assert_eq!(names(&ranked), vec!["API_DESIGNER@1.0.0"]);
        assert_eq!(ranked[0].score.kind, MatchKind::Archetype);
    }

    #[test]
    fn test_kind_precedence() {
        let mut by_keyword = profile("KEYWORDS", "1.0.0", "other");
        by_keyword.keywords = vec!["rest".into(), "user management".into()];
        let mut by_pattern = profile("PATTERNS", "1.0.0", "other");
        by_pattern.match_patterns = vec![".*design.*".into(), ".*api.*".into(), ".*user.*".into()];
        let by_archetype = profile("ARCH", "1.0.0", "api");
        let hinted = profile("HINTED", "1.0.0", "nothing");

        let all = [
            compiled(by_keyword),
            compiled(by_pattern),
            compiled(by_archetype),
            compiled(hinted),
        ];
        let task = Task::with_id("t", "Design a REST API for user management").role_hint("hinted");
        let ranked = rank(&task, all.iter());
        let kinds: Vec<_> = ranked.iter().map(|r| r.score.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MatchKind::ExactName,
                MatchKind::Archetype,
                MatchKind::Keyword,
                MatchKind::Pattern
            ]
        );
        assert_eq!(ranked[2].score.strength, 2);
    }

    #[test]
    fn test_tie_breaks_version_then_name() {
        let candidates = [
            compiled(profile("B_API", "1.0.0", "api")),
            compiled(profile("A_API", "1.0.0", "api")),
            compiled(profile("C_API", "2.0.0", "api")),
        ];
        let task = Task::with_id("t", "build an api");
        assert_eq!(
            names(&rank(&task, candidates.iter())),
            vec!["C_API@2.0.0", "A_API@1.0.0", "B_API@1.0.0"]
        );
    }

    #[test]
    fn test_explicit_archetype_and_plural_folding() {
        let api = compiled(profile("API_DESIGNER", "1.0.0", "api"));
        let features = TaskFeatures::from_task(&Task::with_id("t", "Review these APIs"));
        assert_eq!(api.score(&features).kind, MatchKind::Archetype);

        let features = TaskFeatures::from_task(&Task::with_id("t", "unrelated").archetype("API"));
        assert_eq!(api.score(&features).kind, MatchKind::Archetype);
    }

    #[test]
    fn test_no_signal_is_none() {
        let generic = compiled(profile("GENERIC", "1.0.0", "generic"));
        let features = TaskFeatures::from_task(&Task::with_id("t", "paint the fence"));
        assert_eq!(generic.score(&features), MatchScore::NONE);
    }
}
