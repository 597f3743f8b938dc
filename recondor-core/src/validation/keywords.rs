//! Keyword extraction over fetched response bodies. Rules are compiled once
//! per batch; string rules match case-insensitively unless the rule says
//! otherwise, regex rules are precompiled and fail campaign setup loudly
//! instead of silently matching nothing.

use recondor_model::{KeywordMatch, KeywordRule, KeywordRuleType, KeywordSet};
use regex::RegexBuilder;

use crate::{CoreError, Result};

/// Characters of surrounding text captured on each side of a hit.
const CONTEXT_WINDOW: usize = 48;

enum Matcher {
    Literal { needle: String, case_sensitive: bool },
    Pattern(regex::Regex),
}

struct CompiledRule {
    pattern: String,
    category: Option<String>,
    matcher: Matcher,
}

pub struct KeywordScanner {
    rules: Vec<CompiledRule>,
}

impl KeywordScanner {
    /// Compile every rule from the given sets plus ad-hoc keywords. Ad-hoc
    /// keywords behave as case-insensitive string rules without a category.
    pub fn new(sets: &[KeywordSet], ad_hoc: &[String]) -> Result<Self> {
        let mut rules = Vec::new();
        for set in sets {
            for rule in &set.rules {
                rules.push(Self::compile(rule)?);
            }
        }
        for keyword in ad_hoc {
            if keyword.is_empty() {
                continue;
            }
            rules.push(CompiledRule {
                pattern: keyword.clone(),
                category: None,
                matcher: Matcher::Literal {
                    needle: keyword.to_lowercase(),
                    case_sensitive: false,
                },
            });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn compile(rule: &KeywordRule) -> Result<CompiledRule> {
        let matcher = match rule.rule_type {
            KeywordRuleType::String => Matcher::Literal {
                needle: if rule.case_sensitive {
                    rule.pattern.clone()
                } else {
                    rule.pattern.to_lowercase()
                },
                case_sensitive: rule.case_sensitive,
            },
            KeywordRuleType::Regex => {
                let compiled = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(!rule.case_sensitive)
                    .size_limit(1 << 20)
                    .build()
                    .map_err(|e| {
                        CoreError::Validation(format!("invalid keyword regex {:?}: {e}", rule.pattern))
                    })?;
                Matcher::Pattern(compiled)
            }
        };
        Ok(CompiledRule {
            pattern: rule.pattern.clone(),
            category: rule.category.clone(),
            matcher,
        })
    }

    /// Scan a body and return one match per rule that hit, with a short
    /// excerpt around the first occurrence.
    pub fn scan(&self, body: &str) -> Vec<KeywordMatch> {
        let lowered = body.to_lowercase();
        self.rules
            .iter()
            .filter_map(|rule| {
                let range = match &rule.matcher {
                    Matcher::Literal {
                        needle,
                        case_sensitive,
                    } => {
                        let haystack = if *case_sensitive { body } else { &lowered };
                        haystack.find(needle).map(|at| (at, at + needle.len()))
                    }
                    Matcher::Pattern(re) => re.find(body).map(|m| (m.start(), m.end())),
                }?;
                Some(KeywordMatch {
                    pattern: rule.pattern.clone(),
                    category: rule.category.clone(),
                    context: excerpt(body, range.0, range.1),
                })
            })
            .collect()
    }
}

/// Excerpt around `[start, end)`, widened by the context window and snapped
/// to char boundaries.
fn excerpt(body: &str, start: usize, end: usize) -> String {
    // Offsets may come from a lowercased copy whose length can drift from the
    // original for non-ASCII text; clamp before slicing.
    let start = start.min(body.len());
    let end = end.clamp(start, body.len());
    let mut from = start.saturating_sub(CONTEXT_WINDOW);
    while from > 0 && !body.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_WINDOW).min(body.len());
    while to < body.len() && !body.is_char_boundary(to) {
        to += 1;
    }
    body[from..to].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recondor_model::KeywordSetId;

    fn set(rules: Vec<KeywordRule>) -> KeywordSet {
        KeywordSet {
            id: KeywordSetId::new(),
            name: "test".into(),
            rules,
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn string_rule(pattern: &str, case_sensitive: bool) -> KeywordRule {
        KeywordRule {
            rule_type: KeywordRuleType::String,
            pattern: pattern.into(),
            case_sensitive,
            category: Some("brand".into()),
        }
    }

    #[test]
    fn string_rules_ignore_case_by_default() {
        let scanner = KeywordScanner::new(&[set(vec![string_rule("Login", false)])], &[]).unwrap();
        let matches = scanner.scan("<h1>LOGIN PAGE</h1>");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern, "Login");
        assert_eq!(matches[0].category.as_deref(), Some("brand"));
    }

    #[test]
    fn case_sensitive_string_rules_require_exact_case() {
        let scanner = KeywordScanner::new(&[set(vec![string_rule("Login", true)])], &[]).unwrap();
        assert!(scanner.scan("login page").is_empty());
        assert_eq!(scanner.scan("Login page").len(), 1);
    }

    #[test]
    fn regex_rules_are_compiled_and_match() {
        let rule = KeywordRule {
            rule_type: KeywordRuleType::Regex,
            pattern: r"acct-\d{4}".into(),
            case_sensitive: false,
            category: None,
        };
        let scanner = KeywordScanner::new(&[set(vec![rule])], &[]).unwrap();
        let matches = scanner.scan("ref ACCT-1234 in footer");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context.contains("ACCT-1234"));
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile_time() {
        let rule = KeywordRule {
            rule_type: KeywordRuleType::Regex,
            pattern: "(unclosed".into(),
            case_sensitive: false,
            category: None,
        };
        assert!(KeywordScanner::new(&[set(vec![rule])], &[]).is_err());
    }

    #[test]
    fn ad_hoc_keywords_match_without_a_category() {
        let scanner = KeywordScanner::new(&[], &["checkout".into()]).unwrap();
        let matches = scanner.scan("fast CHECKOUT here");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].category.is_none());
    }

    #[test]
    fn context_excerpt_stays_on_char_boundaries() {
        let scanner = KeywordScanner::new(&[], &["shop".into()]).unwrap();
        let body = format!("{}shop{}", "é".repeat(60), "ü".repeat(60));
        let matches = scanner.scan(&body);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context.contains("shop"));
    }
}
