//! Resource type filter
//!
//! Patterns are globs matched against the resource type; a leading `!`
//! negates. The last matching pattern decides, so `*` followed by
//! `!google_storage*` ignores every type except storage ones.

use crate::resource::ResourceType;
use glob::{Pattern, PatternError};

pub trait Filter: Send + Sync {
    fn is_type_ignored(&self, resource_type: &ResourceType) -> bool;
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    rules: Vec<Rule>,
}

impl TypeFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() || raw.starts_with('#') {
                    return None;
                }
                let (negated, glob) = match raw.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, raw),
                };
                Some(Pattern::new(glob).map(|pattern| Rule { pattern, negated }))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Filter for TypeFilter {
    fn is_type_ignored(&self, resource_type: &ResourceType) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.pattern.matches(resource_type.as_str()))
            .is_some_and(|rule| !rule.negated)
    }
}
