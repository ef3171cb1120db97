use std::collections::BTreeMap;

use globset::{Glob, GlobMatcher};

use mirror_core::refs::{qualify_branch, short_name, validate_ref_name, HEADS_PREFIX};
use mirror_core::RefKind;

use crate::config::ConfigError;

const GLOB_META: &[char] = &['*', '?', '[', '{', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    /// Mirror matching refs.
    Include,
    /// Never touch matching refs on either side.
    Exclude,
    /// Mirror, and delete at the destination once gone at the source.
    Prune,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    effect: RuleEffect,
    matcher: GlobMatcher,
    /// Pattern starts with `refs/` and matches full names.
    full_name: bool,
    literal_prefix: usize,
    order: usize,
}

impl Rule {
    fn compile(pattern: &str, effect: RuleEffect, order: usize) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::Invalid("empty ref pattern".into()));
        }
        let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            effect,
            matcher: glob.compile_matcher(),
            full_name: pattern.starts_with("refs/"),
            literal_prefix: pattern.find(GLOB_META).unwrap_or(pattern.len()),
            order,
        })
    }

    fn matches(&self, full_name: &str) -> bool {
        if self.full_name {
            self.matcher.is_match(full_name)
        } else if full_name.starts_with(HEADS_PREFIX) {
            self.matcher.is_match(short_name(full_name))
        } else {
            false
        }
    }

    fn specificity(&self) -> (usize, usize, usize) {
        (self.literal_prefix, self.pattern.len(), self.order)
    }
}

/// Which refs a job mirrors, prunes or leaves alone, and under which
/// destination names.
#[derive(Debug, Clone)]
pub struct RefPolicy {
    rules: Vec<Rule>,
    renames: BTreeMap<String, String>,
    reverse: BTreeMap<String, String>,
}

impl RefPolicy {
    /// `refs` entries prefixed with `!` exclude; `prune` entries mirror and
    /// prune. Rename keys and values may be branch shorthands.
    pub fn new(
        refs: &[String],
        prune: &[String],
        renames: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(refs.len() + prune.len());
        for pattern in refs {
            let (pattern, effect) = match pattern.strip_prefix('!') {
                Some(rest) => (rest, RuleEffect::Exclude),
                None => (pattern.as_str(), RuleEffect::Include),
            };
            rules.push(Rule::compile(pattern, effect, rules.len())?);
        }
        for pattern in prune {
            rules.push(Rule::compile(pattern, RuleEffect::Prune, rules.len())?);
        }

        let mut forward = BTreeMap::new();
        let mut reverse = BTreeMap::new();
        for (from, to) in renames {
            let (from, to) = (qualify_branch(from), qualify_branch(to));
            for name in [&from, &to] {
                validate_ref_name(name)
                    .map_err(|e| ConfigError::Invalid(format!("rename: {e}")))?;
            }
            let (Some(from_kind), Some(to_kind)) = (RefKind::of(&from), RefKind::of(&to)) else {
                return Err(ConfigError::Invalid(format!(
                    "rename {from} -> {to}: only branches and tags can be renamed"
                )));
            };
            if from_kind != to_kind {
                return Err(ConfigError::Invalid(format!(
                    "rename {from} -> {to} changes the ref kind"
                )));
            }
            if reverse.insert(to.clone(), from.clone()).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "more than one ref renamed to {to}"
                )));
            }
            forward.insert(from, to);
        }

        Ok(Self {
            rules,
            renames: forward,
            reverse,
        })
    }

    /// Effect of the most specific matching rule, if any rule matches.
    pub fn effect(&self, full_name: &str) -> Option<RuleEffect> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(full_name))
            .max_by_key(|rule| rule.specificity())
            .map(|rule| rule.effect)
    }

    /// Whether a source ref is mirrored.
    pub fn selects(&self, source_name: &str) -> bool {
        matches!(
            self.effect(source_name),
            Some(RuleEffect::Include | RuleEffect::Prune)
        )
    }

    pub fn destination_name(&self, source_name: &str) -> String {
        self.renames
            .get(source_name)
            .cloned()
            .unwrap_or_else(|| source_name.to_string())
    }

    /// Source-side name a destination ref mirrors.
    pub fn source_name(&self, destination_name: &str) -> String {
        self.reverse
            .get(destination_name)
            .cloned()
            .unwrap_or_else(|| destination_name.to_string())
    }

    fn renamed_away(&self, destination_name: &str) -> bool {
        self.renames.contains_key(destination_name) && !self.reverse.contains_key(destination_name)
    }

    /// Whether a destination ref falls under this job's control.
    pub fn governs_destination(&self, destination_name: &str) -> bool {
        !self.renamed_away(destination_name) && self.selects(&self.source_name(destination_name))
    }

    /// Whether a destination ref may be deleted once its source is gone.
    pub fn prunes_destination(&self, destination_name: &str) -> bool {
        !self.renamed_away(destination_name)
            && self.effect(&self.source_name(destination_name)) == Some(RuleEffect::Prune)
    }
}
