//! Hierarchical tag collection.
//!
//! Tags are `|`-separated paths such as `people|family|kids`. Toggling keeps
//! ancestors present while any descendant is present and prunes ancestors
//! that only existed as scaffolding once their last descendant goes.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::Error;

pub const HIERARCHY_DELIMITER: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Force {
    /// Remove present tags, add absent ones
    #[default]
    Toggle,
    In,
    Out,
}

impl FromStr for Force {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle" => Ok(Force::Toggle),
            "in" => Ok(Force::In),
            "out" => Ok(Force::Out),
            other => Err(Error::Validation(format!("unknown force mode \"{}\"", other))),
        }
    }
}

/// Expands an abbreviation into its tag group.
pub trait TagsetResolver {
    fn resolve(&self, abbreviation: &str) -> Option<&[String]>;
}

/// Tags actually added and removed by one toggle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TagChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn extend_unique(target: &mut Vec<String>, tags: Vec<String>) {
        for tag in tags {
            if !target.contains(&tag) {
                target.push(tag);
            }
        }
    }
}

/// Prefix ancestors of a tag, closest first: `a|b|c` → `a|b`, `a`.
pub fn ancestors(tag: &str) -> impl Iterator<Item = &str> {
    let mut rest = tag;
    std::iter::from_fn(move || {
        let index = rest.rfind(HIERARCHY_DELIMITER)?;
        if index == 0 {
            return None;
        }
        rest = &rest[..index];
        Some(rest)
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    tags: BTreeSet<String>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Expand abbreviations, drop blanks and duplicates, sort.
    pub fn expand<S: AsRef<str>>(
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
    ) -> Vec<String> {
        let mut expanded = BTreeSet::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            match resolver.and_then(|r| r.resolve(token)) {
                Some(group) if !group.is_empty() => {
                    log::debug!("expanded abbreviation \"{}\" -> {}", token, group.join(","));
                    expanded.extend(
                        group
                            .iter()
                            .map(|t| t.trim().to_string())
                            .filter(|t| !t.is_empty()),
                    );
                }
                _ => {
                    expanded.insert(token.to_string());
                }
            }
        }
        expanded.into_iter().collect()
    }

    /// Toggle each token individually, or force it in or out.
    ///
    /// Does not write anything; the caller persists the returned changes.
    pub fn toggle<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
        force: Force,
    ) -> TagChanges {
        let tags = Self::expand(tokens, resolver);
        log::info!("toggle tags: {}", tags.join(","));

        let mut changes = TagChanges::default();
        for tag in &tags {
            let add = match force {
                Force::In => true,
                Force::Out => false,
                Force::Toggle => !self.contains(tag),
            };
            if add {
                TagChanges::extend_unique(&mut changes.added, self.add_with_ancestors(tag));
            } else {
                TagChanges::extend_unique(&mut changes.removed, self.remove_with_ancestors(tag));
            }
        }
        changes
    }

    /// All-or-nothing toggle: if every tag is present remove them all,
    /// otherwise add them all.
    pub fn toggle_all<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
    ) -> TagChanges {
        let tags = Self::expand(tokens, resolver);
        let force = if tags.iter().all(|t| self.contains(t)) {
            Force::Out
        } else {
            Force::In
        };
        self.toggle(&tags, None, force)
    }

    /// Bulk set used at load time, no ancestor expansion.
    ///
    /// With `intersect` only tags present both here and in `tags` are kept.
    pub fn load_tags<S: AsRef<str>>(&mut self, tags: &[S], intersect: bool) {
        let given = tags
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| !t.is_empty());
        if intersect {
            let keep: BTreeSet<String> = given
                .filter(|t| self.tags.contains(*t))
                .map(str::to_string)
                .collect();
            self.tags = keep;
        } else {
            self.tags.extend(given.map(str::to_string));
        }
    }

    fn has_descendant(&self, tag: &str) -> bool {
        let child = format!("{}{}", tag, HIERARCHY_DELIMITER);
        self.tags.iter().any(|t| t.starts_with(&child))
    }

    /// Add a tag and its missing ancestors; returns what was added,
    /// the tag itself first, then closest ancestor first.
    fn add_with_ancestors(&mut self, tag: &str) -> Vec<String> {
        let mut added = Vec::new();
        if self.tags.insert(tag.to_string()) {
            added.push(tag.to_string());
        }
        for ancestor in ancestors(tag) {
            if self.tags.insert(ancestor.to_string()) {
                added.push(ancestor.to_string());
            }
        }
        added
    }

    /// Remove a tag unless a descendant remains, then walk up the ancestors
    /// under the same rule.
    fn remove_with_ancestors(&mut self, tag: &str) -> Vec<String> {
        let mut removed = Vec::new();
        for candidate in std::iter::once(tag).chain(ancestors(tag)) {
            if !self.tags.contains(candidate) || self.has_descendant(candidate) {
                break;
            }
            self.tags.remove(candidate);
            removed.push(candidate.to_string());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Abbreviations(HashMap<String, Vec<String>>);

    impl TagsetResolver for Abbreviations {
        fn resolve(&self, abbreviation: &str) -> Option<&[String]> {
            self.0.get(abbreviation).map(Vec::as_slice)
        }
    }

    fn list(tags: &[&str]) -> TagList {
        let mut l = TagList::new();
        l.load_tags(tags, false);
        l
    }

    #[test]
    fn ancestors_closest_first() {
        let a: Vec<&str> = ancestors("a|b|c").collect();
        assert_eq!(a, vec!["a|b", "a"]);
        assert_eq!(ancestors("root").count(), 0);
    }

    #[test]
    fn adding_creates_ancestors() {
        let mut l = TagList::new();
        let changes = l.toggle(&["people|family|kids"], None, Force::Toggle);
        assert_eq!(changes.added, vec!["people|family|kids", "people|family", "people"]);
        assert!(changes.removed.is_empty());
        assert_eq!(l.len(), 3);
    }

    #[test]
    fn toggling_twice_restores() {
        let mut l = list(&["x"]);
        let before = l.clone();
        l.toggle(&["a|b|c"], None, Force::Toggle);
        let changes = l.toggle(&["a|b|c"], None, Force::Toggle);
        assert_eq!(changes.removed, vec!["a|b|c", "a|b", "a"]);
        assert_eq!(l, before);
    }

    #[test]
    fn removal_keeps_needed_ancestors() {
        let mut l = list(&["a", "a|b", "a|b|c", "a|b|d"]);
        let changes = l.toggle(&["a|b|c"], None, Force::Out);
        assert_eq!(changes.removed, vec!["a|b|c"]);
        assert_eq!(l.to_vec(), vec!["a", "a|b", "a|b|d"]);

        let changes = l.toggle(&["a|b|d"], None, Force::Out);
        assert_eq!(changes.removed, vec!["a|b|d", "a|b", "a"]);
        assert!(l.is_empty());
    }

    #[test]
    fn parent_with_children_is_not_removed() {
        let mut l = list(&["a", "a|b"]);
        let changes = l.toggle(&["a"], None, Force::Toggle);
        assert!(changes.is_empty());
        assert!(l.contains("a"));
    }

    #[test]
    fn forced_modes_do_not_flip() {
        let mut l = list(&["a"]);
        assert!(l.toggle(&["a"], None, Force::In).is_empty());
        assert!(l.toggle(&["b"], None, Force::Out).is_empty());
        assert_eq!(l.to_vec(), vec!["a"]);
    }

    #[test]
    fn abbreviations_expand() {
        let resolver = Abbreviations(HashMap::from([(
            "fam".to_string(),
            vec!["people|family".to_string(), " holiday ".to_string()],
        )]));
        let mut l = TagList::new();
        let changes = l.toggle(&["fam", "literal", " "], Some(&resolver), Force::Toggle);
        assert_eq!(l.to_vec(), vec!["holiday", "literal", "people", "people|family"]);
        assert_eq!(changes.added.len(), 4);
    }

    #[test]
    fn toggle_all_is_all_or_nothing() {
        let mut l = list(&["a"]);
        let changes = l.toggle_all(&["a", "b"], None);
        assert_eq!(changes.added, vec!["b"]);
        assert!(changes.removed.is_empty());

        let changes = l.toggle_all(&["a", "b"], None);
        assert_eq!(changes.removed, vec!["a", "b"]);
        assert!(l.is_empty());
    }

    #[test]
    fn load_tags_union_and_intersect() {
        let mut l = list(&["a", "b", ""]);
        assert_eq!(l.len(), 2);
        l.load_tags(&["b", "c"], true);
        assert_eq!(l.to_vec(), vec!["b"]);
    }
}
