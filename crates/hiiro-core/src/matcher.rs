//! Ambiguous-prefix resolution shared by every name lookup.
//!
//! Policy: an item whose full name equals the query always wins; otherwise a
//! single prefix match wins; otherwise the result is either empty or
//! ambiguous and callers report it instead of guessing.

/// Second segment of a compound `parent/child` query that names the parent itself.
pub const MAIN_SEGMENT: &str = "main";

#[derive(Debug, Clone, Copy)]
pub struct Match<'a, T> {
    pub item: &'a T,
    /// The part of the item's key the query was compared against.
    pub key: &'a str,
}

#[derive(Debug, Clone)]
pub struct MatchResult<'a, T> {
    query: String,
    matches: Vec<Match<'a, T>>,
}

/// Exhaustive view of a [`MatchResult`] for callers that branch on its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a, T> {
    NotFound,
    Ambiguous(Vec<&'a T>),
    Resolved(&'a T),
}

impl<'a, T> MatchResult<'a, T> {
    fn new(query: &str, matches: Vec<Match<'a, T>>) -> Self {
        Self {
            query: query.to_string(),
            matches,
        }
    }

    pub fn count(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn first(&self) -> Option<&'a T> {
        self.matches.first().map(|m| m.item)
    }

    pub fn matches(&self) -> &[Match<'a, T>] {
        &self.matches
    }

    pub fn items(&self) -> Vec<&'a T> {
        self.matches.iter().map(|m| m.item).collect()
    }

    /// The single match whose key equals the query exactly, if there is one.
    pub fn exact(&self) -> Option<&'a T> {
        let mut exact = self.matches.iter().filter(|m| m.key == self.query);
        match (exact.next(), exact.next()) {
            (Some(found), None) => Some(found.item),
            _ => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.matches.len() > 1 && self.exact().is_none()
    }

    /// The unique usable match: exact first, then a sole prefix match.
    pub fn matched(&self) -> Option<&'a T> {
        if let Some(exact) = self.exact() {
            return Some(exact);
        }
        if self.matches.len() == 1 {
            return self.first();
        }
        None
    }

    pub fn resolution(&self) -> Resolution<'a, T> {
        if let Some(item) = self.matched() {
            return Resolution::Resolved(item);
        }
        if self.matches.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::Ambiguous(self.items())
        }
    }
}

pub struct PrefixMatcher<'a, T> {
    items: &'a [T],
    key: fn(&T) -> &str,
}

impl<'a, T> PrefixMatcher<'a, T> {
    pub fn new(items: &'a [T], key: fn(&T) -> &str) -> Self {
        Self { items, key }
    }

    pub fn find(&self, query: &str) -> MatchResult<'a, T> {
        let key = self.key;
        self.collect(query, |item| Some(key(item)))
    }

    pub fn find_all(&self, query: &str) -> Vec<&'a T> {
        self.find(query).items()
    }

    /// Same policy as [`find`](Self::find) against another field of the items.
    pub fn resolve(&self, query: &str, alternate: fn(&T) -> Option<&str>) -> MatchResult<'a, T> {
        self.collect(query, alternate)
    }

    /// Resolves `parent/child` queries. The parent segment is matched against
    /// top-level keys; the child segment against the parent's children, where
    /// `main` (or a prefix of it, when no child matches) names the parent.
    pub fn resolve_path(&self, compound: &str) -> MatchResult<'a, T> {
        let Some((parent_query, child_query)) = compound.split_once('/') else {
            return self.find(compound);
        };

        let key = self.key;
        let parents = self.collect(parent_query, |item| {
            let name = key(item);
            (!name.contains('/')).then_some(name)
        });
        let Some(parent) = parents.matched() else {
            return parents;
        };
        let parent_key = key(parent);

        if child_query == MAIN_SEGMENT {
            return Self::main_of(compound, parent, parent_key);
        }

        let prefix = format!("{parent_key}/");
        let children: Vec<Match<'a, T>> = self
            .items
            .iter()
            .filter_map(|item| {
                let child = key(item).strip_prefix(prefix.as_str())?;
                child
                    .starts_with(child_query)
                    .then_some(Match { item, key: child })
            })
            .collect();

        if children.is_empty() && MAIN_SEGMENT.starts_with(child_query) {
            return Self::main_of(compound, parent, parent_key);
        }
        MatchResult::new(child_query, children)
    }

    fn main_of(compound: &str, parent: &'a T, parent_key: &'a str) -> MatchResult<'a, T> {
        let mut result = MatchResult::new(
            compound,
            vec![Match {
                item: parent,
                key: parent_key,
            }],
        );
        result.query = parent_key.to_string();
        result
    }

    fn collect<F>(&self, query: &str, key: F) -> MatchResult<'a, T>
    where
        F: Fn(&'a T) -> Option<&'a str>,
    {
        let matches = self
            .items
            .iter()
            .filter_map(|item| {
                let name = key(item)?;
                name.starts_with(query).then_some(Match { item, key: name })
            })
            .collect();
        MatchResult::new(query, matches)
    }
}
