use eyre::{bail, eyre};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a vector or matrix role registered in a [`TagRegistry`].
pub type TagId = usize;

/// Maximum number of vector tags, and of matrix tags, in one registry.
pub const MAX_TAGS: usize = 64;

/// A set of tags, stored as a bitmask.
#[derive(Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagSet(u64);

impl TagSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    pub fn single(tag: TagId) -> Self {
        Self::empty().with(tag)
    }

    /// # Panics
    ///
    /// Panics if `tag >= MAX_TAGS`.
    pub fn with(mut self, tag: TagId) -> Self {
        self.insert(tag);
        self
    }

    pub fn insert(&mut self, tag: TagId) {
        assert!(tag < MAX_TAGS, "tag {} exceeds the maximum of {} tags", tag, MAX_TAGS);
        self.0 |= 1 << tag;
    }

    pub fn remove(&mut self, tag: TagId) {
        if tag < MAX_TAGS {
            self.0 &= !(1 << tag);
        }
    }

    #[inline]
    pub fn contains(&self, tag: TagId) -> bool {
        tag < MAX_TAGS && self.0 & (1 << tag) != 0
    }

    pub fn intersection(&self, other: TagSet) -> TagSet {
        Self(self.0 & other.0)
    }

    pub fn union(&self, other: TagSet) -> TagSet {
        Self(self.0 | other.0)
    }

    /// Restricts the set to the first `count` tags.
    pub fn truncated(&self, count: usize) -> TagSet {
        if count >= MAX_TAGS {
            *self
        } else {
            Self(self.0 & ((1u64 << count) - 1))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = TagId> {
        let bits = self.0;
        (0..MAX_TAGS).filter(move |tag| bits & (1 << tag) != 0)
    }
}

impl FromIterator<TagId> for TagSet {
    fn from_iter<I: IntoIterator<Item = TagId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Names of the vector and matrix roles known to a system.
///
/// Vector tags and matrix tags are separate namespaces.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRegistry {
    vector_tags: Vec<String>,
    matrix_tags: Vec<String>,
}

fn register(tags: &mut Vec<String>, kind: &str, name: &str) -> eyre::Result<TagId> {
    if let Some(id) = tags.iter().position(|existing| existing == name) {
        return Ok(id);
    }
    if tags.len() >= MAX_TAGS {
        bail!("cannot register {} tag '{}': at most {} tags are supported", kind, name, MAX_TAGS);
    }
    tags.push(name.to_string());
    Ok(tags.len() - 1)
}

fn lookup(tags: &[String], kind: &str, name: &str) -> eyre::Result<TagId> {
    tags.iter()
        .position(|existing| existing == name)
        .ok_or_else(|| eyre!("unknown {} tag '{}'", kind, name))
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a vector tag, returning the existing id if the name is already known.
    pub fn add_vector_tag(&mut self, name: &str) -> eyre::Result<TagId> {
        register(&mut self.vector_tags, "vector", name)
    }

    pub fn add_matrix_tag(&mut self, name: &str) -> eyre::Result<TagId> {
        register(&mut self.matrix_tags, "matrix", name)
    }

    pub fn vector_tag(&self, name: &str) -> eyre::Result<TagId> {
        lookup(&self.vector_tags, "vector", name)
    }

    pub fn matrix_tag(&self, name: &str) -> eyre::Result<TagId> {
        lookup(&self.matrix_tags, "matrix", name)
    }

    pub fn vector_tag_name(&self, tag: TagId) -> Option<&str> {
        self.vector_tags.get(tag).map(String::as_str)
    }

    pub fn matrix_tag_name(&self, tag: TagId) -> Option<&str> {
        self.matrix_tags.get(tag).map(String::as_str)
    }

    pub fn num_vector_tags(&self) -> usize {
        self.vector_tags.len()
    }

    pub fn num_matrix_tags(&self) -> usize {
        self.matrix_tags.len()
    }
}

/// Tag and variable activity for one compute phase.
///
/// Passed by value into every phase instead of being stored on the system, so that launches do
/// not depend on the order in which earlier phases toggled activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Vector tags that receive residual contributions.
    pub residual_tags: TagSet,
    /// Matrix tags that receive Jacobian contributions.
    pub matrix_tags: TagSet,
    /// Vector tags whose quadrature-point values are projected and cached.
    pub solution_tags: TagSet,
    /// Variables whose quadrature-point values are projected and cached.
    pub variables: Vec<usize>,
}

impl PhaseConfig {
    pub fn residual(residual_tags: TagSet) -> Self {
        Self {
            residual_tags,
            ..Self::default()
        }
    }

    pub fn jacobian(matrix_tags: TagSet) -> Self {
        Self {
            matrix_tags,
            ..Self::default()
        }
    }

    pub fn with_solution(mut self, tags: TagSet, variables: impl IntoIterator<Item = usize>) -> Self {
        self.solution_tags = tags;
        self.variables = variables.into_iter().collect();
        self
    }
}
