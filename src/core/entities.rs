//! Entity data supplied with a request: attributes and parent links.

use super::Value;
use crate::policy::EntityUid;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// An entity with attributes and parents.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// The entity's uid
    pub uid: EntityUid,
    /// Attribute values
    pub attrs: BTreeMap<String, Value>,
    /// Direct parents
    pub parents: Vec<EntityUid>,
}

impl Entity {
    /// Create an entity with no attributes or parents.
    pub fn new(uid: EntityUid) -> Self {
        Self {
            uid,
            attrs: BTreeMap::new(),
            parents: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Add a parent.
    pub fn with_parent(mut self, parent: EntityUid) -> Self {
        self.parents.push(parent);
        self
    }
}

/// Result of resolving a uid against the entity set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Exactly one entity matches
    Found(&'a Entity),
    /// No entity matches
    Missing,
    /// An untyped uid matches entities of more than one type
    Ambiguous,
}

/// The set of entities known to one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entities {
    entities: Vec<Entity>,
    index: HashMap<EntityUid, usize>,
}

impl Entities {
    /// Create an empty entity set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entities. A later entity with the same uid replaces an earlier one.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut set = Self::new();
        for entity in entities {
            set.insert(entity);
        }
        set
    }

    /// Insert or replace an entity.
    pub fn insert(&mut self, entity: Entity) {
        match self.index.get(&entity.uid) {
            Some(&idx) => self.entities[idx] = entity,
            None => {
                self.index.insert(entity.uid.clone(), self.entities.len());
                self.entities.push(entity);
            }
        }
    }

    /// Resolve a uid. An exact match wins; otherwise an untyped id must match one entity.
    pub fn lookup(&self, uid: &EntityUid) -> Lookup<'_> {
        let candidates = self.candidates(uid);
        match candidates.as_slice() {
            [] => Lookup::Missing,
            [entity] => Lookup::Found(*entity),
            _ => Lookup::Ambiguous,
        }
    }

    /// Look up an entity, returning `None` when it is missing or ambiguous.
    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        match self.lookup(uid) {
            Lookup::Found(entity) => Some(entity),
            _ => None,
        }
    }

    /// The exact match if there is one, else every entity the uid matches.
    fn candidates(&self, uid: &EntityUid) -> Vec<&Entity> {
        if let Some(&idx) = self.index.get(uid) {
            return vec![&self.entities[idx]];
        }
        self.entities.iter().filter(|e| uid.matches(&e.uid)).collect()
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if there are no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check whether `uid` is `target` or a transitive descendant of it.
    ///
    /// An untyped uid follows the parents of every entity it matches. Parent cycles are
    /// tolerated.
    pub fn is_in(&self, uid: &EntityUid, target: &EntityUid) -> bool {
        if target.matches(uid) {
            return true;
        }

        let mut visited: HashSet<&EntityUid> = HashSet::new();
        let mut queue: VecDeque<&EntityUid> = VecDeque::new();
        queue.push_back(uid);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for entity in self.candidates(current) {
                for parent in &entity.parents {
                    if target.matches(parent) {
                        return true;
                    }
                    queue.push_back(parent);
                }
            }
        }
        false
    }
}
