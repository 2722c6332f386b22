//! Immutable registry of model schemas and their dependency graph.
//!
//! Edges run from parent to child: a model with a foreign key to another
//! model depends on it. The graph is computed once at construction and
//! reused for table creation, initial sync ordering and cascade deletes.

use crate::error::{ModelError, ModelResult};
use crate::schema::ModelSchema;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A child model column that references a parent model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub model_name: String,
    pub foreign_key: String,
}

/// Registered schemas in dependency order (parents before children).
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    sorted: Vec<Arc<ModelSchema>>,
    index: HashMap<String, usize>,
    parents: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<Dependent>>,
}

impl SchemaCatalog {
    /// Validates the schemas and sorts them by dependency.
    ///
    /// Fails on duplicate names, undeclared key fields, associations to
    /// unregistered models and cyclic association graphs.
    pub fn new(schemas: Vec<ModelSchema>) -> ModelResult<Self> {
        let mut names = HashSet::new();
        for schema in &schemas {
            if !names.insert(schema.name.clone()) {
                return Err(ModelError::DuplicateModel(schema.name.clone()));
            }
            for key in &schema.primary_key {
                if schema.get_field(key).is_none() {
                    return Err(ModelError::UnknownField {
                        model: schema.name.clone(),
                        field: key.clone(),
                    });
                }
            }
        }

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<Dependent>> = HashMap::new();
        for schema in &schemas {
            let own = parents.entry(schema.name.clone()).or_default();
            for field in schema.foreign_keys() {
                let Some(association) = field.association.as_ref() else {
                    continue;
                };
                if !names.contains(&association.target) {
                    return Err(ModelError::UnknownAssociationTarget {
                        model: schema.name.clone(),
                        target: association.target.clone(),
                    });
                }
                if !own.contains(&association.target) {
                    own.push(association.target.clone());
                }
                dependents
                    .entry(association.target.clone())
                    .or_default()
                    .push(Dependent {
                        model_name: schema.name.clone(),
                        foreign_key: field.name.clone(),
                    });
            }
        }

        let sorted = topological_sort(schemas, &parents)?;
        let index = sorted
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        Ok(Self {
            sorted,
            index,
            parents,
            dependents,
        })
    }

    /// Looks up a schema by model name.
    pub fn get(&self, name: &str) -> Option<&Arc<ModelSchema>> {
        self.index.get(name).map(|&i| &self.sorted[i])
    }

    /// Like [`get`](Self::get) but fails with `UnknownModel`.
    pub fn schema(&self, name: &str) -> ModelResult<&Arc<ModelSchema>> {
        self.get(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    /// All schemas, parents before children.
    pub fn sorted(&self) -> &[Arc<ModelSchema>] {
        &self.sorted
    }

    /// Sync-enabled schemas, parents before children.
    pub fn syncable(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.sorted.iter().filter(|s| s.sync_enabled)
    }

    /// Models this model holds foreign keys to.
    pub fn parents_of(&self, name: &str) -> &[String] {
        self.parents.get(name).map_or(&[], Vec::as_slice)
    }

    /// Child columns that reference this model.
    pub fn dependents_of(&self, name: &str) -> &[Dependent] {
        self.dependents.get(name).map_or(&[], Vec::as_slice)
    }

    /// Groups the given models into levels. Every model's parents (within the
    /// given set) are in an earlier level, so each level can run concurrently.
    pub fn dependency_levels<'a>(
        &'a self,
        models: impl IntoIterator<Item = &'a Arc<ModelSchema>>,
    ) -> Vec<Vec<Arc<ModelSchema>>> {
        let selected: Vec<&Arc<ModelSchema>> = models.into_iter().collect();
        let names: HashSet<&str> = selected.iter().map(|s| s.name.as_str()).collect();
        let mut level_of: HashMap<String, usize> = HashMap::new();
        let mut ordered = selected.clone();
        ordered.sort_by_key(|s| self.index.get(&s.name).copied().unwrap_or(usize::MAX));

        let mut levels: Vec<Vec<Arc<ModelSchema>>> = Vec::new();
        for schema in ordered {
            let level = self
                .parents_of(&schema.name)
                .iter()
                .filter(|p| names.contains(p.as_str()))
                .filter_map(|p| level_of.get(p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(schema.name.clone(), level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(Arc::clone(schema));
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Kahn's algorithm, stable with respect to registration order.
fn topological_sort(
    schemas: Vec<ModelSchema>,
    parents: &HashMap<String, Vec<String>>,
) -> ModelResult<Vec<Arc<ModelSchema>>> {
    let mut pending: Vec<Option<ModelSchema>> = schemas.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut sorted = Vec::with_capacity(pending.len());

    loop {
        let next = pending.iter().position(|slot| {
            slot.as_ref().is_some_and(|s| {
                parents
                    .get(&s.name)
                    .is_none_or(|ps| ps.iter().all(|p| placed.contains(p)))
            })
        });
        let Some(i) = next else { break };
        if let Some(schema) = pending[i].take() {
            placed.insert(schema.name.clone());
            sorted.push(Arc::new(schema));
        }
    }

    let cyclic: Vec<String> = pending.into_iter().flatten().map(|s| s.name).collect();
    if !cyclic.is_empty() {
        return Err(ModelError::CyclicRelations(cyclic));
    }
    Ok(sorted)
}
