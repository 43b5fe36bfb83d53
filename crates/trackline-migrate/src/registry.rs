use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::engine::MigrationStep;
use crate::schema::RecordShape;

/// Error building a [`SchemaRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Lookup of a collection the registry does not declare.
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
    /// Two collections share a name.
    #[error("duplicate collection `{0}`")]
    DuplicateCollection(String),
    /// A version lies outside the collection's `introduced..=current` range.
    #[error("collection `{collection}`: version v{version} is out of range")]
    VersionOutOfRange { collection: String, version: u32 },
    /// No shape is declared at the collection's introduction version.
    #[error("collection `{collection}`: no shape declared at v{version}")]
    MissingShape { collection: String, version: u32 },
    /// A step was attached to the wrong collection.
    #[error("collection `{collection}`: step belongs to `{step_collection}`")]
    ForeignStep {
        collection: String,
        step_collection: String,
    },
    /// A step does not move forward.
    #[error("collection `{collection}`: step v{from}→v{to} does not move forward")]
    BackwardStep {
        collection: String,
        from: u32,
        to: u32,
    },
    /// Two steps leave the same version.
    #[error("collection `{collection}`: more than one step from v{from}")]
    AmbiguousStep { collection: String, from: u32 },
    /// A version has no step leaving it.
    #[error("collection `{collection}`: missing migration step from v{missing}")]
    GapInChain { collection: String, missing: u32 },
    /// A reference field points at an undeclared collection.
    #[error("collection `{collection}`: field `{field}` references unknown collection `{target}`")]
    UnknownReference {
        collection: String,
        field: String,
        target: String,
    },
    /// Reference fields form a cycle.
    #[error("reference cycle involving collection `{0}`")]
    ReferenceCycle(String),
    /// `min_supported_version` is zero or above the current version.
    #[error("minimum supported version v{min} is invalid for current v{current}")]
    InvalidMinimum { min: u32, current: u32 },
}

/// Everything the registry knows about one collection.
pub struct CollectionSchema {
    name: String,
    introduced_in: u32,
    shapes: BTreeMap<u32, RecordShape>,
    steps: Vec<Box<dyn MigrationStep>>,
}

impl fmt::Debug for CollectionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<(u32, u32)> = self
            .steps
            .iter()
            .map(|s| (s.source_version(), s.target_version()))
            .collect();
        f.debug_struct("CollectionSchema")
            .field("name", &self.name)
            .field("introduced_in", &self.introduced_in)
            .field("shapes", &self.shapes)
            .field("steps", &steps)
            .finish()
    }
}

impl CollectionSchema {
    /// Declare a collection that has existed since version 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            introduced_in: 1,
            shapes: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    /// Set the version in which the collection first appeared.
    pub fn introduced_in(mut self, version: u32) -> Self {
        self.introduced_in = version;
        self
    }

    /// Declare the record shape from `version` onwards.
    pub fn shape(mut self, version: u32, shape: RecordShape) -> Self {
        self.shapes.insert(version, shape);
        self
    }

    /// Register a migration step.
    pub fn step(mut self, step: impl MigrationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        // Keep sorted by source version for chain walks
        self.steps.sort_by_key(|s| s.source_version());
        self
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version in which the collection first appeared.
    pub fn introduced_version(&self) -> u32 {
        self.introduced_in
    }

    /// Whether a document at `version` may carry this collection.
    pub fn exists_at(&self, version: u32) -> bool {
        version >= self.introduced_in
    }

    /// The record shape in effect at `version`.
    pub fn shape_at(&self, version: u32) -> Option<&RecordShape> {
        if !self.exists_at(version) {
            return None;
        }
        self.shapes.range(..=version).next_back().map(|(_, s)| s)
    }

    /// Migration steps, ordered by source version.
    pub fn steps(&self) -> &[Box<dyn MigrationStep>] {
        &self.steps
    }

    /// The step leaving `version`, if any.
    pub fn step_from(&self, version: u32) -> Option<&dyn MigrationStep> {
        self.steps
            .iter()
            .find(|s| s.source_version() == version)
            .map(Box::as_ref)
    }

    fn check(&self, current: u32, min_supported: u32) -> Result<(), RegistryError> {
        let out_of_range = |version: u32| RegistryError::VersionOutOfRange {
            collection: self.name.clone(),
            version,
        };

        if self.introduced_in == 0 || self.introduced_in > current {
            return Err(out_of_range(self.introduced_in));
        }
        if !self.shapes.contains_key(&self.introduced_in) {
            return Err(RegistryError::MissingShape {
                collection: self.name.clone(),
                version: self.introduced_in,
            });
        }
        if let Some(&version) = self
            .shapes
            .keys()
            .find(|&&v| v < self.introduced_in || v > current)
        {
            return Err(out_of_range(version));
        }

        let mut sources = HashSet::new();
        for step in &self.steps {
            let (from, to) = (step.source_version(), step.target_version());
            if step.collection() != self.name {
                return Err(RegistryError::ForeignStep {
                    collection: self.name.clone(),
                    step_collection: step.collection().to_string(),
                });
            }
            if to <= from {
                return Err(RegistryError::BackwardStep {
                    collection: self.name.clone(),
                    from,
                    to,
                });
            }
            if from < self.introduced_in || to > current {
                return Err(out_of_range(if to > current { to } else { from }));
            }
            if !sources.insert(from) {
                return Err(RegistryError::AmbiguousStep {
                    collection: self.name.clone(),
                    from,
                });
            }
        }

        // Every version a document can declare needs exactly one way forward.
        let start = self.introduced_in.max(min_supported);
        if let Some(missing) = (start..current).find(|v| !sources.contains(v)) {
            return Err(RegistryError::GapInChain {
                collection: self.name.clone(),
                missing,
            });
        }
        Ok(())
    }
}

/// Declares every collection's record shapes and migration chains.
///
/// Build one with [`SchemaRegistry::builder`]; building checks that each
/// collection's chain is complete and unambiguous and derives the
/// dependency-aware order used when applying an import.
#[derive(Debug)]
pub struct SchemaRegistry {
    current_version: u32,
    min_supported_version: u32,
    collections: Vec<CollectionSchema>,
    index: HashMap<String, usize>,
    apply_order: Vec<usize>,
}

impl SchemaRegistry {
    /// Start declaring a registry whose current version is `current_version`.
    pub fn builder(current_version: u32) -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            current_version,
            min_supported_version: 1,
            collections: Vec::new(),
        }
    }

    /// The schema version this application writes.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// The oldest document version that can still be migrated.
    pub fn min_supported_version(&self) -> u32 {
        self.min_supported_version
    }

    /// Whether documents declared at `version` can be read.
    pub fn is_supported(&self, version: u32) -> bool {
        (self.min_supported_version..=self.current_version).contains(&version)
    }

    /// Look up a collection.
    pub fn get(&self, name: &str) -> Option<&CollectionSchema> {
        self.index.get(name).map(|&i| &self.collections[i])
    }

    /// Look up a collection, failing for unknown names.
    pub fn collection(&self, name: &str) -> Result<&CollectionSchema, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownCollection(name.to_string()))
    }

    /// The ordered migration steps of a collection.
    pub fn migrations_for(&self, name: &str) -> Result<&[Box<dyn MigrationStep>], RegistryError> {
        self.collection(name).map(CollectionSchema::steps)
    }

    /// All collections, in declaration order.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.iter()
    }

    /// All collections, parents before the collections that reference them.
    pub fn apply_order(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.apply_order.iter().map(|&i| &self.collections[i])
    }

    /// Whether a document at `version` may carry collection `name`.
    pub fn is_known_at(&self, name: &str, version: u32) -> bool {
        self.get(name).is_some_and(|c| c.exists_at(version))
    }

    /// Sensitive field names of a collection at the current version.
    pub fn sensitive_fields(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .and_then(|c| c.shape_at(self.current_version))
            .map(|shape| shape.sensitive_fields().collect())
            .unwrap_or_default()
    }
}

/// Builder for [`SchemaRegistry`].
pub struct SchemaRegistryBuilder {
    current_version: u32,
    min_supported_version: u32,
    collections: Vec<CollectionSchema>,
}

impl SchemaRegistryBuilder {
    /// Set the oldest readable version. Defaults to 1.
    pub fn min_supported_version(mut self, version: u32) -> Self {
        self.min_supported_version = version;
        self
    }

    /// Declare a collection. Declaration order breaks ties in apply order.
    pub fn collection(mut self, schema: CollectionSchema) -> Self {
        self.collections.push(schema);
        self
    }

    /// Check every declaration and build the registry.
    pub fn build(self) -> Result<SchemaRegistry, RegistryError> {
        let current = self.current_version;
        if self.min_supported_version == 0 || self.min_supported_version > current {
            return Err(RegistryError::InvalidMinimum {
                min: self.min_supported_version,
                current,
            });
        }

        let mut index = HashMap::new();
        for (i, schema) in self.collections.iter().enumerate() {
            if index.insert(schema.name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateCollection(schema.name.clone()));
            }
            schema.check(current, self.min_supported_version)?;
        }

        let apply_order = dependency_order(&self.collections, &index)?;

        Ok(SchemaRegistry {
            current_version: current,
            min_supported_version: self.min_supported_version,
            collections: self.collections,
            index,
            apply_order,
        })
    }
}

/// Topological order over reference edges (any version), ties broken by
/// declaration order.
fn dependency_order(
    collections: &[CollectionSchema],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, RegistryError> {
    let mut parents: Vec<HashSet<usize>> = vec![HashSet::new(); collections.len()];

    for (i, schema) in collections.iter().enumerate() {
        for shape in schema.shapes.values() {
            for (field, target) in shape.references() {
                let &t = index
                    .get(target)
                    .ok_or_else(|| RegistryError::UnknownReference {
                        collection: schema.name.clone(),
                        field: field.to_string(),
                        target: target.to_string(),
                    })?;
                // Self-references do not constrain ordering.
                if t != i {
                    parents[i].insert(t);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(collections.len());
    let mut placed = vec![false; collections.len()];
    while order.len() < collections.len() {
        let next = (0..collections.len())
            .find(|&i| !placed[i] && parents[i].iter().all(|&p| placed[p]));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let stuck = (0..collections.len()).find(|&i| !placed[i]).unwrap_or(0);
                return Err(RegistryError::ReferenceCycle(
                    collections[stuck].name.clone(),
                ));
            }
        }
    }
    Ok(order)
}
