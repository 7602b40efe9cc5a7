use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum::{Display, EnumString};

use super::error::EngineError;

/// The name of the primary key property, present on every entity type.
pub const ID_PROPERTY: &str = "Id";

#[derive(Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Clone, Copy, Display, EnumString)]
pub enum DataType {
    String,
    Int,
    Decimal,
    Bool,
    Date,
    DateTime,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// The property name as it appears in expressions and results
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
    /// Set when this property is the foreign key scalar backing a navigation property
    pub foreign_key_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationDescriptor {
    /// The navigation property name
    pub name: String,
    /// The entity type this navigation points at
    pub target_type: String,
    /// The foreign key property on the declaring type
    pub foreign_key_property: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// The collection property name
    pub name: String,
    pub target_type: String,
    /// The foreign key property on the target type pointing back at the declaring type
    pub inverse_foreign_key: String,
}

/// Immutable description of one entity type, including any user-defined
/// properties the metadata source contributed for the tenant's definitions.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeMetadata {
    pub type_name: String,
    /// The backing table or view
    pub table_name: String,
    /// The collection name entities of this type are grouped under in responses
    pub collection_name: String,
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub navigations: Vec<NavigationDescriptor>,
    #[serde(default)]
    pub collections: Vec<CollectionDescriptor>,
    /// Properties searched by the free-text `search` argument
    #[serde(default)]
    pub search_properties: Vec<String>,
    /// The soft-deactivation flag property, if the type supports deactivation
    pub is_active_property: Option<String>,
    /// Names the self-referencing navigation that makes this type a
    /// hierarchical dimension (e.g. an account classification tree)
    pub tree_parent_navigation: Option<String>,
}

impl EntityTypeMetadata {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }
    pub fn navigation(&self, name: &str) -> Option<&NavigationDescriptor> {
        self.navigations.iter().find(|n| n.name == name)
    }
    pub fn collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }
    pub fn is_tree(&self) -> bool {
        self.tree_parent_navigation.is_some()
    }
    /// The foreign key property behind the tree parent navigation, if any.
    pub fn tree_parent_foreign_key(&self) -> Option<&str> {
        let parent_nav = self.tree_parent_navigation.as_deref()?;
        self.navigation(parent_nav)
            .map(|nav| nav.foreign_key_property.as_str())
    }
}

/// A closed, immutable map from type name to its metadata, built once per
/// tenant and definitions-version and shared between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityModel {
    pub types: IndexMap<String, EntityTypeMetadata>,
}

impl EntityModel {
    pub fn entity_type(&self, type_name: &str) -> Result<&EntityTypeMetadata, EngineError> {
        self.types
            .get(type_name)
            .ok_or_else(|| EngineError::Bind(format!("Unknown entity type \"{}\"", type_name)))
    }
}

pub type TenantId = i32;

/// External collaborator that produces the metadata snapshot for a tenant.
/// `version` must be cheap; `load` is only called when the version token moved.
pub trait MetadataSource: Send + Sync {
    fn version(&self, tenant: TenantId) -> Result<String, EngineError>;
    fn load(&self, tenant: TenantId) -> Result<EntityModel, EngineError>;
}

struct CachedModel {
    version: String,
    model: Arc<EntityModel>,
}

/// Per-tenant metadata cache. Snapshots are loaded at most once per version
/// and replaced atomically, so in-flight readers keep their `Arc` untouched.
pub struct MetadataProvider<S> {
    source: S,
    cache: RwLock<HashMap<TenantId, CachedModel>>,
}

impl<S: MetadataSource> MetadataProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant: TenantId) -> Result<Arc<EntityModel>, EngineError> {
        let version = self.source.version(tenant)?;

        {
            let cache = self
                .cache
                .read()
                .map_err(|_| EngineError::Internal("metadata cache poisoned".to_string()))?;
            if let Some(cached) = cache.get(&tenant) {
                if cached.version == version {
                    return Ok(Arc::clone(&cached.model));
                }
            }
        }

        let model = Arc::new(self.source.load(tenant)?);
        let mut cache = self
            .cache
            .write()
            .map_err(|_| EngineError::Internal("metadata cache poisoned".to_string()))?;
        cache.insert(
            tenant,
            CachedModel {
                version,
                model: Arc::clone(&model),
            },
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        version: RwLock<String>,
        loads: AtomicUsize,
    }

    impl MetadataSource for CountingSource {
        fn version(&self, _tenant: TenantId) -> Result<String, EngineError> {
            Ok(self.version.read().unwrap().clone())
        }
        fn load(&self, _tenant: TenantId) -> Result<EntityModel, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(EntityModel {
                types: IndexMap::new(),
            })
        }
    }

    #[test]
    fn loads_once_per_version() {
        let provider = MetadataProvider::new(CountingSource {
            version: RwLock::new("v1".to_string()),
            loads: AtomicUsize::new(0),
        });

        provider.get(101).unwrap();
        provider.get(101).unwrap();
        assert_eq!(provider.source.loads.load(Ordering::SeqCst), 1);

        *provider.source.version.write().unwrap() = "v2".to_string();
        provider.get(101).unwrap();
        assert_eq!(provider.source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshots_survive_replacement() {
        let provider = MetadataProvider::new(CountingSource {
            version: RwLock::new("v1".to_string()),
            loads: AtomicUsize::new(0),
        });

        let before = provider.get(101).unwrap();
        *provider.source.version.write().unwrap() = "v2".to_string();
        let after = provider.get(101).unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.types.len(), 0);
    }
}
