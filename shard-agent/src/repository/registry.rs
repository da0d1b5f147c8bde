//! Named repository table.
//!
//! Built once at startup from a list of [`RepositoryConfig`] entries and
//! read-only afterwards, so lookups need no locking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use super::{disabled, local, BackupRepository, DisabledRepository, LocalFileSystemRepository};
use super::{RepositoryError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Unique repository name
    pub name: String,

    /// Implementation kind (`local`, `disabled`, or a registered custom kind)
    pub kind: String,

    /// Whether requests without a repository name use this one
    #[serde(default)]
    pub default: bool,

    /// Implementation-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            default: false,
            options: BTreeMap::new(),
        }
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

pub type RepositoryFactory =
    Arc<dyn Fn(&RepositoryConfig) -> Result<Arc<dyn BackupRepository>> + Send + Sync>;

/// Constructors for repository kinds, keyed by kind name.
#[derive(Clone)]
pub struct RepositoryFactories {
    factories: HashMap<String, RepositoryFactory>,
}

impl RepositoryFactories {
    /// Factories with no kinds registered.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RepositoryConfig) -> Result<Arc<dyn BackupRepository>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    fn build(&self, config: &RepositoryConfig) -> Result<Arc<dyn BackupRepository>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| RepositoryError::UnknownKind {
                name: config.name.clone(),
                kind: config.kind.clone(),
            })?;
        factory(config)
    }
}

impl Default for RepositoryFactories {
    /// The built-in `local` and `disabled` kinds.
    fn default() -> Self {
        Self::empty()
            .register(local::KIND, |config| {
                let repo = LocalFileSystemRepository::from_options(&config.name, &config.options)?;
                Ok(Arc::new(repo) as Arc<dyn BackupRepository>)
            })
            .register(disabled::KIND, |config| {
                let repo = DisabledRepository::from_options(&config.name, &config.options);
                Ok(Arc::new(repo) as Arc<dyn BackupRepository>)
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Arc<dyn BackupRepository>>,
    default_name: Option<String>,
}

impl RepositoryRegistry {
    /// Build the registry, rejecting duplicate names and more than one default.
    pub fn from_configs(
        configs: &[RepositoryConfig],
        factories: &RepositoryFactories,
    ) -> Result<Self> {
        let defaults: Vec<&str> = configs
            .iter()
            .filter(|c| c.default)
            .map(|c| c.name.as_str())
            .collect();
        if defaults.len() > 1 {
            return Err(RepositoryError::Config(format!(
                "more than one default repository: {}",
                defaults.join(", ")
            )));
        }

        let mut repositories = HashMap::with_capacity(configs.len());
        for config in configs {
            if config.name.trim().is_empty() {
                return Err(RepositoryError::Config("repository name is empty".into()));
            }
            if repositories.contains_key(&config.name) {
                return Err(RepositoryError::Config(format!(
                    "duplicate repository name '{}'",
                    config.name
                )));
            }
            let repo = factories.build(config)?;
            info!(
                repository = %config.name,
                kind = %config.kind,
                default = config.default,
                "Registered backup repository"
            );
            repositories.insert(config.name.clone(), repo);
        }

        Ok(Self {
            repositories,
            default_name: defaults.first().map(|s| s.to_string()),
        })
    }

    /// Named repository if given, otherwise the default.
    pub fn resolve(&self, requested: Option<&str>) -> Result<Arc<dyn BackupRepository>> {
        match requested {
            Some(name) => self
                .repositories
                .get(name)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(name.to_string())),
            None => {
                let name = self.default_name.as_deref().ok_or(RepositoryError::NoDefault)?;
                self.repositories
                    .get(name)
                    .cloned()
                    .ok_or(RepositoryError::NoDefault)
            }
        }
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.keys().cloned().collect();
        names.sort();
        names
    }
}
