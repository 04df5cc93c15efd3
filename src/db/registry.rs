//! Instance registry.
//!
//! Maps instance ids to lazily-built execution contexts. Each id owns a
//! `OnceCell`, so concurrent first requests for the same id share a single
//! connection attempt; a failed attempt leaves the cell empty and the next
//! request tries again.

use super::BackendClient;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_INSTANCE_ID, InstanceConfig, InstanceSummary};
use crate::tools::sql_validator::SqlValidator;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::info;

/// A connected instance: its configuration, backend and bound validator.
pub struct ExecutionContext {
    pub config: Arc<InstanceConfig>,
    pub client: BackendClient,
    pub validator: SqlValidator,
}

impl ExecutionContext {
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

struct InstanceSlot {
    config: Arc<InstanceConfig>,
    context: OnceCell<Arc<ExecutionContext>>,
}

pub struct InstanceRegistry {
    // BTreeMap keeps ids sorted for hints and introspection
    slots: BTreeMap<String, InstanceSlot>,
    connections_opened: AtomicUsize,
}

impl InstanceRegistry {
    /// Build a registry from resolved instance configurations.
    ///
    /// Nothing connects here; duplicate ids are a configuration error.
    pub fn new(configs: impl IntoIterator<Item = InstanceConfig>) -> DbResult<Self> {
        let mut slots = BTreeMap::new();
        for config in configs {
            if config.id.is_empty() {
                return Err(DbError::configuration("Instance id must not be empty"));
            }
            let id = config.id.clone();
            let slot = InstanceSlot {
                config: Arc::new(config),
                context: OnceCell::new(),
            };
            if slots.insert(id.clone(), slot).is_some() {
                return Err(DbError::configuration(format!(
                    "Instance '{}' is configured more than once",
                    id
                )));
            }
        }
        Ok(Self {
            slots,
            connections_opened: AtomicUsize::new(0),
        })
    }

    /// Resolve an instance, connecting on first use.
    ///
    /// `None` selects the default instance; ids match case-insensitively.
    pub async fn get(&self, instance_id: Option<&str>) -> DbResult<Arc<ExecutionContext>> {
        let id = instance_id
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_INSTANCE_ID.to_string());

        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| DbError::unknown_instance(&id, self.known_ids_for_hint()))?;

        let context = slot
            .context
            .get_or_try_init(|| async {
                let client = BackendClient::connect(&slot.config).await?;
                self.connections_opened.fetch_add(1, Ordering::SeqCst);
                info!(
                    instance_id = %slot.config.id,
                    engine = %slot.config.engine,
                    read_only = slot.config.read_only,
                    "Instance connected"
                );
                Ok::<_, DbError>(Arc::new(ExecutionContext {
                    config: Arc::clone(&slot.config),
                    client,
                    validator: SqlValidator::for_instance(&slot.config),
                }))
            })
            .await?;
        Ok(Arc::clone(context))
    }

    /// Sorted ids of every configured instance.
    pub fn instance_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Configurations in the same order as [`instance_ids`](Self::instance_ids).
    pub fn describe_configs(&self) -> Vec<Arc<InstanceConfig>> {
        self.slots
            .values()
            .map(|slot| Arc::clone(&slot.config))
            .collect()
    }

    /// Credential-free summaries in id order.
    pub fn summaries(&self) -> Vec<InstanceSummary> {
        self.slots
            .values()
            .map(|slot| slot.config.summary())
            .collect()
    }

    /// Number of successful backend connections made so far.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    fn known_ids_for_hint(&self) -> Vec<String> {
        if self.slots.is_empty() {
            vec![DEFAULT_INSTANCE_ID.to_string()]
        } else {
            self.instance_ids()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineKind;

    #[test]
    fn test_instance_ids_are_sorted() {
        let registry = InstanceRegistry::new([
            InstanceConfig::sqlite("zeta", "z.db"),
            InstanceConfig::sqlite("Alpha", "a.db"),
            InstanceConfig::new("mid", EngineKind::Postgres),
        ])
        .unwrap();

        assert_eq!(registry.instance_ids(), vec!["alpha", "mid", "zeta"]);
        let ids: Vec<_> = registry
            .describe_configs()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids, registry.instance_ids());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = InstanceRegistry::new([
            InstanceConfig::sqlite("crm", "a.db"),
            InstanceConfig::sqlite("CRM", "b.db"),
        ]);
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_unknown_instance_lists_known_ids() {
        let registry = InstanceRegistry::new([
            InstanceConfig::sqlite("sales", "s.db"),
            InstanceConfig::sqlite("crm", "c.db"),
        ])
        .unwrap();

        match registry.get(Some("hr")).await {
            Err(DbError::UnknownInstance {
                instance_id,
                available,
            }) => {
                assert_eq!(instance_id, "hr");
                assert_eq!(available, vec!["crm", "sales"]);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected UnknownInstance"),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_hints_default() {
        let registry = InstanceRegistry::new(Vec::new()).unwrap();
        match registry.get(None).await {
            Err(DbError::UnknownInstance { available, .. }) => {
                assert_eq!(available, vec![DEFAULT_INSTANCE_ID]);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected UnknownInstance"),
        }
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.db");
        let registry =
            InstanceRegistry::new([InstanceConfig::sqlite("default", path.to_string_lossy())])
                .unwrap();

        assert!(registry.get(None).await.is_err());
        assert_eq!(registry.connections_opened(), 0);

        std::fs::write(&path, b"").unwrap();
        let context = registry.get(Some("DEFAULT")).await.unwrap();
        assert_eq!(context.id(), "default");
        assert_eq!(registry.connections_opened(), 1);
    }
}
