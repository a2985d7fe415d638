//! Nucleus orchestrator and public API
//!
//! A [`Nucleus`] owns the dialect registry with the built-in action and chunk
//! factories, the table of hosted cellets, and the outbound transport. The
//! session layer feeds inbound bytes through [`Nucleus::on_primitive_arrived`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub mod cellet;
pub mod error;
pub mod storage;
pub mod transport;

pub use cellet::Cellet;
pub use error::{NucleusError, Result, StorageError, TransferError};
pub use transport::{Frame, MemoryTransport, Transport};

use crate::talk::dialect::chunk_factory::DEFAULT_CLEAR_THRESHOLD;
use crate::talk::dialect::{ActionDialectFactory, ChunkDialect, ChunkDialectFactory, ReadOrder};
use crate::talk::{AnyDialect, DialectEnumerator, ParseMode, Primitive, PrimitiveSerializer};

/// Action dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Maximum concurrent action workers
    pub max_workers: usize,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            max_workers: ActionDialectFactory::DEFAULT_MAX_WORKERS,
        }
    }
}

/// Chunk cache and transfer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Fragment size used when sending files
    pub chunk_size: usize,
    /// Global cache size above which the oldest sign is evicted
    pub clear_threshold: u64,
    /// How fragment reads are indexed
    pub read_order: ReadOrder,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: ChunkDialect::DEFAULT_LENGTH,
            clear_threshold: DEFAULT_CLEAR_THRESHOLD,
            read_order: ReadOrder::default(),
        }
    }
}

/// Configuration for a nucleus
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NucleusConfig {
    /// Nucleus tag; generated when absent
    pub tag: Option<Uuid>,

    /// Action dispatch settings
    pub action: ActionConfig,

    /// Chunk settings
    pub chunk: ChunkConfig,

    /// Primitive parse mode for inbound traffic
    pub parse_mode: ParseMode,
}

/// The nucleus hosting cellets
pub struct Nucleus {
    config: NucleusConfig,
    tag: Uuid,
    dialects: Arc<DialectEnumerator>,
    action_factory: Arc<ActionDialectFactory>,
    chunk_factory: Arc<ChunkDialectFactory>,
    cellets: RwLock<HashMap<String, Arc<dyn Cellet>>>,
    transport: Arc<dyn Transport>,
}

impl Nucleus {
    /// Create a nucleus with the built-in dialect factories registered
    pub fn new(config: NucleusConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.chunk.chunk_size == 0 {
            return Err(NucleusError::Config("chunk_size must be positive".to_string()));
        }

        let tag = config.tag.unwrap_or_else(Uuid::new_v4);
        let action_factory = Arc::new(ActionDialectFactory::new(config.action.max_workers));
        let chunk_factory = Arc::new(ChunkDialectFactory::new(
            config.chunk.clear_threshold,
            config.chunk.read_order,
        ));

        let dialects = Arc::new(DialectEnumerator::new());
        dialects.add_factory(action_factory.clone());
        dialects.add_factory(chunk_factory.clone());

        tracing::info!(
            %tag,
            max_workers = action_factory.max_workers(),
            clear_threshold = chunk_factory.clear_threshold(),
            "nucleus created"
        );

        Ok(Self {
            config,
            tag,
            dialects,
            action_factory,
            chunk_factory,
            cellets: RwLock::new(HashMap::new()),
            transport,
        })
    }

    /// Create a nucleus from a config file
    pub fn load(path: &Path, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let config = storage::load_config(path)?;
        Ok(Self::new(config, transport)?)
    }

    /// Persist the configuration with the resolved tag
    ///
    /// A nucleus loaded from the written file keeps the same tag.
    pub fn save_config(&self, path: &Path) -> Result<()> {
        let config = NucleusConfig {
            tag: Some(self.tag),
            ..self.config.clone()
        };
        storage::save_config(path, &config)?;
        Ok(())
    }

    /// Configuration in effect
    pub fn config(&self) -> &NucleusConfig {
        &self.config
    }

    /// Nucleus tag
    pub fn tag(&self) -> Uuid {
        self.tag
    }

    /// Dialect registry; applications add their own factories here
    pub fn dialects(&self) -> &Arc<DialectEnumerator> {
        &self.dialects
    }

    /// Built-in action dispatcher
    pub fn action_factory(&self) -> &Arc<ActionDialectFactory> {
        &self.action_factory
    }

    /// Built-in chunk cache
    pub fn chunk_factory(&self) -> &Arc<ChunkDialectFactory> {
        &self.chunk_factory
    }

    /// Serializer bound to this nucleus' registry and parse mode
    pub fn serializer(&self) -> PrimitiveSerializer<'_> {
        PrimitiveSerializer::new(&self.dialects).with_mode(self.config.parse_mode)
    }

    /// Host a cellet
    pub fn register_cellet(&self, cellet: Arc<dyn Cellet>) -> Result<()> {
        let identifier = cellet.identifier().to_string();
        let mut cellets = self.cellets.write();
        if cellets.contains_key(&identifier) {
            return Err(NucleusError::DuplicateCellet(identifier));
        }
        tracing::info!(cellet = %identifier, "cellet registered");
        cellets.insert(identifier, cellet);
        Ok(())
    }

    /// Stop hosting a cellet
    pub fn unregister_cellet(&self, identifier: &str) -> Option<Arc<dyn Cellet>> {
        let removed = self.cellets.write().remove(identifier);
        if removed.is_some() {
            tracing::info!(cellet = %identifier, "cellet unregistered");
        }
        removed
    }

    /// Look up a hosted cellet
    pub fn cellet(&self, identifier: &str) -> Option<Arc<dyn Cellet>> {
        self.cellets.read().get(identifier).cloned()
    }

    /// Identifiers of hosted cellets, sorted
    pub fn cellet_identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.cellets.read().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    fn require_cellet(&self, identifier: &str) -> Result<Arc<dyn Cellet>> {
        self.cellet(identifier)
            .ok_or_else(|| NucleusError::CelletNotFound(identifier.to_string()))
    }

    /// Send a primitive from `cellet` to `peer`
    ///
    /// A bound dialect goes through its factory's talk hooks.
    pub fn talk(&self, cellet: &str, peer: &str, mut primitive: Primitive) -> Result<()> {
        self.require_cellet(cellet)?;
        primitive.set_owner_tag(peer);

        if let Some(dialect) = primitive.dialect() {
            if !self.dialects.do_talk(cellet, dialect) {
                tracing::info!(cellet, peer, dialect = %dialect.name(), "talk vetoed");
                return Err(NucleusError::Vetoed {
                    dialect: dialect.name().to_string(),
                });
            }
        }

        let payload = PrimitiveSerializer::serialize(&primitive);
        self.transport
            .transmit(peer, payload)
            .map_err(NucleusError::Transport)?;

        if let Some(dialect) = primitive.dialect() {
            self.dialects.did_talk(cellet, dialect);
        }
        Ok(())
    }

    /// Translate a dialect and send it from `cellet` to `peer`
    pub fn talk_dialect(&self, cellet: &str, peer: &str, dialect: impl Into<AnyDialect>) -> Result<()> {
        let mut dialect = dialect.into();
        dialect.meta_mut().set_cellet_identifier(cellet);
        dialect.set_owner_tag(peer);

        let primitive = dialect
            .translate()
            .ok_or_else(|| NucleusError::Untranslatable(dialect.name().to_string()))?;
        self.talk(cellet, peer, primitive)
    }

    /// Deliver inbound bytes from `peer` to `cellet`
    ///
    /// A primitive whose dialect is vetoed by its factory is dropped without
    /// an error.
    pub fn on_primitive_arrived(&self, cellet: &str, peer: &str, raw: &[u8]) -> Result<()> {
        let target = self.require_cellet(cellet)?;
        let mut primitive = self.serializer().deserialize(raw, Some(peer))?;

        let dialect = match primitive.dialect_mut() {
            Some(dialect) => {
                dialect.meta_mut().set_cellet_identifier(cellet);
                let dialect = dialect.clone();
                if !self.dialects.do_dialogue(cellet, &dialect) {
                    tracing::debug!(cellet, peer, dialect = %dialect.name(), "dialogue vetoed");
                    return Ok(());
                }
                Some(dialect)
            }
            None => None,
        };

        target.dialogue(peer, primitive);

        if let Some(dialect) = dialect {
            self.dialects.did_dialogue(cellet, &dialect);
        }
        Ok(())
    }

    /// A peer connected; every cellet is told
    pub fn contacted(&self, peer: &str) {
        let cellets: Vec<_> = self.cellets.read().values().cloned().collect();
        tracing::debug!(peer, cellets = cellets.len(), "peer contacted");
        for cellet in cellets {
            cellet.contacted(peer);
        }
    }

    /// A peer disconnected; every cellet is told
    pub fn quitted(&self, peer: &str) {
        let cellets: Vec<_> = self.cellets.read().values().cloned().collect();
        tracing::debug!(peer, cellets = cellets.len(), "peer quitted");
        for cellet in cellets {
            cellet.quitted(peer);
        }
    }

    /// Shut down every dialect factory
    pub fn shutdown(&self) {
        tracing::info!(tag = %self.tag, "nucleus shutting down");
        self.dialects.shutdown_all();
    }
}
