//! Read-through entity resolution.
//!
//! Records are looked up in the cache under `{kind}:{id}`. A miss, a backend
//! error and an undecodable value are all answered by the store, after which
//! a background task warms the cache off the request path. Warming never
//! overwrites a value written after the store read.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{instrument, warn};

use crate::application::error::AppError;
use crate::application::repos::{DurableStore, RepoError};
use crate::cache::keys::record_key;
use crate::cache::{CacheBackend, CacheError, TaskKind, TaskQueue, cache_fallback};
use crate::domain::entities::{
    CommentRecord, ConversationRecord, Entity, MessageRecord, PostRecord, Record,
    UserProfileRecord,
};
use crate::domain::types::{EntityKey, EntityKind};

/// Serialize the record inside `entity` the way it is cached.
pub(crate) fn encode_entity(entity: &Entity) -> Result<String, serde_json::Error> {
    match entity {
        Entity::Message(record) => serde_json::to_string(record),
        Entity::Post(record) => serde_json::to_string(record),
        Entity::Comment(record) => serde_json::to_string(record),
        Entity::Conversation(record) => serde_json::to_string(record),
        Entity::UserProfile(record) => serde_json::to_string(record),
    }
}

/// Outcome of a cache read for one record.
enum Lookup<R> {
    Hit(R),
    Miss,
    /// The cached value did not decode; holds the raw value for repair.
    Corrupt(String),
}

/// Task that warms the cache with a store read of `entity`.
fn warm_task(entity: Entity, corrupt: Option<String>) -> TaskKind {
    match corrupt {
        Some(corrupt) => TaskKind::Repair { entity, corrupt },
        None => TaskKind::Populate(entity),
    }
}

pub struct Resolver {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn DurableStore>,
    tasks: Arc<TaskQueue>,
}

impl Resolver {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
        tasks: Arc<TaskQueue>,
    ) -> Self {
        Self {
            cache,
            store,
            tasks,
        }
    }

    /// Resolve one record, cache first.
    #[instrument(skip(self), fields(kind = R::KIND.as_str()))]
    pub async fn resolve<R: Record>(&self, id: i64) -> Result<R, AppError> {
        let kind = R::KIND.as_str();
        let key = EntityKey::new(R::KIND, id);

        let corrupt = match self.cached::<R>(&key).await {
            Lookup::Hit(record) => {
                counter!("chorus_cache_hit_total", "kind" => kind).increment(1);
                return Ok(record);
            }
            Lookup::Miss => None,
            Lookup::Corrupt(raw) => Some(raw),
        };
        counter!("chorus_cache_miss_total", "kind" => kind).increment(1);

        let entity = self
            .store
            .find_entity(key)
            .await
            .map_err(|err| AppError::from_repo(kind, err))?
            .ok_or_else(|| AppError::not_found(kind))?;
        let record = R::from_entity(entity.clone()).ok_or_else(|| {
            AppError::from_repo(
                kind,
                RepoError::integrity(format!("store returned a different kind for {key}")),
            )
        })?;

        self.tasks.submit(warm_task(entity, corrupt));
        Ok(record)
    }

    /// Resolve any entity by key.
    pub async fn resolve_entity(&self, key: EntityKey) -> Result<Entity, AppError> {
        Ok(match key.kind {
            EntityKind::Message => self.resolve::<MessageRecord>(key.id).await?.into_entity(),
            EntityKind::Post => self.resolve::<PostRecord>(key.id).await?.into_entity(),
            EntityKind::Comment => self.resolve::<CommentRecord>(key.id).await?.into_entity(),
            EntityKind::Conversation => {
                self.resolve::<ConversationRecord>(key.id).await?.into_entity()
            }
            EntityKind::UserProfile => {
                self.resolve::<UserProfileRecord>(key.id).await?.into_entity()
            }
        })
    }

    /// Resolve a batch, preserving the order of `ids`.
    ///
    /// Members that cannot be resolved are omitted. If the store fails while
    /// some members were already served from the cache, the partial result is
    /// returned; if nothing could be resolved the store error is returned.
    #[instrument(skip(self, ids), fields(kind = R::KIND.as_str(), requested = ids.len()))]
    pub async fn resolve_many<R: Record>(&self, ids: &[i64]) -> Result<Vec<R>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let kind = R::KIND.as_str();
        let keys: Vec<String> = ids
            .iter()
            .map(|id| record_key(&EntityKey::new(R::KIND, *id)))
            .collect();

        let cached = match self.cache.get_many(&keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                cache_fallback(
                    "get_many",
                    &CacheError::Codec(format!(
                        "expected {} values, got {}",
                        keys.len(),
                        values.len()
                    )),
                );
                vec![None; keys.len()]
            }
            Err(err) => {
                cache_fallback("get_many", &err);
                vec![None; keys.len()]
            }
        };

        let mut found: HashMap<i64, R> = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        let mut corrupt: HashMap<i64, String> = HashMap::new();
        for (id, raw) in ids.iter().zip(cached) {
            let Some(raw) = raw else {
                missing.push(*id);
                continue;
            };
            match serde_json::from_str::<R>(&raw) {
                Ok(record) => {
                    found.insert(*id, record);
                }
                Err(err) => {
                    cache_fallback("decode", &CacheError::codec(err));
                    missing.push(*id);
                    corrupt.insert(*id, raw);
                }
            }
        }
        counter!("chorus_cache_hit_total", "kind" => kind).increment(found.len() as u64);

        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            counter!("chorus_cache_miss_total", "kind" => kind).increment(missing.len() as u64);
            match self.store.find_entities(R::KIND, &missing).await {
                Ok(entities) => {
                    let mut populate = Vec::with_capacity(entities.len());
                    for entity in entities {
                        if let Some(record) = R::from_entity(entity.clone()) {
                            let id = record.id();
                            found.insert(id, record);
                            match corrupt.remove(&id) {
                                Some(raw) => {
                                    self.tasks.submit(warm_task(entity, Some(raw)));
                                }
                                None => populate.push(entity),
                            }
                        }
                    }
                    if !populate.is_empty() {
                        self.tasks.submit(TaskKind::PopulateMany(populate));
                    }
                }
                Err(err) if found.is_empty() => return Err(AppError::from_repo(kind, err)),
                Err(err) => {
                    warn!(
                        kind,
                        unresolved = missing.len(),
                        error = %err,
                        "Store failed during batch resolve; returning cached members only"
                    );
                }
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Resolve profiles, substituting a placeholder for any that cannot be found.
    pub async fn resolve_profiles(&self, ids: &[i64]) -> Result<Vec<UserProfileRecord>, AppError> {
        let resolved = self.resolve_many::<UserProfileRecord>(ids).await?;
        let by_id: HashMap<i64, UserProfileRecord> = resolved
            .into_iter()
            .map(|profile| (profile.id, profile))
            .collect();
        Ok(ids
            .iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| UserProfileRecord::placeholder(*id))
            })
            .collect())
    }

    /// Profiles of everyone in a conversation.
    pub async fn participants(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<UserProfileRecord>, AppError> {
        let conversation = self.resolve::<ConversationRecord>(conversation_id).await?;
        self.resolve_profiles(&conversation.participant_ids()).await
    }

    async fn cached<R: Record>(&self, key: &EntityKey) -> Lookup<R> {
        match self.cache.get(&record_key(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Lookup::Hit(record),
                Err(err) => {
                    cache_fallback("decode", &CacheError::codec(err));
                    Lookup::Corrupt(raw)
                }
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                cache_fallback("get", &err);
                Lookup::Miss
            }
        }
    }
}
