// src/core/cache/store.rs

use super::object::{BackendObject, ObjectType};
use crate::core::GatewireError;
use crate::core::metrics;
use crate::core::protocol::{WireMessage, tags};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// An immutable snapshot of one type's objects, keyed by id in first-seen
/// order.
pub type Collection = Arc<IndexMap<String, BackendObject>>;

/// The in-memory mirror of backend-managed objects.
///
/// Each type's collection is copy-on-write: an update decodes the whole batch
/// first, builds the next collection off to the side and swaps it in under the
/// write lock. Readers clone the `Arc` of the current collection and therefore
/// never observe a half-applied batch. Nothing is evicted on a schedule.
#[derive(Debug, Default)]
pub struct ObjectCache {
    collections: RwLock<BTreeMap<ObjectType, Collection>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Default::default()
    }

    /// Decodes each wire-encoded object and upserts it into `object_type`'s
    /// collection. If any object fails to decode the whole batch is rejected
    /// with `CacheUpdateError` and the collection is left untouched. Returns
    /// the number of objects applied.
    pub fn update<I, B>(&self, objects: I, object_type: &ObjectType) -> Result<usize, GatewireError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let decoded = objects
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                BackendObject::decode(object_type, raw.as_ref()).map_err(|e| index_error(i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.apply(object_type, decoded))
    }

    /// Like `update`, for objects that arrived as already parsed messages.
    pub fn update_messages(
        &self,
        messages: Vec<WireMessage>,
        object_type: &ObjectType,
    ) -> Result<usize, GatewireError> {
        let decoded = messages
            .into_iter()
            .enumerate()
            .map(|(i, msg)| BackendObject::from_message(object_type, msg).map_err(|e| index_error(i, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.apply(object_type, decoded))
    }

    /// Routes a full-object payload (a message carrying `OT`) into the cache.
    /// Returns `false` for messages that are not object payloads.
    pub fn ingest_reply(&self, message: &WireMessage) -> Result<bool, GatewireError> {
        let Some(object_type) = message.get(tags::OBJECT_TYPE) else {
            return Ok(false);
        };
        let object_type = ObjectType::new(object_type);
        self.update_messages(vec![message.clone()], &object_type)?;
        Ok(true)
    }

    fn apply(&self, object_type: &ObjectType, decoded: Vec<BackendObject>) -> usize {
        let count = decoded.len();
        let mut collections = self.collections.write();
        let mut next = collections
            .get(object_type)
            .map(|current| (**current).clone())
            .unwrap_or_default();
        let before = next.len();
        for object in decoded {
            next.insert(object.id().to_string(), object);
        }
        let added = next.len() - before;
        collections.insert(object_type.clone(), Arc::new(next));
        drop(collections);

        metrics::CACHED_OBJECTS.add(added as f64);
        debug!(
            "Cache update for {}: {} objects applied, {} new.",
            object_type, count, added
        );
        count
    }

    /// The number of cached objects of `object_type`.
    pub fn size(&self, object_type: &ObjectType) -> usize {
        self.collections
            .read()
            .get(object_type)
            .map_or(0, |c| c.len())
    }

    /// A consistent snapshot of `object_type`'s objects.
    pub fn snapshot(&self, object_type: &ObjectType) -> Collection {
        self.collections
            .read()
            .get(object_type)
            .cloned()
            .unwrap_or_default()
    }

    /// The objects of `object_type`, in first-seen order.
    pub fn get_objects(&self, object_type: &ObjectType) -> Vec<BackendObject> {
        self.snapshot(object_type).values().cloned().collect()
    }

    pub fn get(&self, object_type: &ObjectType, id: &str) -> Option<BackendObject> {
        self.snapshot(object_type).get(id).cloned()
    }

    /// Every known type.
    pub fn types(&self) -> Vec<ObjectType> {
        self.collections.read().keys().cloned().collect()
    }

    /// The union of all types' objects, ordered by type name. All types are
    /// read from the same instant.
    pub fn get_full_snapshot(&self) -> Vec<BackendObject> {
        let collections: Vec<Collection> = self.collections.read().values().cloned().collect();
        collections
            .iter()
            .flat_map(|c| c.values().cloned())
            .collect()
    }

    /// Drops every object of `object_type`, e.g. before a full refresh.
    /// Returns the number removed.
    pub fn clear_type(&self, object_type: &ObjectType) -> usize {
        let removed = self
            .collections
            .write()
            .remove(object_type)
            .map_or(0, |c| c.len());
        metrics::CACHED_OBJECTS.sub(removed as f64);
        removed
    }
}

fn index_error(index: usize, error: GatewireError) -> GatewireError {
    match error {
        GatewireError::CacheUpdateError {
            object_type,
            reason,
        } => GatewireError::CacheUpdateError {
            object_type,
            reason: format!("object #{index}: {reason}"),
        },
        other => other,
    }
}
