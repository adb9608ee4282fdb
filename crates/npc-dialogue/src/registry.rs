use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::error::DialogueError;
use crate::models::{ActorRef, ParticipantId};

/// Maps transient actor handles to stable participant ids
pub trait ParticipantRegistry: Send + Sync {
    fn resolve(&self, actor: ActorRef) -> Result<ParticipantId, DialogueError>;
}

/// Registers actors on first sight and hands out sequential ids from 1
pub struct InMemoryRegistry {
    ids: DashMap<ActorRef, ParticipantId>,
    next: AtomicU32,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            ids: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantRegistry for InMemoryRegistry {
    fn resolve(&self, actor: ActorRef) -> Result<ParticipantId, DialogueError> {
        if !actor.is_valid() {
            return Err(DialogueError::InvalidActor(actor));
        }

        // entry() holds the shard lock, so two threads never mint two ids for one actor
        let id = *self.ids.entry(actor).or_insert_with(|| {
            let id = ParticipantId(self.next.fetch_add(1, Ordering::Relaxed));
            debug!("Registered actor {:?} as participant {}", actor, id);
            id
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_stable() {
        let registry = InMemoryRegistry::new();
        let a = registry.resolve(ActorRef(42)).unwrap();
        let b = registry.resolve(ActorRef(77)).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.resolve(ActorRef(42)).unwrap(), a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_actor_rejected() {
        let registry = InMemoryRegistry::new();
        let err = registry.resolve(ActorRef(0)).unwrap_err();
        assert!(matches!(err, DialogueError::InvalidActor(ActorRef(0))));
        assert!(registry.is_empty());
    }
}
