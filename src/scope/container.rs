use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Unique identifier of one scope instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(uuid::Uuid);

impl ScopeId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Resource = Arc<dyn Any + Send + Sync>;

/// Container of per-session resources whose lifetime is bound to the
/// session being ACTIVE. Resources are keyed by type, one per type.
pub struct SessionScope {
    id: ScopeId,
    session_id: SessionId,
    created_at: DateTime<Utc>,
    resources: Mutex<HashMap<TypeId, Resource>>,
    closed: AtomicBool,
}

impl SessionScope {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            id: ScopeId::new_v4(),
            session_id,
            created_at: Utc::now(),
            resources: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Store a resource, replacing any previous one of the same type.
    /// Ignored once the scope is closed.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Option<Arc<T>> {
        if self.is_closed() {
            debug!("Scope {} is closed, dropping resource", self.id);
            return None;
        }
        let value = Arc::new(value);
        self.resources()
            .insert(TypeId::of::<T>(), value.clone());
        Some(value)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resources()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|resource| resource.downcast::<T>().ok())
    }

    /// Resolve a resource, creating it on first use
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if self.is_closed() {
            return None;
        }
        let mut resources = self.resources();
        let resource = resources
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()) as Resource)
            .clone();
        resource.downcast::<T>().ok()
    }

    pub fn resource_count(&self) -> usize {
        self.resources().len()
    }

    /// Drop every resource; later calls are no-ops
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = std::mem::take(&mut *self.resources());
        debug!(
            "Closed scope {} for session '{}', released {} resources",
            self.id,
            self.session_id,
            released.len()
        );
    }

    fn resources(&self) -> MutexGuard<'_, HashMap<TypeId, Resource>> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("created_at", &self.created_at)
            .field("resources", &self.resource_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
