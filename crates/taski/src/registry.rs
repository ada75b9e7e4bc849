//! The task registry (§4.2): a map from `TaskTypeId` to its (possibly
//! freshly created) `TaskWrapper`.

use std::sync::Arc;

use dashmap::DashMap;

use crate::task::{Task, TaskTypeId};
use crate::wrapper::{AnyWrapper, TaskWrapper};

#[derive(Default)]
pub struct Registry {
    wrappers: DashMap<TaskTypeId, Arc<dyn AnyWrapper>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { wrappers: DashMap::new() }
    }

    /// Returns the wrapper for `T`, creating a fresh `Pending` one the first
    /// time it is asked for. The downcast here is the one and only place a
    /// wrapper's type erasure is undone for typed access.
    pub fn get_or_create<T: Task>(&self) -> Arc<TaskWrapper<T>> {
        let id = TaskTypeId::of::<T>();
        let any = self
            .wrappers
            .entry(id)
            .or_insert_with(|| Arc::new(TaskWrapper::<T>::new()))
            .clone();

        any.as_any_arc()
            .downcast::<TaskWrapper<T>>()
            .expect("TaskTypeId collision: registry entry has the wrong concrete type")
    }

    /// Inserts a `Pending` wrapper for every node the static analyzer found,
    /// without touching nodes already present (so the pre-registration pass
    /// never clobbers a wrapper that has already started).
    pub fn ensure(&self, id: TaskTypeId, spawn: fn() -> Arc<dyn AnyWrapper>) {
        self.wrappers.entry(id).or_insert_with(spawn);
    }

    pub fn get_erased(&self, id: TaskTypeId) -> Option<Arc<dyn AnyWrapper>> {
        self.wrappers.get(&id).map(|r| r.clone())
    }

    pub fn all(&self) -> Vec<Arc<dyn AnyWrapper>> {
        self.wrappers.iter().map(|r| r.clone()).collect()
    }
}
