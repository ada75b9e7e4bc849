//! The `Task` trait and the compile-time-derived descriptor table that
//! backs static dependency analysis (C1) and type-erased dispatch (C2).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::wrapper::AnyWrapper;

/// An opaque, comparable identifier for a task class — the Rust analogue of
/// spec.md's `TaskClass`. Carries the type's name purely for diagnostics;
/// equality and hashing are defined on the underlying `TypeId` alone.
#[derive(Clone, Copy)]
pub struct TaskTypeId {
    type_id: TypeId,
    name: &'static str,
}

impl TaskTypeId {
    pub fn of<T: 'static>() -> Self {
        TaskTypeId {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TaskTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TaskTypeId {}

impl std::hash::Hash for TaskTypeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TaskTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TaskTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A unit of work. Implementors derive their static dependency edges by
/// writing `#[taski::task]` above the `impl` block; the macro scans `run`
/// (and same-impl helper methods it calls) for `ctx.value::<Dep>()` call
/// sites and fills in `static_dependencies` accordingly.
pub trait Task: Default + Send + Sync + fmt::Debug + 'static {
    /// The single value this task exports once it completes. A task
    /// needing several logically distinct results groups them in a struct
    /// — one strongly typed `Output` is preferred here over a string-keyed
    /// attribute bag.
    type Output: Send + Sync + fmt::Debug + 'static;

    /// Run this task to completion, or fail.
    async fn run(&mut self, ctx: &TaskContext) -> Result<Self::Output, TaskError>;

    /// Undo whatever `run` did, in the clean phase. No-op by default.
    async fn clean(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Overridden by `#[taski::task]`; empty means "no statically
    /// discoverable dependency," not "definitely no dependency" — a task
    /// may still acquire runtime-discovered dependencies via `TaskContext`.
    fn static_dependencies() -> &'static [TaskTypeId] {
        &[]
    }
}

/// A type-erased entry in the global task registry, one per `#[taski::task]`
/// impl in the program. Mirrors the teacher's `TaskMarker`/`mark_task!`
/// registration idiom, minus the serialize/deserialize function pointers —
/// this system has no persistence layer to serialize a task for.
pub struct TaskDescriptor {
    pub id: fn() -> TaskTypeId,
    pub dependencies: fn() -> &'static [TaskTypeId],
    pub spawn_wrapper: fn() -> Arc<dyn AnyWrapper>,
    pub clean: fn(Arc<crate::context::ExecutionContext>) -> CleanFuture,
}

/// The boxed future returned by a task's type-erased clean dispatch —
/// the clean-phase analogue of `spawn_wrapper` as an erasure boundary.
pub type CleanFuture = futures::future::BoxFuture<'static, Result<(), TaskError>>;

inventory::collect!(TaskDescriptor);

fn descriptor_table() -> &'static HashMap<TypeId, &'static TaskDescriptor> {
    static TABLE: OnceLock<HashMap<TypeId, &'static TaskDescriptor>> = OnceLock::new();
    TABLE.get_or_init(|| {
        inventory::iter::<TaskDescriptor>()
            .map(|d| (((d.id)()).type_id, d))
            .collect()
    })
}

/// Looks up the descriptor for a task class that was registered with
/// `#[taski::task]`. Returns `None` for a type that exists but was never
/// annotated — the caller turns that into a `TaskError`/panic with a
/// message naming the missing registration.
pub fn descriptor_of(id: TaskTypeId) -> Option<&'static TaskDescriptor> {
    descriptor_table().get(&id.type_id).copied()
}
