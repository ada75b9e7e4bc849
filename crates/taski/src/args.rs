//! The frozen key/value bag passed into an execution (§6.1).

use std::collections::HashMap;

use serde_json::Value;

/// Reserved key carrying the worker count out-of-band of the generic
/// accessors — see `ExecutorOptions` for why this is a typed field on the
/// Rust API instead of a magic string the caller has to know to avoid.
pub(crate) const WORKERS_KEY: &str = "_workers";

/// An immutable `name -> JSON value` bag threaded through a whole
/// execution. Built once via `Args::new`/`From<HashMap<..>>` and never
/// mutated afterward.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: HashMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Args { values: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == WORKERS_KEY {
            return None;
        }
        self.values.get(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        key != WORKERS_KEY && self.values.contains_key(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.has(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }
}

impl From<HashMap<String, Value>> for Args {
    fn from(values: HashMap<String, Value>) -> Self {
        Args { values }
    }
}

impl FromIterator<(String, Value)> for Args {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Args { values: iter.into_iter().collect() }
    }
}
