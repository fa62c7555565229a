//! Procedure registry -- named handler pipelines invoked by RPC frames.
//!
//! Several handlers under one name run in registration order; each gets the
//! call argument and the previous handler's result (`null` for the first).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::token::next_local_id;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<Value, HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

type HandlerFn = Arc<dyn Fn(Value, Value) -> HandlerFuture + Send + Sync>;

/// A procedure handler. Clones share identity, so a clone removes the original.
#[derive(Clone)]
pub struct Handler {
    id: u64,
    func: HandlerFn,
}

impl Handler {
    /// Async handler taking `(data, previous)`.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            id: next_local_id(),
            func: Arc::new(move |data, previous| -> HandlerFuture {
                Box::pin(func(data, previous))
            }),
        }
    }

    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(Value, Value) -> HandlerResult + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(move |data, previous| {
            let func = func.clone();
            async move { func(data, previous) }
        })
    }

    pub async fn call(&self, data: Value, previous: Value) -> HandlerResult {
        (self.func)(data, previous).await
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.id)
    }
}

#[derive(Default)]
pub struct ProcedureTable {
    entries: HashMap<String, Vec<Handler>>,
}

impl ProcedureTable {
    pub fn add(&mut self, name: &str, handler: Handler) {
        self.entries.entry(name.to_string()).or_default().push(handler);
    }

    /// Remove one handler; the name goes away with its last handler.
    pub fn remove(&mut self, name: &str, handler: &Handler) -> bool {
        let Some(list) = self.entries.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h != handler);
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(name);
        }
        removed
    }

    pub fn pipeline(&self, name: &str) -> Option<Vec<Handler>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Run a pipeline over `data`. An unregistered name yields `null`; a failing
/// handler counts as having returned `null` and the pipeline continues.
pub async fn run_pipeline(name: String, pipeline: Option<Vec<Handler>>, data: Value) -> Value {
    let Some(handlers) = pipeline else {
        tracing::trace!(procedure = %name, "procedure: not registered");
        return Value::Null;
    };

    let mut result = Value::Null;
    for handler in handlers {
        result = match handler.call(data.clone(), result).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(procedure = %name, "procedure: handler failed: {e}");
                Value::Null
            }
        };
    }
    result
}
