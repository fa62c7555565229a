//! Hook pipelines -- ordered async filters over a single value.
//!
//! Each filter receives the previous filter's output. An absent or empty
//! pipeline returns the input unchanged. Filters are infallible: one that
//! cannot transform its input hands it back as-is.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::token::next_local_id;
use crate::transport::Link;

/// Hook run on every link before it is admitted.
pub const HOOK_ADD_CONNECTION: &str = "add-connection";

pub type HookFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type Filter<T> = Arc<dyn Fn(T) -> HookFuture<T> + Send + Sync>;

/// One filter. Clones share identity, so a clone can be used for removal.
pub struct Hook<T> {
    id: u64,
    filter: Filter<T>,
}

impl<T: Send + 'static> Hook<T> {
    pub fn new<F, Fut>(filter: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            id: next_local_id(),
            filter: Arc::new(move |value| -> HookFuture<T> { Box::pin(filter(value)) }),
        }
    }

    pub fn sync<F>(filter: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let filter = Arc::new(filter);
        Self::new(move |value| {
            let filter = filter.clone();
            async move { filter(value) }
        })
    }

    pub async fn apply(&self, value: T) -> T {
        (self.filter)(value).await
    }
}

impl<T> Clone for Hook<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            filter: self.filter.clone(),
        }
    }
}

impl<T> PartialEq for Hook<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({})", self.id)
    }
}

/// Thread `value` through `pipeline` in order.
pub async fn run<T: Send + 'static>(pipeline: Option<&[Hook<T>]>, value: T) -> T {
    let Some(pipeline) = pipeline else {
        return value;
    };
    let mut value = value;
    for hook in pipeline {
        value = hook.apply(value).await;
    }
    value
}

/// Hooks registered on a peer: the typed admission hook plus named
/// JSON-valued hooks for higher layers.
#[derive(Default)]
pub struct HookTable {
    add_connection: Vec<Hook<Link>>,
    named: HashMap<String, Vec<Hook<Value>>>,
}

impl HookTable {
    pub fn add_connection_hooks(&self) -> Vec<Hook<Link>> {
        self.add_connection.clone()
    }

    pub fn add_connection_hook(&mut self, hook: Hook<Link>) {
        self.add_connection.push(hook);
    }

    pub fn remove_connection_hook(&mut self, hook: &Hook<Link>) -> bool {
        let before = self.add_connection.len();
        self.add_connection.retain(|h| h != hook);
        self.add_connection.len() != before
    }

    pub fn named(&self, name: &str) -> Option<Vec<Hook<Value>>> {
        self.named.get(name).cloned()
    }

    pub fn add(&mut self, name: &str, hook: Hook<Value>) {
        self.named.entry(name.to_string()).or_default().push(hook);
    }

    /// Remove one hook; the entry goes away with its last hook.
    pub fn remove(&mut self, name: &str, hook: &Hook<Value>) -> bool {
        let Some(list) = self.named.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h != hook);
        let removed = list.len() != before;
        if list.is_empty() {
            self.named.remove(name);
        }
        removed
    }
}
