//! Topic-keyed fan-out: many callbacks per topic plus wildcard subscribers. A
//! panicking callback is logged and skipped; its siblings still run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Wildcard topic name accepted by `From<&str>`.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Receives every item.
    Any,
    Named(String),
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        if name == WILDCARD {
            Topic::Any
        } else {
            Topic::Named(name.to_string())
        }
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::from(name.as_str())
    }
}

struct Registry<T> {
    next_id: u64,
    by_topic: HashMap<Topic, Vec<(u64, Callback<T>)>>,
}

/// Shared subscriber registry. Cloning yields another handle to the same registry.
pub struct Subscribers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                by_topic: HashMap::new(),
            })),
        }
    }

    /// Register `callback` for `topic`. Every registration is independent, even for
    /// the same topic.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = {
            let mut reg = self.registry.lock();
            reg.next_id += 1;
            let id = reg.next_id;
            reg.by_topic
                .entry(topic.clone())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                let mut reg = registry.lock();
                if let Some(list) = reg.by_topic.get_mut(&topic) {
                    list.retain(|(sid, _)| *sid != id);
                    if list.is_empty() {
                        reg.by_topic.remove(&topic);
                    }
                }
            }
        })
    }

    /// Deliver to subscribers of `topic`, then to wildcard subscribers. Returns how
    /// many callbacks ran to completion.
    pub fn dispatch(&self, topic: &str, item: &T) -> usize {
        let callbacks: Vec<Callback<T>> = {
            let reg = self.registry.lock();
            let named = reg
                .by_topic
                .get(&Topic::Named(topic.to_string()))
                .into_iter()
                .flatten();
            let any = reg.by_topic.get(&Topic::Any).into_iter().flatten();
            named.chain(any).map(|(_, cb)| cb.clone()).collect()
        };
        invoke_all(topic, &callbacks, item)
    }

    /// Deliver to every subscriber regardless of topic, in registration order.
    pub fn broadcast(&self, item: &T) -> usize {
        let callbacks: Vec<Callback<T>> = {
            let reg = self.registry.lock();
            let mut all: Vec<&(u64, Callback<T>)> = reg.by_topic.values().flatten().collect();
            all.sort_by_key(|(id, _)| *id);
            all.into_iter().map(|(_, cb)| cb.clone()).collect()
        };
        invoke_all(WILDCARD, &callbacks, item)
    }

    /// Drop every registration. Outstanding `Subscription`s become no-ops.
    pub fn clear(&self) {
        self.registry.lock().by_topic.clear();
    }

    pub fn len(&self) -> usize {
        self.registry.lock().by_topic.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invoke_all<T>(topic: &str, callbacks: &[Callback<T>], item: &T) -> usize {
    callbacks
        .iter()
        .filter(|cb| invoke_isolated(topic, &***cb, item))
        .count()
}

/// Run one callback, logging instead of propagating a panic. Returns whether it completed.
pub(crate) fn invoke_isolated<T: ?Sized>(
    topic: &str,
    callback: &(dyn Fn(&T) + Send + Sync),
    item: &T,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(item))) {
        Ok(()) => true,
        Err(panic) => {
            error!(topic = %topic, panic = %panic_message(&panic), "subscriber callback panicked");
            false
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by `subscribe`. `unsubscribe` removes exactly this registration
/// and may be called any number of times. Dropping the handle keeps the registration.
pub struct Subscription {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
