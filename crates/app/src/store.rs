//! Reactive key-value store.
//!
//! Entries are created lazily on first write or subscription and never
//! removed. A write that changes the stored value notifies every callback
//! registered on the key, each as its own scheduled job, and publishes the
//! value on the key's broadcast channel. Writing an equal value is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};

use homehub_domain::error::{HubError, ValidationError};
use homehub_domain::id::CallbackId;

use crate::callback::{Callback, callback};
use crate::scheduler::Scheduler;
use crate::stream::lossy;

/// Default capacity of each key's broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    capacity: usize,
    entries: Mutex<HashMap<String, DataEntry>>,
}

struct DataEntry {
    value: Option<Value>,
    subscribers: Vec<(CallbackId, Callback<Value>)>,
    sender: broadcast::Sender<Value>,
}

impl DataEntry {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            value: None,
            subscribers: Vec::new(),
            sender,
        }
    }
}

/// Typed writer bound to one key.
#[derive(Clone)]
pub struct Setter {
    store: DataStore,
    key: String,
}

impl Setter {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize `value` and write it to the bound key.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Handler`] when `value` cannot be serialized.
    pub fn set<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool, HubError> {
        let value = serde_json::to_value(value).map_err(HubError::handler)?;
        Ok(self.store.update(&self.key, value))
    }
}

impl DataStore {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_capacity(scheduler, DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(scheduler: Scheduler, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler,
                capacity: capacity.max(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Write `value` under `key`.
    ///
    /// Returns `true` when the stored value changed and subscribers were
    /// notified. The first write to a key always notifies.
    pub fn update(&self, key: &str, value: Value) -> bool {
        let subscribers = {
            let mut entries = self.entries();
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| DataEntry::new(self.inner.capacity));
            if entry.value.as_ref() == Some(&value) {
                return false;
            }
            entry.value = Some(value.clone());
            // No receivers is fine, the value is still stored.
            let _ = entry.sender.send(value.clone());
            entry.subscribers.clone()
        };

        tracing::debug!(key, subscribers = subscribers.len(), "store entry updated");
        for (id, subscriber) in subscribers {
            if let Err(err) = self.inner.scheduler.submit(subscriber(value.clone())) {
                tracing::warn!(%err, key, callback = %id, "failed to schedule store callback");
            }
        }
        true
    }

    /// Current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::EntryNotFound`] if the key was never written.
    pub fn get(&self, key: &str) -> Result<Value, HubError> {
        self.entries()
            .get(key)
            .and_then(|entry| entry.value.clone())
            .ok_or_else(|| HubError::EntryNotFound(key.to_string()))
    }

    /// Current value of `key`, deserialized.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::EntryNotFound`] if the key was never written and
    /// [`ValidationError::WrongType`] if the value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, HubError> {
        let value = self.get(key)?;
        serde_json::from_value(value.clone()).map_err(|_| {
            ValidationError::WrongType {
                expected: std::any::type_name::<T>(),
                got: value.to_string(),
            }
            .into()
        })
    }

    /// Keys of every entry that holds a value.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.value.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Values written to `key` from now on.
    pub fn subscribe(&self, key: &str) -> impl Stream<Item = Value> + Send + use<> {
        let rx = self.entry_sender(key).subscribe();
        lossy(rx, "store")
    }

    /// Like [`subscribe`](Self::subscribe), but yields the current value
    /// first when there is one.
    pub fn subscribe_with_current(&self, key: &str) -> impl Stream<Item = Value> + Send + use<> {
        let (current, rx) = {
            let mut entries = self.entries();
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| DataEntry::new(self.inner.capacity));
            (entry.value.clone(), entry.sender.subscribe())
        };
        tokio_stream::iter(current).chain(lossy(rx, "store"))
    }

    /// Invoke `cb` with every new value of `key`.
    ///
    /// With `call_on_init`, `cb` is also scheduled once right away with the
    /// current value, if the key holds one.
    pub fn register_callback(&self, key: &str, cb: Callback<Value>, call_on_init: bool) -> CallbackId {
        let id = CallbackId::new();
        let current = {
            let mut entries = self.entries();
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| DataEntry::new(self.inner.capacity));
            entry.subscribers.push((id, Arc::clone(&cb)));
            entry.value.clone()
        };

        if call_on_init
            && let Some(value) = current
            && let Err(err) = self.inner.scheduler.submit(cb(value))
        {
            tracing::warn!(%err, key, "failed to schedule initial store callback");
        }
        id
    }

    /// Like [`register_callback`](Self::register_callback), but `cb` only
    /// sees values for which `predicate` holds.
    pub fn register_conditional_callback<P>(
        &self,
        key: &str,
        predicate: P,
        cb: Callback<Value>,
        call_on_init: bool,
    ) -> CallbackId
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        let guarded = callback(move |value: Value| {
            let predicate = Arc::clone(&predicate);
            let cb = Arc::clone(&cb);
            async move {
                if predicate(&value) {
                    cb(value).await
                } else {
                    Ok(())
                }
            }
        });
        self.register_callback(key, guarded, call_on_init)
    }

    /// Remove a callback. Returns `false` when it was not registered.
    pub fn unregister_callback(&self, key: &str, id: CallbackId) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(registered, _)| *registered != id);
        entry.subscribers.len() != before
    }

    /// A typed writer for `key`.
    #[must_use]
    pub fn setter(&self, key: impl Into<String>) -> Setter {
        Setter {
            store: self.clone(),
            key: key.into(),
        }
    }

    fn entry_sender(&self, key: &str) -> broadcast::Sender<Value> {
        self.entries()
            .entry(key.to_string())
            .or_insert_with(|| DataEntry::new(self.inner.capacity))
            .sender
            .clone()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, DataEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
