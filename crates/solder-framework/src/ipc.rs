//! Cross-plugin IPC: named signals and shared objects.
//!
//! Signals form a `(namespace, signal)` → handler map with at most one
//! handler per channel; a second registration is refused at plugin-load
//! time. Shared objects expose a value getter plus an optional mutator
//! callback; at most one mutator may ever be bound, and invoking it waits
//! until the binding exists.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::error::{IpcError, IpcResult};
use crate::signal::Signal;

/// An async callback taking and returning a JSON payload.
pub type IpcFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// A shared-object value getter.
pub type ReflectFn = Arc<dyn Fn() -> Value + Send + Sync>;

// ============================================================================
// Signal bus
// ============================================================================

/// The named-signal bus.
#[derive(Default)]
pub struct PluginBus {
    store: RwLock<HashMap<String, HashMap<String, IpcFn>>>,
}

impl PluginBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `(namespace, signal)`.
    ///
    /// # Errors
    ///
    /// [`IpcError::DuplicateSignal`] when the channel already has one.
    pub fn register(
        &self,
        namespace: impl Into<String>,
        signal: impl Into<String>,
        handler: IpcFn,
    ) -> IpcResult<()> {
        let (namespace, signal) = (namespace.into(), signal.into());
        let mut store = self.store.write();
        let space = store.entry(namespace.clone()).or_default();
        if space.contains_key(&signal) {
            return Err(IpcError::DuplicateSignal { namespace, signal });
        }
        trace!(%namespace, %signal, "signal handler registered");
        space.insert(signal, handler);
        Ok(())
    }

    /// Registers an async closure as the handler for `(namespace, signal)`.
    pub fn on<F, Fut>(
        &self,
        namespace: impl Into<String>,
        signal: impl Into<String>,
        handler: F,
    ) -> IpcResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Value> + Send + 'static,
    {
        self.register(
            namespace,
            signal,
            Arc::new(move |payload| Box::pin(handler(payload))),
        )
    }

    fn handler(&self, namespace: &str, signal: &str) -> IpcResult<Option<IpcFn>> {
        let store = self.store.read();
        let space = store
            .get(namespace)
            .ok_or_else(|| IpcError::UnknownNamespace(namespace.to_string()))?;
        Ok(space.get(signal).cloned())
    }

    /// Emits a signal and waits for the handler's result.
    ///
    /// Returns `Ok(None)` when the namespace exists but nobody handles this
    /// signal name; an unknown namespace is an error.
    pub async fn emit_wait(
        &self,
        namespace: &str,
        signal: &str,
        payload: Value,
    ) -> IpcResult<Option<Value>> {
        match self.handler(namespace, signal)? {
            Some(handler) => Ok(Some(handler(payload).await)),
            None => Ok(None),
        }
    }

    /// Emits a signal without waiting for the handler.
    pub fn emit(&self, namespace: &str, signal: &str, payload: Value) -> IpcResult<()> {
        if let Some(handler) = self.handler(namespace, signal)? {
            tokio::spawn(async move {
                handler(payload).await;
            });
        }
        Ok(())
    }
}

// ============================================================================
// Shared objects
// ============================================================================

/// A value shared by one plugin with the rest of the bot.
pub struct ShareObject {
    namespace: String,
    id: String,
    reflect: RwLock<Option<ReflectFn>>,
    mutator: RwLock<Option<IpcFn>>,
    mutator_set: Signal,
}

impl ShareObject {
    fn new(namespace: String, id: String) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            id,
            reflect: RwLock::new(None),
            mutator: RwLock::new(None),
            mutator_set: Signal::new(false),
        })
    }

    /// The shared object's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The shared object's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads the current value. Unbound getters reflect to `Null`.
    pub fn val(&self) -> Value {
        match self.reflect.read().as_ref() {
            Some(reflect) => reflect(),
            None => Value::Null,
        }
    }

    /// Invokes the mutator, waiting until one is bound.
    ///
    /// An object that never receives a mutator waits forever, so callers
    /// uncertain about the declaring plugin should wrap this in a timeout.
    pub async fn affect(&self, payload: Value) -> Value {
        self.mutator_set.wait().await;
        let mutator = self
            .mutator
            .read()
            .clone()
            .expect("mutator_set implies a bound mutator");
        mutator(payload).await
    }
}

/// The shared-object store.
#[derive(Default)]
pub struct PluginStore {
    store: RwLock<HashMap<(String, String), Arc<ShareObject>>>,
}

impl PluginStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, namespace: &str, id: &str) -> Arc<ShareObject> {
        let key = (namespace.to_string(), id.to_string());
        if let Some(found) = self.store.read().get(&key) {
            return Arc::clone(found);
        }
        let mut store = self.store.write();
        Arc::clone(
            store
                .entry(key)
                .or_insert_with(|| ShareObject::new(namespace.to_string(), id.to_string())),
        )
    }

    /// Declares a shared object, binding its value getter.
    pub fn create(&self, namespace: &str, id: &str, reflect: ReflectFn) -> Arc<ShareObject> {
        let obj = self.entry(namespace, id);
        *obj.reflect.write() = Some(reflect);
        obj
    }

    /// Binds the mutator of a shared object.
    ///
    /// # Errors
    ///
    /// [`IpcError::MutatorRebound`] when one is already bound — only the
    /// declaring plugin gets to install it, exactly once.
    pub fn bind_mutator(&self, namespace: &str, id: &str, mutator: IpcFn) -> IpcResult<()> {
        let obj = self.entry(namespace, id);
        let mut slot = obj.mutator.write();
        if slot.is_some() {
            return Err(IpcError::MutatorRebound {
                namespace: namespace.to_string(),
                id: id.to_string(),
            });
        }
        *slot = Some(mutator);
        obj.mutator_set.set();
        Ok(())
    }

    /// Fetches (or lazily creates) a shared object.
    ///
    /// An object fetched before its declaring plugin loads reflects `Null`
    /// until the declaration arrives.
    pub fn get(&self, namespace: &str, id: &str) -> Arc<ShareObject> {
        self.entry(namespace, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_signal_round_trip() {
        let bus = PluginBus::new();
        bus.on("calc", "add", |payload: Value| async move {
            let a = payload["a"].as_i64().unwrap_or(0);
            let b = payload["b"].as_i64().unwrap_or(0);
            json!(a + b)
        })
        .unwrap();

        let res = bus
            .emit_wait("calc", "add", json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(res, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_duplicate_signal_refused() {
        let bus = PluginBus::new();
        bus.on("ns", "sig", |_| async { Value::Null }).unwrap();
        let err = bus.on("ns", "sig", |_| async { Value::Null }).unwrap_err();
        assert!(matches!(err, IpcError::DuplicateSignal { .. }));
    }

    #[tokio::test]
    async fn test_unknown_namespace_errors_unknown_signal_is_none() {
        let bus = PluginBus::new();
        bus.on("ns", "sig", |_| async { Value::Null }).unwrap();

        assert!(matches!(
            bus.emit_wait("ghost", "sig", Value::Null).await,
            Err(IpcError::UnknownNamespace(_))
        ));
        assert_eq!(bus.emit_wait("ns", "other", Value::Null).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_share_object_value_and_mutator() {
        let store = PluginStore::new();
        let state = Arc::new(parking_lot::Mutex::new(7i64));

        {
            let state = Arc::clone(&state);
            store.create("plug", "counter", Arc::new(move || json!(*state.lock())));
        }
        {
            let state = Arc::clone(&state);
            store
                .bind_mutator(
                    "plug",
                    "counter",
                    Arc::new(move |payload| {
                        let state = Arc::clone(&state);
                        Box::pin(async move {
                            *state.lock() += payload.as_i64().unwrap_or(0);
                            json!(*state.lock())
                        })
                    }),
                )
                .unwrap();
        }

        let obj = store.get("plug", "counter");
        assert_eq!(obj.val(), json!(7));
        assert_eq!(obj.affect(json!(3)).await, json!(10));
        assert_eq!(obj.val(), json!(10));
    }

    #[tokio::test]
    async fn test_mutator_rebind_refused() {
        let store = PluginStore::new();
        store
            .bind_mutator("a", "b", Arc::new(|_| Box::pin(async { Value::Null })))
            .unwrap();
        assert!(matches!(
            store.bind_mutator("a", "b", Arc::new(|_| Box::pin(async { Value::Null }))),
            Err(IpcError::MutatorRebound { .. })
        ));
    }

    #[tokio::test]
    async fn test_undeclared_share_reflects_null() {
        let store = PluginStore::new();
        assert_eq!(store.get("ghost", "obj").val(), Value::Null);
    }
}
