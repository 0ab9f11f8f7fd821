//! Lifecycle hooks.
//!
//! Hooks are multicast callbacks keyed by a fixed lifecycle enum. Emission
//! comes in two flavors: [`HookBus::emit`] spawns every callback and
//! returns, [`HookBus::emit_wait`] joins them all before returning. A
//! failing callback is logged and never disturbs the emitter or its
//! siblings.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{error, trace};

use solder_core::{Action, Event};

/// Bot lifecycle moments hooks can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotLife {
    /// All plugins are loaded.
    Loaded,
    /// The transport linked up for the first time.
    FirstConnected,
    /// The transport relinked after a drop.
    Reconnected,
    /// Shutdown is starting; dispatch still runs.
    BeforeClose,
    /// Everything is drained; the process is about to stop.
    BeforeStop,
    /// An inbound event was built, before dispatch.
    EventBuilt,
    /// An action is about to be written to the transport.
    ActionPresend,
    /// The bot is up and serving.
    Started,
    /// The bot resumed serving after a transport restart.
    Restarted,
}

/// The payload handed to a hook callback.
#[derive(Clone)]
pub enum HookArg {
    /// No payload.
    None,
    /// The event that was just built (`EventBuilt`).
    Event(Arc<Event>),
    /// The action about to be sent (`ActionPresend`).
    Action(Action),
}

/// A registered hook callback.
pub type HookFn = Arc<dyn Fn(HookArg) -> BoxFuture<'static, ()> + Send + Sync>;

/// The multicast hook registry.
#[derive(Default)]
pub struct HookBus {
    store: RwLock<HashMap<BotLife, Vec<HookFn>>>,
    tasks: TaskTracker,
}

impl HookBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for a lifecycle moment.
    pub fn register(&self, life: BotLife, hook: HookFn) {
        self.store.write().entry(life).or_default().push(hook);
    }

    /// Registers an async closure for a lifecycle moment.
    pub fn on<F, Fut>(&self, life: BotLife, hook: F)
    where
        F: Fn(HookArg) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.register(life, Arc::new(move |arg| Box::pin(hook(arg))));
    }

    fn hooks_for(&self, life: BotLife) -> Vec<HookFn> {
        self.store.read().get(&life).cloned().unwrap_or_default()
    }

    /// Fires a lifecycle moment; callbacks run concurrently as detached
    /// tasks.
    pub fn emit(&self, life: BotLife, arg: HookArg) {
        for hook in self.hooks_for(life) {
            let arg = arg.clone();
            self.tasks.spawn(async move {
                hook(arg).await;
            });
        }
        trace!(?life, "hook emitted");
    }

    /// Fires a lifecycle moment and joins every callback before returning.
    /// A panicking callback is logged and skipped.
    pub async fn emit_wait(&self, life: BotLife, arg: HookArg) {
        let hooks = self.hooks_for(life);
        let mut joins = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let arg = arg.clone();
            joins.push(self.tasks.spawn(async move {
                hook(arg).await;
            }));
        }
        for join in joins {
            if let Err(err) = join.await {
                error!(?life, error = %err, "hook callback failed");
            }
        }
        trace!(?life, "hook emitted and joined");
    }

    /// Waits for all still-running detached hook callbacks.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_emit_wait_joins_all() {
        let bus = HookBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            bus.on(BotLife::Started, move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        bus.emit_wait(BotLife::Started, HookArg::None).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_hook_contained() {
        let bus = HookBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on(BotLife::Started, |_| async {
            panic!("misbehaving plugin");
        });
        {
            let counter = Arc::clone(&counter);
            bus.on(BotLife::Started, move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        bus.emit_wait(BotLife::Started, HookArg::None).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_detached() {
        let bus = HookBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            bus.on(BotLife::BeforeStop, move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        bus.emit(BotLife::BeforeStop, HookArg::None);
        bus.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
