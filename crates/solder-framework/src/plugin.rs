//! Plugin descriptors.
//!
//! A plugin bundles what one unit of user code contributes to the bot:
//! handlers, lifecycle hooks, signal handlers, and shared objects. The
//! supervisor loads plugins at startup; registration failures (duplicate
//! signal channels, rebound mutators) surface at load time, before any
//! event flows.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::context::BotServices;
use crate::dispatcher::Dispatcher;
use crate::error::IpcResult;
use crate::handler::Handler;
use crate::hook::{BotLife, HookArg, HookFn};
use crate::ipc::{IpcFn, ReflectFn};

/// One loadable unit of bot behavior.
pub struct Plugin {
    name: String,
    version: String,
    handlers: Vec<Handler>,
    hooks: Vec<(BotLife, HookFn)>,
    signals: Vec<(String, String, IpcFn)>,
    shares: Vec<(String, String, ReflectFn)>,
    mutators: Vec<(String, String, IpcFn)>,
}

impl Plugin {
    /// Starts building a plugin.
    pub fn builder(name: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                name: name.into(),
                version: "0.1.0".to_string(),
                handlers: Vec::new(),
                hooks: Vec::new(),
                signals: Vec::new(),
                shares: Vec::new(),
                mutators: Vec::new(),
            },
        }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The plugin's version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Registers everything this plugin declares.
    ///
    /// # Errors
    ///
    /// Fails on duplicate signal channels or rebound mutators; partial
    /// registrations from the failing plugin are not rolled back, so a
    /// failed load should abort startup.
    pub fn load(self, dispatcher: &Dispatcher, services: &Arc<BotServices>) -> IpcResult<()> {
        let name = self.name.clone();
        for handler in self.handlers {
            dispatcher.register(handler);
        }
        for (life, hook) in self.hooks {
            services.hooks.register(life, hook);
        }
        for (namespace, signal, handler) in self.signals {
            services.signals.register(namespace, signal, handler)?;
        }
        for (namespace, id, reflect) in self.shares {
            services.shares.create(&namespace, &id, reflect);
        }
        for (namespace, id, mutator) in self.mutators {
            services.shares.bind_mutator(&namespace, &id, mutator)?;
        }
        info!(plugin = %name, "plugin loaded");
        Ok(())
    }
}

/// Builds a [`Plugin`].
pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    /// Sets the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.plugin.version = version.into();
        self
    }

    /// Adds a handler.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.plugin.handlers.push(handler);
        self
    }

    /// Adds a lifecycle hook.
    pub fn on_hook<F, Fut>(mut self, life: BotLife, hook: F) -> Self
    where
        F: Fn(HookArg) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.plugin
            .hooks
            .push((life, Arc::new(move |arg| Box::pin(hook(arg)))));
        self
    }

    /// Adds a signal handler for `(namespace, signal)`.
    pub fn on_signal<F, Fut>(
        mut self,
        namespace: impl Into<String>,
        signal: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Value> + Send + 'static,
    {
        self.plugin.signals.push((
            namespace.into(),
            signal.into(),
            Arc::new(move |payload| Box::pin(handler(payload))),
        ));
        self
    }

    /// Declares a shared object with its value getter.
    pub fn share<F>(mut self, namespace: impl Into<String>, id: impl Into<String>, reflect: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.plugin
            .shares
            .push((namespace.into(), id.into(), Arc::new(reflect)));
        self
    }

    /// Binds the mutator of a shared object this plugin declares.
    pub fn mutator<F, Fut>(
        mut self,
        namespace: impl Into<String>,
        id: impl Into<String>,
        mutator: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Value> + Send + 'static,
    {
        self.plugin.mutators.push((
            namespace.into(),
            id.into(),
            Arc::new(move |payload| Box::pin(mutator(payload))),
        ));
        self
    }

    /// Finishes the plugin.
    pub fn build(self) -> Plugin {
        self.plugin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::Responder;
    use serde_json::json;

    fn setup() -> (Dispatcher, Arc<BotServices>) {
        let (responder, rx) = Responder::channel();
        std::mem::forget(rx);
        let services = BotServices::new(responder);
        (Dispatcher::new(Arc::clone(&services)), services)
    }

    #[tokio::test]
    async fn test_plugin_load_registers_everything() {
        let (dispatcher, services) = setup();
        let plugin = Plugin::builder("greeter")
            .version("1.2.0")
            .handler(
                Handler::on_message()
                    .executor(|_| async {})
                    .build()
                    .unwrap(),
            )
            .on_hook(BotLife::Started, |_| async {})
            .on_signal("greeter", "hello", |_| async { json!("hi") })
            .share("greeter", "count", || json!(0))
            .build();

        plugin.load(&dispatcher, &services).unwrap();
        assert_eq!(
            dispatcher.handler_count(solder_core::EventType::Message),
            1
        );
        assert_eq!(
            services
                .signals
                .emit_wait("greeter", "hello", json!(null))
                .await
                .unwrap(),
            Some(json!("hi"))
        );
        assert_eq!(services.shares.get("greeter", "count").val(), json!(0));
    }

    #[tokio::test]
    async fn test_duplicate_signal_across_plugins_fails_load() {
        let (dispatcher, services) = setup();
        Plugin::builder("a")
            .on_signal("ns", "sig", |_| async { json!(null) })
            .build()
            .load(&dispatcher, &services)
            .unwrap();

        let res = Plugin::builder("b")
            .on_signal("ns", "sig", |_| async { json!(null) })
            .build()
            .load(&dispatcher, &services);
        assert!(res.is_err());
    }
}
