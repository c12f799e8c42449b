//! Observer and extension plugins.
//!
//! Plugins are registered once, before the client is built, through
//! [`PluginRegistry::builder`]. Every callback runs on the plugin executor,
//! never on an I/O thread, and a panicking plugin cannot disturb the client.
//!
//! # Example
//!
//! ```
//! use knx_link::plugin::{ObserverPlugin, PluginRegistry};
//! use knx_link::protocol::Body;
//!
//! #[derive(Debug)]
//! struct Printer;
//!
//! impl ObserverPlugin for Printer {
//!     fn on_incoming_body(&self, body: &Body) {
//!         println!("<- {:?}", body.service_type());
//!     }
//! }
//!
//! let plugins = PluginRegistry::builder().observer(Printer).build();
//! assert_eq!(plugins.observer_count(), 1);
//! ```

mod executor;

use std::fmt;
use std::sync::Arc;

use crate::error::{KnxError, Result};
use crate::protocol::Body;

pub(crate) use executor::Executor;

/// Notified about traffic and errors
///
/// Called from executor threads; keep callbacks short.
pub trait ObserverPlugin: Send + Sync + 'static {
    /// A body received from the gateway was accepted
    fn on_incoming_body(&self, body: &Body) {
        let _ = body;
    }

    /// A body was sent to the gateway
    fn on_outgoing_body(&self, body: &Body) {
        let _ = body;
    }

    /// A frame was dropped or an operation failed
    fn on_error(&self, error: &KnxError) {
        let _ = error;
    }
}

/// Notified about the client lifecycle
pub trait ExtensionPlugin: Send + Sync + 'static {
    /// The tunnel is connected
    fn on_start(&self) {}

    /// The client has closed
    fn on_shutdown(&self) {}
}

/// Immutable set of plugins handed to the client at construction
#[derive(Clone, Default)]
pub struct PluginRegistry {
    observers: Vec<Arc<dyn ObserverPlugin>>,
    extensions: Vec<Arc<dyn ExtensionPlugin>>,
}

impl PluginRegistry {
    /// Start an empty registry
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Number of observer plugins
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Number of extension plugins
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("observers", &self.observers.len())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Collects plugins; [`PluginRegistryBuilder::build`] freezes them
#[derive(Default)]
pub struct PluginRegistryBuilder {
    registry: PluginRegistry,
}

impl fmt::Debug for PluginRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.registry, f)
    }
}

impl PluginRegistryBuilder {
    /// Add an observer
    #[must_use]
    pub fn observer(self, plugin: impl ObserverPlugin) -> Self {
        self.observer_arc(Arc::new(plugin))
    }

    /// Add an observer the caller keeps a handle to
    #[must_use]
    pub fn observer_arc(mut self, plugin: Arc<dyn ObserverPlugin>) -> Self {
        self.registry.observers.push(plugin);
        self
    }

    /// Add an extension
    #[must_use]
    pub fn extension(self, plugin: impl ExtensionPlugin) -> Self {
        self.extension_arc(Arc::new(plugin))
    }

    /// Add an extension the caller keeps a handle to
    #[must_use]
    pub fn extension_arc(mut self, plugin: Arc<dyn ExtensionPlugin>) -> Self {
        self.registry.extensions.push(plugin);
        self
    }

    /// Freeze the registry
    pub fn build(self) -> PluginRegistry {
        self.registry
    }
}

/// Dispatches plugin callbacks onto the executor
#[derive(Debug)]
pub(crate) struct Notifier {
    registry: PluginRegistry,
    executor: Executor,
}

impl Notifier {
    pub(crate) fn new(registry: PluginRegistry, pool_size: usize, capacity: usize) -> Result<Self> {
        Ok(Self {
            registry,
            executor: Executor::new(pool_size, capacity)?,
        })
    }

    pub(crate) fn incoming(&self, body: &Body) {
        if self.registry.observers.is_empty() {
            return;
        }
        let body = Arc::new(body.clone());
        self.each_observer(move |observer| observer.on_incoming_body(&body));
    }

    pub(crate) fn outgoing(&self, body: &Body) {
        if self.registry.observers.is_empty() {
            return;
        }
        let body = Arc::new(body.clone());
        self.each_observer(move |observer| observer.on_outgoing_body(&body));
    }

    pub(crate) fn error(&self, error: impl Into<Arc<KnxError>>) {
        let error = error.into();
        self.each_observer(move |observer| observer.on_error(&error));
    }

    pub(crate) fn start(&self) {
        self.each_extension(|extension| extension.on_start());
    }

    pub(crate) fn shutdown(&self) {
        self.each_extension(|extension| extension.on_shutdown());
    }

    /// Stop the workers, giving queued notifications a bounded grace period
    pub(crate) fn stop(&self) {
        self.executor.shutdown();
    }

    fn each_observer<F>(&self, call: F)
    where
        F: Fn(&dyn ObserverPlugin) + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        for observer in &self.registry.observers {
            let observer = Arc::clone(observer);
            let call = Arc::clone(&call);
            self.executor.submit(move || (*call)(observer.as_ref()));
        }
    }

    fn each_extension<F>(&self, call: F)
    where
        F: Fn(&dyn ExtensionPlugin) + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        for extension in &self.registry.extensions {
            let extension = Arc::clone(extension);
            let call = Arc::clone(&call);
            self.executor.submit(move || (*call)(extension.as_ref()));
        }
    }
}
