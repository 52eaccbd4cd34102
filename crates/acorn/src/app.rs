//! App-level context: configuration, global components, plugins, and
//! the provide/inject chain.
//!
//! Every instance carries an `Rc` to the app context it was created
//! under. Pages and components inherit the launching app's context;
//! until an app launches, stray instances get a private one so lookups
//! stay total.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ErrorHandlerFn;
use crate::instance::InstanceHandle;
use crate::options::{resolve_options, ComponentOptions, ResolvedOptions};
use crate::registry::InstanceKind;
use crate::runtime::Runtime;
use crate::warning::{warn, WarnHandlerFn};

/// Per-app configuration, reachable from every owned instance.
#[derive(Clone, Default)]
pub struct AppConfig {
    /// Values resolvable on every instance as the last fallback tier.
    pub global_properties: IndexMap<String, Value>,
    pub error_handler: Option<ErrorHandlerFn>,
    pub warn_handler: Option<WarnHandlerFn>,
}

/// One layer of the provide chain. Layers form a parent-linked list;
/// reads walk up, writes stay in the owning layer. Cloning shares the
/// layer, which is how child instances alias their parent's provides
/// until their own first `provide`.
#[derive(Clone, Default)]
pub struct ProvideLayer {
    inner: Rc<RefCell<LayerInner>>,
}

#[derive(Default)]
struct LayerInner {
    values: IndexMap<String, Value>,
    parent: Option<ProvideLayer>,
}

impl ProvideLayer {
    /// A fresh layer whose reads fall through to `self`.
    pub fn child(&self) -> ProvideLayer {
        ProvideLayer {
            inner: Rc::new(RefCell::new(LayerInner {
                values: IndexMap::new(),
                parent: Some(self.clone()),
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        if let Some(value) = inner.values.get(key) {
            return Some(value.clone());
        }
        inner.parent.as_ref().and_then(|p| p.get(key))
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.borrow_mut().values.insert(key.into(), value);
    }

    pub fn ptr_eq(&self, other: &ProvideLayer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Shared app state: config, the root provide layer, globally registered
/// component definitions, and the installed plugins.
pub struct AppContext {
    pub config: AppConfig,
    pub provides: ProvideLayer,
    pub(crate) components: IndexMap<String, Rc<ResolvedOptions>>,
    installed: Vec<Rc<dyn Plugin>>,
}

impl AppContext {
    pub(crate) fn new() -> Self {
        AppContext {
            config: AppConfig::default(),
            provides: ProvideLayer::default(),
            components: IndexMap::new(),
            installed: Vec::new(),
        }
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An installable extension. Installation happens at most once per app;
/// repeats are dropped with a warning.
pub trait Plugin {
    fn install(&self, app: &mut App<'_>);
}

/// Mutating facade over the runtime's app context. Obtained from
/// [`Runtime::app`], typically before launch.
pub struct App<'rt> {
    pub(crate) rt: &'rt mut Runtime,
}

impl App<'_> {
    fn context(&self) -> Rc<RefCell<AppContext>> {
        self.rt.app_context()
    }

    /// Install a value under `key` on every instance's fallback tier.
    pub fn global_property(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        let key = key.into();
        let ctx = self.context();
        let replaced = ctx
            .borrow_mut()
            .config
            .global_properties
            .insert(key.clone(), value)
            .is_some();
        if replaced {
            warn(
                self.rt,
                &format!("App already has a global property with key \"{key}\". It will be overwritten."),
            );
        }
        self
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandlerFn) -> &mut Self {
        self.context().borrow_mut().config.error_handler = Some(handler);
        self
    }

    pub fn set_warn_handler(&mut self, handler: WarnHandlerFn) -> &mut Self {
        self.context().borrow_mut().config.warn_handler = Some(handler);
        self
    }

    /// Provide `value` app-wide, at the root of the inject chain.
    pub fn provide(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        let key = key.into();
        let provides = self.context().borrow().provides.clone();
        if provides.get(&key).is_some() {
            warn(
                self.rt,
                &format!("App already provides property with key \"{key}\". It will be overwritten."),
            );
        }
        provides.set(key, value);
        self
    }

    /// Register a component definition under a global name.
    pub fn component(&mut self, name: impl Into<String>, options: ComponentOptions) -> &mut Self {
        let name = name.into();
        if self.context().borrow().components.contains_key(&name) {
            warn(
                self.rt,
                &format!("Component \"{name}\" has already been registered. It will be overwritten."),
            );
        }
        let resolved = resolve_options(self.rt, InstanceKind::Component, Some(name.clone()), options);
        self.context().borrow_mut().components.insert(name, resolved);
        self
    }

    pub fn use_plugin(&mut self, plugin: Rc<dyn Plugin>) -> &mut Self {
        let already = self
            .context()
            .borrow()
            .installed
            .iter()
            .any(|p| Rc::ptr_eq(p, &plugin));
        if already {
            warn(self.rt, "Plugin has already been applied to target app.");
            return self;
        }
        self.context().borrow_mut().installed.push(plugin.clone());
        plugin.install(self);
        self
    }
}

/// Provide `value` from the current instance to its descendants. First
/// use forks the instance off its parent's layer. Must be called during
/// `setup()`.
pub fn provide(rt: &mut Runtime, key: impl Into<String>, value: Value) {
    let Some(instance) = rt.current_instance() else {
        warn(rt, "provide() can only be used inside setup().");
        return;
    };
    let parent_layer = instance
        .borrow()
        .parent_handle()
        .map(|p| p.borrow().provides.clone());
    let mut i = instance.borrow_mut();
    if let Some(parent_layer) = parent_layer {
        if i.provides.ptr_eq(&parent_layer) {
            i.provides = parent_layer.child();
        }
    }
    i.provides.set(key, value);
}

/// Resolve an injection for the current instance, walking the parent
/// chain. Misses warn and yield `None`; an instance never sees its own
/// provides.
pub fn inject(rt: &mut Runtime, key: &str) -> Option<Value> {
    let found = inject_silent(rt, key)?;
    Some(found)
}

/// Like [`inject`] but a miss falls back to `default` without warning.
pub fn inject_or(rt: &mut Runtime, key: &str, default: Value) -> Value {
    let Some(instance) = rt.current_instance() else {
        warn(rt, "inject() can only be used inside setup().");
        return default;
    };
    lookup_layer(&instance).get(key).unwrap_or(default)
}

fn inject_silent(rt: &mut Runtime, key: &str) -> Option<Value> {
    let Some(instance) = rt.current_instance() else {
        warn(rt, "inject() can only be used inside setup().");
        return None;
    };
    let found = lookup_layer(&instance).get(key);
    if found.is_none() {
        warn(rt, &format!("injection \"{key}\" not found."));
    }
    found
}

fn lookup_layer(instance: &InstanceHandle) -> ProvideLayer {
    match instance.borrow().parent_handle() {
        Some(parent) => parent.borrow().provides.clone(),
        None => instance.borrow().app_context().borrow().provides.clone(),
    }
}
