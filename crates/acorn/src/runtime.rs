//! The runtime context.
//!
//! One [`Runtime`] owns everything: the host boundary, the definition
//! tables, the live-instance registry, the scheduler, and the pending
//! commits. There is no hidden global; every operation threads `&mut
//! Runtime` explicitly, and deferred work is a boxed [`Job`] that
//! receives it back.
//!
//! The host drives the runtime from the outside: it registers
//! definitions, launches the app, loads pages, attaches components,
//! routes view events to [`Runtime::handle_event`], reports applied
//! commits through [`Runtime::complete_commit`], and pumps deferred
//! work with [`Runtime::flush`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;
use serde_json::{Map, Value};

use crate::aop::AopRegistry;
use crate::app::{App, AppContext};
use crate::error::{call_with_error_handling, ErrorSource, RuntimeError};
use crate::host::{CommitId, DataPatch, Host};
use crate::instance::{
    create_instance, init_instance, setup_stateful, InstanceHandle, PARENT_ID_PROP,
};
use crate::lifecycle::{call_hook, call_single_hook, run_hook, Lifecycle};
use crate::options::{ComponentOptions, DataSource, GlobalConfig, ResolvedOptions, resolve_options};
use crate::props::init_props;
use crate::reactivity::{LocalReactivity, Reactivity};
use crate::registry::{InstanceKind, Registry, Vid};
use crate::render::{mount_instance, unmount_instance, Renderer};
use crate::scheduler::{flush_jobs, Job, Scheduler};
use crate::state::instance_set;
use crate::template::setup_call_compile_help;
use crate::warning::warn;

#[derive(Default)]
struct Definitions {
    app: Option<Rc<ResolvedOptions>>,
    pages: HashMap<String, Rc<ResolvedOptions>>,
    components: HashMap<String, Rc<ResolvedOptions>>,
}

/// The runtime context. See the module docs for the driving contract.
pub struct Runtime {
    pub(crate) host: Box<dyn Host>,
    pub(crate) reactivity: Box<dyn Reactivity>,
    pub(crate) registry: Registry,
    pub(crate) scheduler: Scheduler,
    pub(crate) renderer: Renderer,
    pub(crate) aop: AopRegistry,
    definitions: Definitions,
    app_context: Rc<RefCell<AppContext>>,
    pub(crate) current_app: Option<InstanceHandle>,
    pub(crate) current_page: Option<InstanceHandle>,
    instance_stack: Vec<InstanceHandle>,
    pub(crate) warning_stack: Vec<InstanceHandle>,
    global_config: GlobalConfig,
    pending_commits: HashMap<CommitId, Vec<Job>>,
    next_uid: u64,
    next_commit: u64,
}

impl Runtime {
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_reactivity(host, LocalReactivity::new())
    }

    /// Build a runtime on a host-provided reactivity engine.
    pub fn with_reactivity(
        host: impl Host + 'static,
        reactivity: impl Reactivity + 'static,
    ) -> Self {
        let mut rt = Runtime {
            host: Box::new(host),
            reactivity: Box::new(reactivity),
            registry: Registry::new(),
            scheduler: Scheduler::default(),
            renderer: Renderer::default(),
            aop: AopRegistry::default(),
            definitions: Definitions::default(),
            app_context: Rc::new(RefCell::new(AppContext::new())),
            current_app: None,
            current_page: None,
            instance_stack: Vec::new(),
            warning_stack: Vec::new(),
            global_config: GlobalConfig::default(),
            pending_commits: HashMap::new(),
            next_uid: 0,
            next_commit: 0,
        };
        crate::events::init_emit_wrap(&mut rt);
        rt
    }

    // ---- definitions -------------------------------------------------

    pub fn define_app(&mut self, options: ComponentOptions) {
        if self.definitions.app.is_some() {
            warn(self, "App definition already exists. It will be overwritten.");
        }
        let resolved = resolve_options(self, InstanceKind::App, None, options);
        self.definitions.app = Some(resolved);
    }

    pub fn define_page(&mut self, path: impl Into<String>, options: ComponentOptions) {
        let path = path.into();
        if self.definitions.pages.contains_key(&path) {
            warn(
                self,
                &format!("Page \"{path}\" has already been defined. It will be overwritten."),
            );
        }
        let resolved = resolve_options(self, InstanceKind::Page, Some(path.clone()), options);
        self.definitions.pages.insert(path, resolved);
    }

    pub fn define_component(&mut self, path: impl Into<String>, options: ComponentOptions) {
        let path = path.into();
        if self.definitions.components.contains_key(&path) {
            warn(
                self,
                &format!("Component \"{path}\" has already been defined. It will be overwritten."),
            );
        }
        let resolved = resolve_options(self, InstanceKind::Component, Some(path.clone()), options);
        self.definitions.components.insert(path, resolved);
    }

    // ---- instance lifecycle ------------------------------------------

    /// Launch the app. Runs its data and setup, then dispatches the
    /// launch lifecycle with `query`. Fails when no app is defined or one
    /// already launched.
    pub fn launch_app(&mut self, query: Value) -> Result<InstanceHandle, RuntimeError> {
        if self.current_app.is_some() {
            return Err(RuntimeError::AlreadyLaunched);
        }
        let options = self
            .definitions
            .app
            .clone()
            .ok_or_else(|| RuntimeError::UnknownDefinition("app".to_owned()))?;

        let instance = create_instance(self, InstanceKind::App, None, options);
        self.current_app = Some(instance.clone());
        init_instance(self, &instance);
        instance.borrow_mut().on_load_query = Some(query.clone());
        self.finish_instance_setup(&instance);
        // The app has no view to commit; it counts as mounted at once.
        instance.borrow_mut().is_mounted = true;
        self.dispatch_lifecycle(&instance, Lifecycle::AppLaunch, &[query]);
        Ok(instance)
    }

    /// Load the page registered under `path` as the host page `page_id`.
    /// The page becomes foreground, its load lifecycle gets `query`, and
    /// the first data commit goes out before this returns.
    pub fn load_page(
        &mut self,
        page_id: impl Into<String>,
        path: &str,
        query: Value,
    ) -> Result<InstanceHandle, RuntimeError> {
        let options = self
            .definitions
            .pages
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownDefinition(path.to_owned()))?;

        let instance = create_instance(self, InstanceKind::Page, Some(page_id.into()), options);
        instance.borrow_mut().on_load_query = Some(query.clone());
        init_instance(self, &instance);
        self.current_page = Some(instance.clone());
        self.finish_instance_setup(&instance);
        self.dispatch_lifecycle(&instance, Lifecycle::PageLoad, &[query]);
        mount_instance(self, &instance);
        Ok(instance)
    }

    /// Unload a page: its unload lifecycle, then teardown of the
    /// components it still owns, then the page itself.
    pub fn unload_page(&mut self, page_id: &str) -> Result<(), RuntimeError> {
        let vid = Vid::Page(page_id.to_owned());
        let page = self
            .registry
            .instance(&vid)
            .ok_or_else(|| RuntimeError::UnknownInstance(vid.to_string()))?;

        self.dispatch_lifecycle(&page, Lifecycle::PageUnload, &[]);

        let owned: Vec<InstanceHandle> = self
            .registry
            .vids()
            .filter(|v| matches!(v, Vid::Component(_)))
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|v| self.registry.instance(&v))
            .filter(|c| c.borrow().page_id.as_deref() == Some(page_id))
            .collect();
        for component in owned {
            unmount_instance(self, &component);
        }

        unmount_instance(self, &page);
        if self
            .current_page
            .as_ref()
            .is_some_and(|p| Rc::ptr_eq(p, &page))
        {
            self.current_page = None;
        }
        Ok(())
    }

    /// Attach a component instance of the definition at `path` with the
    /// raw props the view passed. When the reserved parent-id prop names
    /// an instance that exists but has not published yet, the rest of the
    /// initialization parks on that entry and runs at publish time.
    pub fn attach_component(
        &mut self,
        path: &str,
        raw_props: Map<String, Value>,
    ) -> Result<InstanceHandle, RuntimeError> {
        let options = self
            .definitions
            .components
            .get(path)
            .cloned()
            .or_else(|| self.app_context.borrow().components.get(path).cloned())
            .ok_or_else(|| RuntimeError::UnknownDefinition(path.to_owned()))?;

        let page_id = self
            .current_page
            .as_ref()
            .and_then(|p| p.borrow().page_id.clone());
        let instance = create_instance(self, InstanceKind::Component, page_id, options);
        init_props(self, &instance, &raw_props);

        let parent_vid = raw_props
            .get(PARENT_ID_PROP)
            .and_then(Value::as_str)
            .map(Vid::from);
        match parent_vid {
            // A named parent that has not published yet, including a page
            // still mid-load, parks the rest of the initialization on its
            // registry entry.
            Some(pv) if self.registry.instance(&pv).is_none() => {
                let handle = instance.clone();
                let kind = pv.kind();
                self.registry.defer(
                    pv,
                    kind,
                    Box::new(move |rt| rt.finish_component_attach(&handle)),
                );
            }
            _ => self.finish_component_attach(&instance),
        }
        Ok(instance)
    }

    fn finish_component_attach(&mut self, instance: &InstanceHandle) {
        init_instance(self, instance);
        self.finish_instance_setup(instance);
        mount_instance(self, instance);
    }

    /// Detach the component the view refers to as `vid`.
    pub fn detach_component(&mut self, vid: &str) -> Result<(), RuntimeError> {
        let vid = Vid::from(vid);
        let instance = self
            .registry
            .instance(&vid)
            .ok_or_else(|| RuntimeError::UnknownInstance(vid.to_string()))?;
        unmount_instance(self, &instance);
        Ok(())
    }

    /// Data evaluation, setup, compile-help, and the create lifecycles,
    /// shared by every instance kind.
    fn finish_instance_setup(&mut self, instance: &InstanceHandle) {
        self.dispatch_lifecycle(instance, Lifecycle::BeforeCreate, &[]);
        self.init_data(instance);
        setup_stateful(self, instance);
        setup_call_compile_help(self, instance);
        self.dispatch_lifecycle(instance, Lifecycle::Created, &[]);
    }

    fn init_data(&mut self, instance: &InstanceHandle) {
        let Some(source) = instance.borrow().options().data.clone() else {
            return;
        };
        let data = match source {
            DataSource::Value(map) => Some(map),
            DataSource::Factory(factory) => {
                self.push_current_instance(instance.clone());
                self.reactivity.pause_tracking();
                let data = call_with_error_handling(self, Some(instance), ErrorSource::Setup, |rt| {
                    factory(rt, instance)
                });
                self.reactivity.reset_tracking();
                self.pop_current_instance();
                data
            }
        };
        if let Some(data) = data {
            instance.borrow_mut().data = data;
        }
    }

    // ---- host-driven dispatch ----------------------------------------

    /// Dispatch a page lifecycle event from the host. The return value is
    /// whatever the handler chain produced, which for the share hook is
    /// the share payload the host expects back.
    pub fn page_event(
        &mut self,
        page_id: &str,
        lc: Lifecycle,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        let vid = Vid::Page(page_id.to_owned());
        let page = self
            .registry
            .instance(&vid)
            .ok_or_else(|| RuntimeError::UnknownInstance(vid.to_string()))?;
        Ok(self.dispatch_lifecycle(&page, lc, args))
    }

    /// Dispatch an app lifecycle event from the host.
    pub fn app_event(
        &mut self,
        lc: Lifecycle,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        let app = self
            .current_app
            .clone()
            .ok_or_else(|| RuntimeError::UnknownInstance("app".to_owned()))?;
        Ok(self.dispatch_lifecycle(&app, lc, args))
    }

    /// Route a view event to the named callable member of an instance.
    /// Handler errors are captured and routed, never returned; the `Err`
    /// side is for unknown instances and members only.
    pub fn handle_event(
        &mut self,
        vid: &str,
        name: &str,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        let vid = Vid::from(vid);
        let instance = self
            .registry
            .instance(&vid)
            .ok_or_else(|| RuntimeError::UnknownInstance(vid.to_string()))?;
        let callback =
            instance
                .borrow()
                .callable(name)
                .ok_or_else(|| RuntimeError::UnknownHandler {
                    vid: vid.to_string(),
                    name: name.to_owned(),
                })?;

        self.push_current_instance(instance.clone());
        let result =
            call_with_error_handling(self, Some(&instance), ErrorSource::NativeEventHandler, |rt| {
                callback(rt, &instance, args)
            });
        self.pop_current_instance();
        Ok(result.flatten())
    }

    /// Apply a host-side prop change to a component. Returns whether the
    /// stored prop value actually changed.
    pub fn update_prop(
        &mut self,
        vid: &str,
        key: &str,
        value: Value,
    ) -> Result<bool, RuntimeError> {
        let vid = Vid::from(vid);
        let instance = self
            .registry
            .instance(&vid)
            .ok_or_else(|| RuntimeError::UnknownInstance(vid.to_string()))?;
        Ok(crate::props::update_prop(&instance, key, &value))
    }

    /// Dispatch `lc` on one instance: the options-declared member first,
    /// then the composition hooks. Single-slot hooks replace the result.
    pub(crate) fn dispatch_lifecycle(
        &mut self,
        instance: &InstanceHandle,
        lc: Lifecycle,
        args: &[Value],
    ) -> Option<Value> {
        match lc {
            Lifecycle::Deactivated => instance.borrow_mut().is_deactivated = true,
            Lifecycle::Activated => instance.borrow_mut().is_deactivated = false,
            _ => {}
        }
        let options = instance.borrow().options();
        if !options.dispatches(lc) {
            return None;
        }

        let mut result = None;
        if let Some(origin) = options.lifecycle.get(&lc).cloned() {
            result = run_hook(self, instance, lc, &origin, args);
        }
        if lc.is_single() {
            if let Some(value) = call_single_hook(self, instance, lc, args) {
                result = Some(value);
            }
        } else {
            call_hook(self, instance, lc, args);
        }
        result
    }

    // ---- state and scheduling ----------------------------------------

    /// Write `key` on an instance and schedule the view update when the
    /// write landed.
    pub fn set_state(&mut self, instance: &InstanceHandle, key: &str, value: Value) -> bool {
        let written = instance_set(self, instance, key, value);
        if written {
            self.notify_state_changed(instance, key);
        }
        written
    }

    /// Tell the runtime that `key` changed behind its back, for hosts
    /// that mutate setup bindings through their own reactivity engine.
    pub fn notify_state_changed(&mut self, instance: &InstanceHandle, key: &str) {
        crate::render::merge_data_change(self, instance, key);
    }

    /// Report a commit applied. Runs the callbacks registered for it,
    /// exactly once, then pumps the queues the callbacks filled.
    pub fn complete_commit(&mut self, commit: CommitId) {
        let Some(jobs) = self.pending_commits.remove(&commit) else {
            return;
        };
        for job in jobs {
            job(self);
        }
        flush_jobs(self);
    }

    /// Drain the job queues.
    pub fn flush(&mut self) {
        flush_jobs(self);
    }

    pub fn is_flush_pending(&self) -> bool {
        self.scheduler.has_pending()
    }

    /// A future resolved on the next post-flush turn.
    pub fn next_tick(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.scheduler.queue_post_flush(Box::new(move |_| {
            let _ = tx.send(());
        }));
        rx
    }

    /// Run `job` on the next post-flush turn.
    pub fn next_tick_with(&mut self, job: Job) {
        self.scheduler.queue_post_flush(job);
    }

    pub(crate) fn send_patch(
        &mut self,
        vid: &Vid,
        patch: DataPatch,
        on_commit: Option<Job>,
    ) -> CommitId {
        self.next_commit += 1;
        let commit = CommitId(self.next_commit);
        if let Some(job) = on_commit {
            self.pending_commits.insert(commit, vec![job]);
        }
        self.host.set_data(vid, patch, commit);
        commit
    }

    // ---- accessors ---------------------------------------------------

    /// The published instance behind a view identifier.
    pub fn instance(&self, vid: &Vid) -> Option<InstanceHandle> {
        self.registry.instance(vid)
    }

    /// The instance whose callback is currently running, if any.
    pub fn current_instance(&self) -> Option<InstanceHandle> {
        self.instance_stack.last().cloned()
    }

    pub(crate) fn push_current_instance(&mut self, instance: InstanceHandle) {
        self.instance_stack.push(instance);
    }

    pub(crate) fn pop_current_instance(&mut self) {
        self.instance_stack.pop();
    }

    /// The mutating app-configuration facade.
    pub fn app(&mut self) -> App<'_> {
        App { rt: self }
    }

    pub fn app_context(&self) -> Rc<RefCell<AppContext>> {
        self.app_context.clone()
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global_config
    }

    pub fn global_config_mut(&mut self) -> &mut GlobalConfig {
        &mut self.global_config
    }

    pub(crate) fn alloc_uid(&mut self) -> u64 {
        self.next_uid += 1;
        self.next_uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Binding;
    use crate::options::SetupResult;
    use crate::testing::{pump, FakeHost};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counter_setup(
        _rt: &mut Runtime,
        _instance: &InstanceHandle,
        _props: &Map<String, Value>,
    ) -> anyhow::Result<SetupResult> {
        let mut bindings = IndexMap::new();
        bindings.insert("count".to_owned(), Binding::Value(json!(0)));
        bindings.insert(
            "increment".to_owned(),
            Binding::method(|rt, instance, _args| {
                let next = match crate::state::instance_get(instance, "count") {
                    Some(Binding::Value(Value::Number(n))) => {
                        json!(n.as_i64().unwrap_or(0) + 1)
                    }
                    _ => json!(1),
                };
                rt.set_state(instance, "count", next);
                Ok(None)
            }),
        );
        Ok(bindings)
    }

    #[test]
    fn test_launch_app_is_exactly_once() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        assert!(matches!(
            rt.launch_app(json!({})),
            Err(RuntimeError::UnknownDefinition(_))
        ));

        rt.define_app(ComponentOptions::new());
        rt.launch_app(json!({"path": "pages/home"})).unwrap();
        assert!(matches!(
            rt.launch_app(json!({})),
            Err(RuntimeError::AlreadyLaunched)
        ));
    }

    #[test]
    fn test_page_load_sends_initial_data_and_fires_lifecycles() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));

        rt.define_app(ComponentOptions::new());
        let load_log = seen.clone();
        rt.define_page(
            "pages/home",
            ComponentOptions::new()
                .data_value(
                    json!({"title": "home"})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                )
                .member("onLoad", move |_, _, args| {
                    load_log.borrow_mut().push(args.first().cloned());
                    Ok(None)
                }),
        );

        rt.launch_app(json!({})).unwrap();
        let page = rt
            .load_page("page-1", "pages/home", json!({"id": "42"}))
            .unwrap();
        pump(&mut rt, &host);

        assert_eq!(*seen.borrow(), vec![Some(json!({"id": "42"}))]);
        assert!(page.borrow().is_mounted());
        let vid = page.borrow().vid().clone();
        assert_eq!(host.data(&vid).and_then(|d| d.get("title").cloned()), Some(json!("home")));
    }

    #[test]
    fn test_handle_event_routes_to_setup_method() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        rt.define_app(ComponentOptions::new());
        rt.define_page("pages/home", ComponentOptions::from_setup(counter_setup));

        rt.launch_app(json!({})).unwrap();
        let page = rt.load_page("page-1", "pages/home", json!({})).unwrap();
        pump(&mut rt, &host);
        let vid = page.borrow().vid().to_string();

        rt.handle_event(&vid, "increment", &[]).unwrap();
        rt.handle_event(&vid, "increment", &[]).unwrap();
        pump(&mut rt, &host);

        let data = host.data(&page.borrow().vid().clone());
        assert_eq!(data.and_then(|d| d.get("count").cloned()), Some(json!(2)));

        let miss = rt.handle_event(&vid, "jump", &[]);
        assert!(matches!(miss, Err(RuntimeError::UnknownHandler { .. })));
    }

    #[test]
    fn test_deferred_component_waits_for_parent_publish() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        let order = Rc::new(RefCell::new(Vec::new()));

        rt.define_app(ComponentOptions::new());
        rt.define_page("pages/home", ComponentOptions::new());
        let parent_log = order.clone();
        rt.define_component(
            "widgets/list",
            ComponentOptions::new().member("created", move |_, _, _| {
                parent_log.borrow_mut().push("parent");
                Ok(None)
            }),
        );
        let child_log = order.clone();
        rt.define_component(
            "widgets/item",
            ComponentOptions::new().member("created", move |_, _, _| {
                child_log.borrow_mut().push("child");
                Ok(None)
            }),
        );

        rt.launch_app(json!({})).unwrap();
        rt.load_page("page-1", "pages/home", json!({})).unwrap();

        // The child names a parent vid that has not arrived yet; its
        // initialization must wait for the parent to publish.
        let parent_vid = format!("com:{}", rt.next_uid + 2);
        let child_props = json!({ PARENT_ID_PROP: parent_vid })
            .as_object()
            .cloned()
            .unwrap_or_default();
        rt.attach_component("widgets/item", child_props).unwrap();
        assert!(order.borrow().is_empty());

        rt.attach_component("widgets/list", Map::new()).unwrap();
        pump(&mut rt, &host);
        assert_eq!(*order.borrow(), ["parent", "child"]);
    }

    #[test]
    fn test_unload_page_tears_down_owned_components() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        rt.define_app(ComponentOptions::new());
        rt.define_page("pages/home", ComponentOptions::new());
        rt.define_component("widgets/badge", ComponentOptions::new());

        rt.launch_app(json!({})).unwrap();
        rt.load_page("page-1", "pages/home", json!({})).unwrap();
        let badge = rt.attach_component("widgets/badge", Map::new()).unwrap();
        pump(&mut rt, &host);

        rt.unload_page("page-1").unwrap();
        assert!(badge.borrow().is_unmounted());
        assert!(rt.instance(&Vid::Page("page-1".into())).is_none());
        assert!(rt.unload_page("page-1").is_err());
    }

    #[test]
    fn test_share_hook_result_reaches_the_host() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        rt.define_app(ComponentOptions::new());
        rt.define_page(
            "pages/home",
            ComponentOptions::new().member("onShareAppMessage", |_, _, _| {
                Ok(Some(json!({"title": "look at this"})))
            }),
        );

        rt.launch_app(json!({})).unwrap();
        rt.load_page("page-1", "pages/home", json!({})).unwrap();
        let payload = rt
            .page_event("page-1", Lifecycle::ShareAppMessage, &[])
            .unwrap();
        assert_eq!(payload, Some(json!({"title": "look at this"})));
    }

    #[test]
    fn test_complete_commit_is_exactly_once() {
        let host = FakeHost::new();
        let mut rt = Runtime::new(host.clone());
        let hits = Rc::new(RefCell::new(0));

        let job_hits = hits.clone();
        let commit = rt.send_patch(
            &Vid::App,
            DataPatch::new(),
            Some(Box::new(move |_| *job_hits.borrow_mut() += 1)),
        );
        rt.complete_commit(commit);
        rt.complete_commit(commit);
        assert_eq!(*hits.borrow(), 1);
    }
}
