//! The instance: one live app, page or component.
//!
//! Instances are shared `Rc<RefCell<_>>` handles. Parent and root links
//! are weak so a page tearing down never keeps its components alive, and
//! the registry owns nothing; dropping the last handle drops the
//! instance.
//!
//! Creation is two-phase. `create_instance` allocates identity (uid,
//! vid, effect scope) and echoes the vid into the host data so the view
//! can route events back. `init_instance` later links the parent chain,
//! publishes the instance to the registry, and is deferred for
//! components whose page has not loaded yet.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::app::{AppContext, ProvideLayer};
use crate::error::{call_with_error_handling, ErrorSource};
use crate::lifecycle::Lifecycle;
use crate::options::ResolvedOptions;
use crate::reactivity::ScopeId;
use crate::refs::HelpRef;
use crate::registry::{InstanceKind, Vid};
use crate::runtime::Runtime;
use crate::scheduler::Job;
use crate::state::AccessTier;
use crate::util::{camelize, capitalize};

/// Reserved data key carrying the vid into the host-side data object.
pub const VID_KEY: &str = "acorn_vid";
/// Reserved prop naming the parent instance of an attaching component.
pub const PARENT_ID_PROP: &str = "acornParentId";

/// Shared handle to an instance.
pub type InstanceHandle = Rc<RefCell<Instance>>;

/// A callable member: method, event handler or lifecycle callback.
pub type Callback =
    Rc<dyn Fn(&mut Runtime, &InstanceHandle, &[Value]) -> anyhow::Result<Option<Value>>>;

/// One named binding produced by `setup`. Only `Value` bindings are
/// synced into host data; callable bindings are exposed to the host by
/// name, and `Hook` marks lifecycle callbacks that must never leak into
/// either patches or event routing.
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    Method(Callback),
    Hook(Callback),
}

impl Binding {
    pub fn method(
        f: impl Fn(&mut Runtime, &InstanceHandle, &[Value]) -> anyhow::Result<Option<Value>> + 'static,
    ) -> Self {
        Binding::Method(Rc::new(f))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Binding::Method(_) | Binding::Hook(_))
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

pub(crate) struct DelegatedSlot {
    pub instance: Weak<RefCell<Instance>>,
    pub hooks: SmallVec<[Callback; 2]>,
}

/// Live per-instance state.
pub struct Instance {
    vid: Vid,
    kind: InstanceKind,
    uid: u64,
    pub(crate) page_id: Option<String>,
    options: Rc<ResolvedOptions>,

    pub(crate) parent: Option<Weak<RefCell<Instance>>>,
    pub(crate) root: Option<Weak<RefCell<Instance>>>,
    pub(crate) app_context: Rc<RefCell<AppContext>>,
    pub(crate) provides: ProvideLayer,
    pub(crate) scope: ScopeId,

    pub(crate) props: Map<String, Value>,
    pub(crate) data: Map<String, Value>,
    pub(crate) setup_state: IndexMap<String, Binding>,
    pub(crate) ctx: IndexMap<String, Value>,
    pub(crate) access_cache: HashMap<String, AccessTier>,

    hooks: HashMap<Lifecycle, SmallVec<[Callback; 2]>>,
    single_hooks: HashMap<Lifecycle, Callback>,
    delegated: HashMap<Lifecycle, IndexMap<Vid, DelegatedSlot>>,

    pub(crate) is_mounted: bool,
    pub(crate) is_unmounted: bool,
    pub(crate) is_deactivated: bool,
    pub(crate) pending_branch: Option<Vec<Job>>,
    pub(crate) loading_branch: Option<Vec<Job>>,

    pub(crate) refs: IndexMap<String, Value>,
    pub(crate) help_refs: IndexMap<String, HelpRef>,
    pub(crate) slots_scope: IndexMap<String, IndexMap<String, Vec<Value>>>,

    pub(crate) on_load_query: Option<Value>,
}

impl Instance {
    pub fn vid(&self) -> &Vid {
        &self.vid
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn options(&self) -> Rc<ResolvedOptions> {
        self.options.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.is_mounted
    }

    pub fn is_unmounted(&self) -> bool {
        self.is_unmounted
    }

    /// Whether the host has parked this instance in a background state.
    pub fn is_deactivated(&self) -> bool {
        self.is_deactivated
    }

    pub fn props(&self) -> &Map<String, Value> {
        &self.props
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn setup_state(&self) -> &IndexMap<String, Binding> {
        &self.setup_state
    }

    pub fn refs(&self) -> &IndexMap<String, Value> {
        &self.refs
    }

    /// Load query of a page, recorded when the host loads it.
    pub fn on_load_query(&self) -> Option<&Value> {
        self.on_load_query.as_ref()
    }

    pub fn parent_handle(&self) -> Option<InstanceHandle> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn root_handle(&self) -> Option<InstanceHandle> {
        self.root.as_ref().and_then(Weak::upgrade)
    }

    pub fn app_context(&self) -> Rc<RefCell<AppContext>> {
        self.app_context.clone()
    }

    /// The page this instance belongs to. For the app that is whatever
    /// page is currently foreground; for a page, itself. Returns `None`
    /// without complaint when no page is live.
    pub fn current_page(&self, rt: &Runtime) -> Option<InstanceHandle> {
        match self.kind {
            InstanceKind::App => rt.current_page.clone(),
            _ => {
                let page_id = self.page_id.clone()?;
                rt.registry.instance(&Vid::Page(page_id))
            }
        }
    }

    /// The load query of the owning page, or `None` when the page is not
    /// live. Silent by design; callers treat the absence as "no query".
    pub fn current_page_query(&self, rt: &Runtime) -> Option<Value> {
        self.current_page(rt)
            .and_then(|page| page.borrow().on_load_query.clone())
    }

    /// Resolve a callable member by name: setup bindings shadow options
    /// methods, like the mount pass attaching them last would.
    pub(crate) fn callable(&self, name: &str) -> Option<Callback> {
        match self.setup_state.get(name) {
            Some(Binding::Method(cb)) => return Some(cb.clone()),
            Some(Binding::Hook(_)) => return None,
            _ => {}
        }
        self.options.methods.get(name).cloned()
    }

    pub(crate) fn set_setup_state(&mut self, bindings: IndexMap<String, Binding>) {
        self.setup_state = bindings;
    }

    pub(crate) fn reset_access_cache(&mut self) {
        self.access_cache = HashMap::new();
    }

    pub(crate) fn push_hook(&mut self, lc: Lifecycle, hook: Callback) {
        self.hooks.entry(lc).or_default().push(hook);
    }

    pub(crate) fn hooks_for(&self, lc: Lifecycle) -> Vec<Callback> {
        self.hooks.get(&lc).map(|h| h.to_vec()).unwrap_or_default()
    }

    pub(crate) fn single_hook(&self, lc: Lifecycle) -> Option<Callback> {
        self.single_hooks.get(&lc).cloned()
    }

    pub(crate) fn set_single_hook(&mut self, lc: Lifecycle, hook: Callback) {
        self.single_hooks.insert(lc, hook);
    }

    pub(crate) fn push_delegated_hook(
        &mut self,
        lc: Lifecycle,
        vid: Vid,
        component: &InstanceHandle,
        hook: Callback,
    ) {
        let slot = self
            .delegated
            .entry(lc)
            .or_default()
            .entry(vid)
            .or_insert_with(|| DelegatedSlot {
                instance: Rc::downgrade(component),
                hooks: SmallVec::new(),
            });
        slot.hooks.push(hook);
    }

    pub(crate) fn delegated_hooks_for(
        &self,
        lc: Lifecycle,
    ) -> Vec<(Weak<RefCell<Instance>>, Callback)> {
        let Some(slots) = self.delegated.get(&lc) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for slot in slots.values() {
            for hook in &slot.hooks {
                out.push((slot.instance.clone(), hook.clone()));
            }
        }
        out
    }

    /// Drop every hook `vid` delegated to this page.
    pub(crate) fn remove_delegated(&mut self, vid: &Vid) {
        for slots in self.delegated.values_mut() {
            slots.shift_remove(vid);
        }
    }

    /// Queue `job` on the open render branch, creating it if needed.
    pub(crate) fn push_pending_branch(&mut self, job: Job) {
        self.pending_branch.get_or_insert_with(Vec::new).push(job);
    }

    pub(crate) fn has_open_branch(&self) -> bool {
        self.pending_branch.is_some() || self.loading_branch.is_some()
    }

    /// Detach and return the pending branch.
    pub(crate) fn clear_render_pending_branch(&mut self) -> Option<Vec<Job>> {
        self.pending_branch.take()
    }
}

/// Allocate an instance: identity, detached effect scope, registry slot,
/// and the vid echo patch. Linking into the tree happens later in
/// [`init_instance`].
pub(crate) fn create_instance(
    rt: &mut Runtime,
    kind: InstanceKind,
    page_id: Option<String>,
    options: Rc<ResolvedOptions>,
) -> InstanceHandle {
    let uid = rt.alloc_uid();
    let vid = match kind {
        InstanceKind::App => Vid::App,
        InstanceKind::Page => Vid::Page(page_id.clone().unwrap_or_default()),
        InstanceKind::Component => Vid::Component(uid),
    };
    let scope = rt.reactivity.create_scope(true);
    let app_context = rt.app_context();
    let provides = app_context.borrow().provides.clone();

    let instance = Rc::new(RefCell::new(Instance {
        vid: vid.clone(),
        kind,
        uid,
        page_id,
        options,
        parent: None,
        root: None,
        app_context,
        provides,
        scope,
        props: Map::new(),
        data: Map::new(),
        setup_state: IndexMap::new(),
        ctx: IndexMap::new(),
        access_cache: HashMap::new(),
        hooks: HashMap::new(),
        single_hooks: HashMap::new(),
        delegated: HashMap::new(),
        is_mounted: false,
        is_unmounted: false,
        is_deactivated: false,
        pending_branch: None,
        loading_branch: None,
        refs: IndexMap::new(),
        help_refs: IndexMap::new(),
        slots_scope: IndexMap::new(),
        on_load_query: None,
    }));

    rt.registry.ensure_entry(vid.clone(), kind);

    let mut echo = crate::host::DataPatch::new();
    echo.insert(VID_KEY.to_owned(), Value::String(vid.to_string()));
    rt.send_patch(&vid, echo, None);

    instance
}

/// Link an instance into the tree and publish it: resolve the parent
/// from the reserved prop (components) or the app entry, inherit app
/// context and provides, then run the parked jobs other arrivals left
/// on the registry entry.
pub(crate) fn init_instance(rt: &mut Runtime, instance: &InstanceHandle) {
    let (kind, vid) = {
        let i = instance.borrow();
        (i.kind(), i.vid().clone())
    };

    let parent = match kind {
        InstanceKind::App => None,
        _ => {
            let parent_vid = instance
                .borrow()
                .props
                .get(PARENT_ID_PROP)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Vid>().ok());
            parent_vid
                .and_then(|pv| rt.registry.instance(&pv))
                .or_else(|| rt.registry.instance(&Vid::App))
        }
    };

    {
        let mut i = instance.borrow_mut();
        match &parent {
            Some(parent) => {
                let p = parent.borrow();
                i.app_context = p.app_context.clone();
                // Same layer as the parent: a child sees later parent
                // provides until it provides something itself.
                i.provides = p.provides.clone();
                i.root = p.root.clone();
                i.parent = Some(Rc::downgrade(parent));
            }
            None => {
                let ctx = i.app_context.clone();
                i.provides = ctx.borrow().provides.child();
                i.root = Some(Rc::downgrade(instance));
            }
        }
    }

    // Parked arrivals go through the queue so this instance finishes its
    // own setup before any deferred child starts its own.
    let parked = rt.registry.publish(vid, kind, instance.clone());
    for job in parked {
        rt.scheduler.queue_job(job);
    }
}

/// Run the definition's `setup` with the instance current and tracking
/// paused, then advise and store the returned bindings.
pub(crate) fn setup_stateful(rt: &mut Runtime, instance: &InstanceHandle) {
    let Some(setup) = instance.borrow().options().setup.clone() else {
        return;
    };
    instance.borrow_mut().reset_access_cache();
    let props = instance.borrow().props.clone();

    rt.push_current_instance(instance.clone());
    rt.reactivity.pause_tracking();
    let result = call_with_error_handling(rt, Some(instance), ErrorSource::Setup, |rt| {
        setup(rt, instance, &props)
    });
    rt.reactivity.reset_tracking();
    rt.pop_current_instance();

    if let Some(mut bindings) = result {
        let kind = instance.borrow().kind();
        crate::aop::apply_setup_aop(rt, kind, &mut bindings);
        instance.borrow_mut().set_setup_state(bindings);
    }
}

/// Tear an instance down: prune its page delegations, stop its scope,
/// mark it unmounted and drop it from the registry. Calling this twice
/// is a no-op.
pub(crate) fn unload_instance(rt: &mut Runtime, instance: &InstanceHandle) {
    let (vid, kind, scope, already) = {
        let i = instance.borrow();
        (i.vid().clone(), i.kind(), i.scope, i.is_unmounted)
    };
    if already {
        return;
    }

    if kind == InstanceKind::Component {
        if let Some(page) = instance.borrow().current_page(rt) {
            page.borrow_mut().remove_delegated(&vid);
        }
    }

    rt.reactivity.stop_scope(scope);
    instance.borrow_mut().is_unmounted = true;
    rt.registry.remove(&vid);
}

/// Human-readable instance name for warnings and traces.
pub(crate) fn format_instance_name(instance: &Instance) -> String {
    match instance.kind() {
        InstanceKind::App => "App".to_owned(),
        _ => {
            let path = instance
                .options
                .path
                .clone()
                .or_else(|| instance.page_id.clone());
            match path {
                Some(path) if !path.is_empty() => classify(&path),
                _ => "Anonymous".to_owned(),
            }
        }
    }
}

/// `pages/user-card/index` -> `Index`, `widgets/user-card` -> `UserCard`.
fn classify(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    let base = base.split('.').next().unwrap_or(base);
    capitalize(&camelize(base))
}
