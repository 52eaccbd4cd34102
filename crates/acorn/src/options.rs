//! Raw definition options and their resolution.
//!
//! A definition arrives as [`ComponentOptions`]: an optional `setup`
//! function, a data source, prop and emit declarations, and a flat
//! member table holding both lifecycle members and event handlers.
//! Resolution applies the advice tables for the instance kind, then
//! moves lifecycle members into a typed table according to the per-kind
//! wiring rules. What remains in the member table is the methods the
//! host may invoke by name.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::aop;
use crate::error::ErrorHandlerFn;
use crate::events::{normalize_emits_options, EmitsOptions, NormalizedEmits};
use crate::instance::{Binding, Callback, InstanceHandle};
use crate::lifecycle::{rules_for, Lifecycle};
use crate::props::{normalize_props_options, NormalizedProps, PropsOptions};
use crate::registry::InstanceKind;
use crate::runtime::Runtime;
use crate::template::{AfterRenderFn, SlotScope};

/// Bindings a `setup` function hands back, keyed by the name they get in
/// the instance state.
pub type SetupResult = IndexMap<String, Binding>;

/// The `setup` entry point of a definition.
pub type SetupFn =
    Rc<dyn Fn(&mut Runtime, &InstanceHandle, &Map<String, Value>) -> anyhow::Result<SetupResult>>;

/// Factory for per-instance initial data.
pub type DataFn =
    Rc<dyn Fn(&mut Runtime, &InstanceHandle) -> anyhow::Result<Map<String, Value>>>;

/// Initial data of a definition: a shared literal or a per-instance
/// factory. The factory is evaluated once per instance at creation.
#[derive(Clone)]
pub enum DataSource {
    Value(Map<String, Value>),
    Factory(DataFn),
}

/// Process-wide defaults. Per-definition `use_config` entries override
/// these where both exist.
#[derive(Clone, Default)]
pub struct GlobalConfig {
    /// Diff against host data and send path patches instead of whole
    /// values.
    pub optimize_path: bool,
    /// Seed `listenPageScroll` for every page definition.
    pub enable_page_scroll: bool,
    /// Fallback error handler, consulted when no app-level handler is
    /// installed.
    pub error_handler: Option<ErrorHandlerFn>,
}

/// User-facing definition options for an app, page or component.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub setup: Option<SetupFn>,
    pub data: Option<DataSource>,
    pub props: Option<PropsOptions>,
    pub emits: Option<EmitsOptions>,
    /// Lifecycle members and event handlers, by member name.
    pub members: IndexMap<String, Callback>,
    pub use_config: IndexMap<String, bool>,
    /// Props whose object values are merged member-by-member on update
    /// instead of being replaced.
    pub deep_change_props: Vec<String>,
    /// Marks definitions produced by the composition compile path.
    pub composition: bool,
    /// Compile metadata: child scope id to owner binding key, for refs.
    pub ref_mapping: IndexMap<String, String>,
    /// Second-stage setup emitted by the template compiler. Its callable
    /// bindings get inline-argument wrapping before they join the state.
    pub setup_after: Option<SetupFn>,
    /// Render-scope function producing slot content for the owner.
    pub init_after_render: Option<AfterRenderFn>,
}

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bare-function form: the whole definition is one `setup`.
    pub fn from_setup(
        setup: impl Fn(&mut Runtime, &InstanceHandle, &Map<String, Value>) -> anyhow::Result<SetupResult>
            + 'static,
    ) -> Self {
        Self::new().setup(setup).composition()
    }

    pub fn setup(
        mut self,
        setup: impl Fn(&mut Runtime, &InstanceHandle, &Map<String, Value>) -> anyhow::Result<SetupResult>
            + 'static,
    ) -> Self {
        self.setup = Some(Rc::new(setup));
        self
    }

    pub fn data_value(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(DataSource::Value(data));
        self
    }

    pub fn data_factory(
        mut self,
        factory: impl Fn(&mut Runtime, &InstanceHandle) -> anyhow::Result<Map<String, Value>> + 'static,
    ) -> Self {
        self.data = Some(DataSource::Factory(Rc::new(factory)));
        self
    }

    pub fn props(mut self, props: PropsOptions) -> Self {
        self.props = Some(props);
        self
    }

    pub fn emits(mut self, emits: EmitsOptions) -> Self {
        self.emits = Some(emits);
        self
    }

    /// Add a member by name: a lifecycle member such as `onLoad`, or an
    /// event handler the view refers to.
    pub fn member(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Runtime, &InstanceHandle, &[Value]) -> anyhow::Result<Option<Value>> + 'static,
    ) -> Self {
        self.members.insert(name.into(), Rc::new(f));
        self
    }

    pub fn config(mut self, name: impl Into<String>, on: bool) -> Self {
        self.use_config.insert(name.into(), on);
        self
    }

    pub fn deep_change_prop(mut self, name: impl Into<String>) -> Self {
        self.deep_change_props.push(name.into());
        self
    }

    pub fn composition(mut self) -> Self {
        self.composition = true;
        self
    }

    /// Map a child scope id to the binding that should receive its ref.
    pub fn ref_entry(mut self, scope_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.ref_mapping.insert(scope_id.into(), key.into());
        self
    }

    pub fn setup_after(
        mut self,
        f: impl Fn(&mut Runtime, &InstanceHandle, &Map<String, Value>) -> anyhow::Result<SetupResult>
            + 'static,
    ) -> Self {
        self.setup_after = Some(Rc::new(f));
        self
    }

    pub fn after_render(
        mut self,
        f: impl Fn(&mut Runtime, &InstanceHandle, &mut SlotScope) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.init_after_render = Some(Rc::new(f));
        self
    }
}

/// A definition after advice application and lifecycle wiring. Shared by
/// every instance created from it.
pub struct ResolvedOptions {
    pub kind: InstanceKind,
    /// Definition path, when registered under one. Used for naming.
    pub path: Option<String>,
    pub setup: Option<SetupFn>,
    pub data: Option<DataSource>,
    pub props: NormalizedProps,
    pub emits: Option<NormalizedEmits>,
    /// Members left over after lifecycle extraction; the host-callable
    /// methods, advice already applied.
    pub methods: IndexMap<String, Callback>,
    /// Lifecycle members declared in the options, advice already applied.
    pub lifecycle: HashMap<Lifecycle, Callback>,
    pub use_config: IndexMap<String, bool>,
    pub deep_change_props: HashSet<String>,
    pub composition: bool,
    pub ref_mapping: IndexMap<String, String>,
    pub setup_after: Option<SetupFn>,
    pub init_after_render: Option<AfterRenderFn>,
    /// Lifecycles that dispatch on instances of this definition.
    wired: HashSet<Lifecycle>,
    /// Single-slot lifecycles open for composition registration, which
    /// requires the config switch on and no options-level member.
    single_open: HashSet<Lifecycle>,
}

impl ResolvedOptions {
    /// Whether composition registration of `lc` is allowed.
    pub fn is_wired(&self, lc: Lifecycle) -> bool {
        if lc.is_single() {
            self.single_open.contains(&lc)
        } else {
            self.wired.contains(&lc)
        }
    }

    /// Whether `lc` dispatches at all on this definition. Mount and
    /// update hooks have no per-kind rule on pages yet still fire there;
    /// only the app never sees them.
    pub(crate) fn dispatches(&self, lc: Lifecycle) -> bool {
        if !lc.is_app_hook() && !lc.is_page_hook() {
            return self.kind != InstanceKind::App;
        }
        self.wired.contains(&lc)
    }

    /// Per-definition config switch with global fallback.
    pub(crate) fn config_enabled(&self, name: &str, global: &GlobalConfig) -> bool {
        match self.use_config.get(name) {
            Some(&on) => on,
            None => match name {
                "optimizePath" => global.optimize_path,
                _ => false,
            },
        }
    }
}

/// Resolve raw options for `kind`: seed config defaults, apply the
/// advice tables, then wire lifecycle members.
pub(crate) fn resolve_options(
    rt: &mut Runtime,
    kind: InstanceKind,
    path: Option<String>,
    options: ComponentOptions,
) -> Rc<ResolvedOptions> {
    let ComponentOptions {
        setup,
        data,
        props,
        emits,
        mut members,
        mut use_config,
        deep_change_props,
        composition,
        ref_mapping,
        setup_after,
        init_after_render,
    } = options;

    if kind == InstanceKind::Page
        && rt.global_config().enable_page_scroll
        && !use_config.contains_key("listenPageScroll")
    {
        use_config.insert("listenPageScroll".to_owned(), true);
    }

    aop::apply_kind_aop(rt, kind, &mut members);

    let mut lifecycle = HashMap::new();
    let mut wired = HashSet::new();
    let mut single_open = HashSet::new();
    for rule in rules_for(kind) {
        let origin = members.shift_remove(rule.member);
        let lc = rule.lifecycle;
        match lc.config() {
            None => {
                wired.insert(lc);
                if let Some(origin) = origin {
                    lifecycle.insert(lc, origin);
                }
            }
            Some(config) => {
                let config_on = use_config.get(config).copied().unwrap_or(false);
                match origin {
                    Some(origin) => {
                        wired.insert(lc);
                        lifecycle.insert(lc, origin);
                    }
                    None if config_on => {
                        wired.insert(lc);
                        if lc.is_single() {
                            single_open.insert(lc);
                        }
                    }
                    None => {}
                }
            }
        }
    }

    let props = normalize_props_options(rt, props);
    let emits = normalize_emits_options(emits);

    Rc::new(ResolvedOptions {
        kind,
        path,
        setup,
        data,
        props,
        emits,
        methods: members,
        lifecycle,
        use_config,
        deep_change_props: deep_change_props.into_iter().collect(),
        composition,
        ref_mapping,
        setup_after,
        init_after_render,
        wired,
        single_open,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn noop() -> Callback {
        Rc::new(|_, _, _| Ok(None))
    }

    #[test]
    fn test_plain_lifecycles_are_always_wired() {
        let mut rt = Runtime::new(FakeHost::new());
        let resolved = resolve_options(&mut rt, InstanceKind::Page, None, ComponentOptions::new());
        assert!(resolved.dispatches(Lifecycle::PageLoad));
        assert!(resolved.dispatches(Lifecycle::PageShow));
        assert!(resolved.lifecycle.is_empty());
    }

    #[test]
    fn test_config_gated_lifecycle_needs_switch_or_member() {
        let mut rt = Runtime::new(FakeHost::new());

        let bare = resolve_options(&mut rt, InstanceKind::Page, None, ComponentOptions::new());
        assert!(!bare.dispatches(Lifecycle::PageScroll));

        let via_config = resolve_options(
            &mut rt,
            InstanceKind::Page,
            None,
            ComponentOptions::new().config("listenPageScroll", true),
        );
        assert!(via_config.dispatches(Lifecycle::PageScroll));

        let via_member = resolve_options(
            &mut rt,
            InstanceKind::Page,
            None,
            ComponentOptions::new().member("onPageScroll", |_, _, _| Ok(None)),
        );
        assert!(via_member.dispatches(Lifecycle::PageScroll));
    }

    #[test]
    fn test_single_slot_opens_only_without_member() {
        let mut rt = Runtime::new(FakeHost::new());

        let open = resolve_options(
            &mut rt,
            InstanceKind::Page,
            None,
            ComponentOptions::new().config("canShareAppMessage", true),
        );
        assert!(open.is_wired(Lifecycle::ShareAppMessage));

        let mut with_member = ComponentOptions::new().config("canShareAppMessage", true);
        with_member.members.insert("onShareAppMessage".into(), noop());
        let closed = resolve_options(&mut rt, InstanceKind::Page, None, with_member);
        assert!(!closed.is_wired(Lifecycle::ShareAppMessage));
        assert!(closed.dispatches(Lifecycle::ShareAppMessage));
    }

    #[test]
    fn test_lifecycle_members_leave_the_method_table() {
        let mut rt = Runtime::new(FakeHost::new());
        let options = ComponentOptions::new()
            .member("onLoad", |_, _, _| Ok(None))
            .member("handleTap", |_, _, _| Ok(None));
        let resolved = resolve_options(&mut rt, InstanceKind::Page, None, options);
        assert!(resolved.lifecycle.contains_key(&Lifecycle::PageLoad));
        assert!(!resolved.methods.contains_key("onLoad"));
        assert!(resolved.methods.contains_key("handleTap"));
    }

    #[test]
    fn test_global_page_scroll_seeds_pages() {
        let mut rt = Runtime::new(FakeHost::new());
        rt.global_config_mut().enable_page_scroll = true;
        let resolved = resolve_options(&mut rt, InstanceKind::Page, None, ComponentOptions::new());
        assert!(resolved.dispatches(Lifecycle::PageScroll));
    }
}
