//! Lifecycle hooks: the enum, per-kind wiring rules, composition-style
//! registration, and dispatch.
//!
//! Hooks live in three stores on an instance: ordered lists for normal
//! hooks, a single slot for hooks whose return value feeds the host (a
//! second registration warns and is dropped), and, on pages, a
//! delegation map that holds page-level hooks registered by child
//! components, keyed by the component's vid so unmounting prunes them.
//!
//! Every hook runs with dependency tracking paused and the owning
//! instance current, and its errors are captured rather than propagated.

use serde_json::Value;

use crate::error::{call_with_error_handling, ErrorSource};
use crate::instance::{Callback, InstanceHandle};
use crate::registry::InstanceKind;
use crate::runtime::Runtime;
use crate::warning::warn;

/// Every lifecycle event the runtime dispatches, across all three
/// instance kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    // Component-scoped.
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
    Activated,
    Deactivated,
    ErrorCaptured,
    RenderTracked,
    RenderTriggered,
    ServerPrefetch,
    // Page-scoped.
    PageLoad,
    PageShow,
    PageHide,
    PageReady,
    PageUnload,
    TitleClick,
    PullDownRefresh,
    ReachBottom,
    TabItemTap,
    PageScroll,
    ShareAppMessage,
    // App-scoped.
    AppLaunch,
    AppShow,
    AppHide,
    AppError,
    PageNotFound,
    UnhandledRejection,
}

impl Lifecycle {
    /// The registration-function name, used in warnings and error tags.
    pub fn hook_name(&self) -> &'static str {
        match self {
            Lifecycle::BeforeCreate => "beforeCreate",
            Lifecycle::Created => "created",
            Lifecycle::BeforeMount => "onBeforeMount",
            Lifecycle::Mounted => "onMounted",
            Lifecycle::BeforeUpdate => "onBeforeUpdate",
            Lifecycle::Updated => "onUpdated",
            Lifecycle::BeforeUnmount => "onBeforeUnmount",
            Lifecycle::Unmounted => "onUnmounted",
            Lifecycle::Activated => "onActivated",
            Lifecycle::Deactivated => "onDeactivated",
            Lifecycle::ErrorCaptured => "onErrorCaptured",
            Lifecycle::RenderTracked => "onRenderTracked",
            Lifecycle::RenderTriggered => "onRenderTriggered",
            Lifecycle::ServerPrefetch => "onServerPrefetch",
            Lifecycle::PageLoad => "onLoad",
            Lifecycle::PageShow => "onShow",
            Lifecycle::PageHide => "onHide",
            Lifecycle::PageReady => "onReady",
            Lifecycle::PageUnload => "onUnload",
            Lifecycle::TitleClick => "onTitleClick",
            Lifecycle::PullDownRefresh => "onPullDownRefresh",
            Lifecycle::ReachBottom => "onReachBottom",
            Lifecycle::TabItemTap => "onTabItemTap",
            Lifecycle::PageScroll => "onPageScroll",
            Lifecycle::ShareAppMessage => "onShareAppMessage",
            Lifecycle::AppLaunch => "onLaunch",
            Lifecycle::AppShow => "onAppShow",
            Lifecycle::AppHide => "onAppHide",
            Lifecycle::AppError => "onAppError",
            Lifecycle::PageNotFound => "onPageNotFound",
            Lifecycle::UnhandledRejection => "onUnhandledRejection",
        }
    }

    pub fn is_app_hook(&self) -> bool {
        matches!(
            self,
            Lifecycle::AppLaunch
                | Lifecycle::AppShow
                | Lifecycle::AppHide
                | Lifecycle::AppError
                | Lifecycle::PageNotFound
                | Lifecycle::UnhandledRejection
        )
    }

    pub fn is_page_hook(&self) -> bool {
        matches!(
            self,
            Lifecycle::PageLoad
                | Lifecycle::PageShow
                | Lifecycle::PageHide
                | Lifecycle::PageReady
                | Lifecycle::PageUnload
                | Lifecycle::TitleClick
                | Lifecycle::PullDownRefresh
                | Lifecycle::ReachBottom
                | Lifecycle::TabItemTap
                | Lifecycle::PageScroll
                | Lifecycle::ShareAppMessage
        )
    }

    /// The `use_config` switch that must be on before this hook is wired,
    /// if it has one.
    pub fn config(&self) -> Option<&'static str> {
        match self {
            Lifecycle::PageScroll => Some("listenPageScroll"),
            Lifecycle::ShareAppMessage => Some("canShareAppMessage"),
            _ => None,
        }
    }

    /// Whether the hook holds a single callback whose return value is
    /// handed back to the host.
    pub fn is_single(&self) -> bool {
        matches!(self, Lifecycle::ShareAppMessage)
    }
}

/// One entry of the per-kind wiring table: which options member maps to
/// which lifecycle, and under which configuration gate.
pub(crate) struct LifecycleRule {
    pub member: &'static str,
    pub lifecycle: Lifecycle,
}

pub(crate) const APP_RULES: &[LifecycleRule] = &[
    LifecycleRule { member: "onLaunch", lifecycle: Lifecycle::AppLaunch },
    LifecycleRule { member: "onShow", lifecycle: Lifecycle::AppShow },
    LifecycleRule { member: "onHide", lifecycle: Lifecycle::AppHide },
    LifecycleRule { member: "onError", lifecycle: Lifecycle::AppError },
    LifecycleRule { member: "onPageNotFound", lifecycle: Lifecycle::PageNotFound },
    LifecycleRule { member: "onUnhandledRejection", lifecycle: Lifecycle::UnhandledRejection },
];

pub(crate) const PAGE_RULES: &[LifecycleRule] = &[
    LifecycleRule { member: "onLoad", lifecycle: Lifecycle::PageLoad },
    LifecycleRule { member: "onShow", lifecycle: Lifecycle::PageShow },
    LifecycleRule { member: "onHide", lifecycle: Lifecycle::PageHide },
    LifecycleRule { member: "onReady", lifecycle: Lifecycle::PageReady },
    LifecycleRule { member: "onUnload", lifecycle: Lifecycle::PageUnload },
    LifecycleRule { member: "onTitleClick", lifecycle: Lifecycle::TitleClick },
    LifecycleRule { member: "onPullDownRefresh", lifecycle: Lifecycle::PullDownRefresh },
    LifecycleRule { member: "onReachBottom", lifecycle: Lifecycle::ReachBottom },
    LifecycleRule { member: "onTabItemTap", lifecycle: Lifecycle::TabItemTap },
    LifecycleRule { member: "onPageScroll", lifecycle: Lifecycle::PageScroll },
    LifecycleRule { member: "onShareAppMessage", lifecycle: Lifecycle::ShareAppMessage },
];

pub(crate) const COMPONENT_RULES: &[LifecycleRule] = &[
    LifecycleRule { member: "beforeCreate", lifecycle: Lifecycle::BeforeCreate },
    LifecycleRule { member: "created", lifecycle: Lifecycle::Created },
    LifecycleRule { member: "beforeMount", lifecycle: Lifecycle::BeforeMount },
    LifecycleRule { member: "mounted", lifecycle: Lifecycle::Mounted },
    LifecycleRule { member: "beforeUpdate", lifecycle: Lifecycle::BeforeUpdate },
    LifecycleRule { member: "updated", lifecycle: Lifecycle::Updated },
    LifecycleRule { member: "beforeUnmount", lifecycle: Lifecycle::BeforeUnmount },
    LifecycleRule { member: "unmounted", lifecycle: Lifecycle::Unmounted },
    LifecycleRule { member: "activated", lifecycle: Lifecycle::Activated },
    LifecycleRule { member: "deactivated", lifecycle: Lifecycle::Deactivated },
    LifecycleRule { member: "errorCaptured", lifecycle: Lifecycle::ErrorCaptured },
    LifecycleRule { member: "renderTracked", lifecycle: Lifecycle::RenderTracked },
    LifecycleRule { member: "renderTriggered", lifecycle: Lifecycle::RenderTriggered },
    LifecycleRule { member: "serverPrefetch", lifecycle: Lifecycle::ServerPrefetch },
];

pub(crate) fn rules_for(kind: InstanceKind) -> &'static [LifecycleRule] {
    match kind {
        InstanceKind::App => APP_RULES,
        InstanceKind::Page => PAGE_RULES,
        InstanceKind::Component => COMPONENT_RULES,
    }
}

/// Register `hook` for `lc` on the current instance. This is the
/// composition-style entry point and must be called during `setup()`.
///
/// Page hooks registered from a component are delegated to the owning
/// page and dispatched with the component current. Config-gated hooks
/// are rejected with a warning when the switch is off.
pub fn register_hook(rt: &mut Runtime, lc: Lifecycle, hook: Callback) {
    let Some(instance) = rt.current_instance() else {
        warn(
            rt,
            &format!(
                "`{}()` hook can only be called during setup() of a page or component.",
                lc.hook_name()
            ),
        );
        return;
    };

    let kind = instance.borrow().kind();

    if lc.is_app_hook() {
        if kind != InstanceKind::App {
            warn(
                rt,
                &format!("`{}()` hook only works in the app instance.", lc.hook_name()),
            );
            return;
        }
        instance.borrow_mut().push_hook(lc, hook);
        return;
    }

    if lc.is_page_hook() {
        match kind {
            InstanceKind::Page => {
                if !config_allows(rt, &instance, lc) {
                    return;
                }
                if lc.is_single() {
                    register_single(rt, &instance, lc, hook);
                } else {
                    instance.borrow_mut().push_hook(lc, hook);
                }
            }
            InstanceKind::Component => {
                let Some(page) = instance.borrow().current_page(rt) else {
                    warn(
                        rt,
                        &format!(
                            "`{}()` hook could not find the owning page.",
                            lc.hook_name()
                        ),
                    );
                    return;
                };
                if !config_allows(rt, &page, lc) {
                    return;
                }
                let vid = instance.borrow().vid().clone();
                page.borrow_mut().push_delegated_hook(lc, vid, &instance, hook);
            }
            InstanceKind::App => {
                warn(
                    rt,
                    &format!(
                        "`{}()` hook does not apply to the app instance.",
                        lc.hook_name()
                    ),
                );
            }
        }
        return;
    }

    // Component-scoped hooks also apply to pages, which mount and update
    // the same way, but never to the app.
    if kind == InstanceKind::App {
        warn(
            rt,
            &format!(
                "`{}()` hook does not apply to the app instance.",
                lc.hook_name()
            ),
        );
        return;
    }
    instance.borrow_mut().push_hook(lc, hook);
}

/// Whether the target's options allow registering `lc`. Config-gated
/// hooks require the switch to have been on when the options were
/// resolved; everything else passes.
fn config_allows(rt: &mut Runtime, target: &InstanceHandle, lc: Lifecycle) -> bool {
    let Some(config) = lc.config() else {
        return true;
    };
    let wired = target.borrow().options().is_wired(lc);
    if !wired {
        warn(
            rt,
            &format!(
                "`{}()` hook only works when '{}' is configured to true.",
                lc.hook_name(),
                config
            ),
        );
    }
    wired
}

fn register_single(rt: &mut Runtime, instance: &InstanceHandle, lc: Lifecycle, hook: Callback) {
    let already = instance.borrow().single_hook(lc).is_some();
    if already {
        warn(
            rt,
            &format!("`{}()` can only be called once.", lc.hook_name()),
        );
        return;
    }
    instance.borrow_mut().set_single_hook(lc, hook);
}

/// Run one hook with the standard envelope: skipped if the owner is
/// unmounted, tracking paused, owner current, errors captured.
pub(crate) fn run_hook(
    rt: &mut Runtime,
    owner: &InstanceHandle,
    lc: Lifecycle,
    hook: &Callback,
    args: &[Value],
) -> Option<Value> {
    if owner.borrow().is_unmounted() {
        return None;
    }
    rt.reactivity.pause_tracking();
    rt.push_current_instance(owner.clone());
    let result = call_with_error_handling(rt, Some(owner), ErrorSource::Lifecycle(lc), |rt| {
        hook(rt, owner, args)
    });
    rt.pop_current_instance();
    rt.reactivity.reset_tracking();
    result.flatten()
}

/// Dispatch `lc` to every composition hook on `instance`: its own list
/// first, then, on pages, the hooks components delegated to it, in
/// registration order.
pub(crate) fn call_hook(rt: &mut Runtime, instance: &InstanceHandle, lc: Lifecycle, args: &[Value]) {
    let own = instance.borrow().hooks_for(lc);
    for hook in &own {
        run_hook(rt, instance, lc, hook, args);
    }

    let delegated = instance.borrow().delegated_hooks_for(lc);
    for (component, hook) in &delegated {
        let Some(component) = component.upgrade() else {
            continue;
        };
        run_hook(rt, &component, lc, hook, args);
    }
}

/// Dispatch a single-slot hook and hand its return value back.
pub(crate) fn call_single_hook(
    rt: &mut Runtime,
    instance: &InstanceHandle,
    lc: Lifecycle,
    args: &[Value],
) -> Option<Value> {
    let hook = instance.borrow().single_hook(lc)?;
    run_hook(rt, instance, lc, &hook, args)
}
