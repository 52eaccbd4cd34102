//! Lifecycle dispatch across a full app / page / component session,
//! driven through the public host-facing entry points only.
//!
//! Run with: cargo test -p acorn --test lifecycle

use std::cell::RefCell;
use std::rc::Rc;

use acorn::testing::{pump, FakeHost};
use acorn::{
    register_hook, ComponentOptions, InstanceHandle, Lifecycle, Runtime, RuntimeError, SetupResult,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn tag(
    log: &Log,
    name: &'static str,
) -> impl Fn(&mut Runtime, &InstanceHandle, &[Value]) -> anyhow::Result<Option<Value>> + use<> {
    let log = log.clone();
    move |_, _, _| {
        log.borrow_mut().push(name);
        Ok(None)
    }
}

#[test]
fn test_session_hook_order_through_mount() {
    let host = FakeHost::new();
    let mut rt = Runtime::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    rt.define_app(ComponentOptions::new().member("onLaunch", tag(&log, "launch")));

    let setup_log = log.clone();
    rt.define_page(
        "pages/home",
        ComponentOptions::new()
            .member("onLoad", tag(&log, "load"))
            .member("onShow", tag(&log, "show"))
            .setup(move |rt, _instance, _props| {
                setup_log.borrow_mut().push("setup");
                let before = setup_log.clone();
                register_hook(
                    rt,
                    Lifecycle::BeforeMount,
                    Rc::new(move |_, _, _| {
                        before.borrow_mut().push("before-mount");
                        Ok(None)
                    }),
                );
                let mounted = setup_log.clone();
                register_hook(
                    rt,
                    Lifecycle::Mounted,
                    Rc::new(move |_, _, _| {
                        mounted.borrow_mut().push("mounted");
                        Ok(None)
                    }),
                );
                Ok(SetupResult::new())
            }),
    );

    rt.launch_app(json!({})).unwrap();
    rt.load_page("page-1", "pages/home", json!({})).unwrap();
    pump(&mut rt, &host);
    rt.page_event("page-1", Lifecycle::PageShow, &[]).unwrap();

    assert_eq!(
        *log.borrow(),
        ["launch", "setup", "load", "before-mount", "mounted", "show"]
    );
}

#[test]
fn test_unmount_hooks_fire_once_in_order() {
    let host = FakeHost::new();
    let mut rt = Runtime::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    rt.define_app(ComponentOptions::new());
    rt.define_page("pages/home", ComponentOptions::new());
    let setup_log = log.clone();
    rt.define_component(
        "widgets/badge",
        ComponentOptions::new()
            .member("beforeUnmount", tag(&log, "before-unmount"))
            .member("unmounted", tag(&log, "unmounted-member"))
            .setup(move |rt, _, _| {
                let hook_log = setup_log.clone();
                register_hook(
                    rt,
                    Lifecycle::Unmounted,
                    Rc::new(move |_, _, _| {
                        hook_log.borrow_mut().push("unmounted-hook");
                        Ok(None)
                    }),
                );
                Ok(SetupResult::new())
            }),
    );

    rt.launch_app(json!({})).unwrap();
    rt.load_page("page-1", "pages/home", json!({})).unwrap();
    let badge = rt.attach_component("widgets/badge", Map::new()).unwrap();
    pump(&mut rt, &host);
    log.borrow_mut().clear();

    let vid = badge.borrow().vid().to_string();
    rt.detach_component(&vid).unwrap();
    assert_eq!(
        *log.borrow(),
        ["before-unmount", "unmounted-member", "unmounted-hook"]
    );

    // Teardown removed the registry entry; a second detach is an error,
    // not a second round of hooks.
    assert!(matches!(
        rt.detach_component(&vid),
        Err(RuntimeError::UnknownInstance(_))
    ));
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn test_share_hook_single_slot_returns_payload() {
    let host = FakeHost::new();
    let mut rt = Runtime::new(host.clone());

    rt.define_app(ComponentOptions::new());
    rt.define_page(
        "pages/feed",
        ComponentOptions::new()
            .config("canShareAppMessage", true)
            .setup(move |rt, _, _| {
                register_hook(
                    rt,
                    Lifecycle::ShareAppMessage,
                    Rc::new(|_, _, _| Ok(Some(json!({"title": "from the feed"})))),
                );
                // The slot holds one hook; this registration is dropped.
                register_hook(
                    rt,
                    Lifecycle::ShareAppMessage,
                    Rc::new(|_, _, _| Ok(Some(json!({"title": "ignored"})))),
                );
                Ok(SetupResult::new())
            }),
    );

    rt.launch_app(json!({})).unwrap();
    rt.load_page("page-1", "pages/feed", json!({})).unwrap();

    let payload = rt
        .page_event("page-1", Lifecycle::ShareAppMessage, &[])
        .unwrap();
    assert_eq!(payload, Some(json!({"title": "from the feed"})));
}

#[test]
fn test_component_delegates_page_hooks_until_detach() {
    let host = FakeHost::new();
    let mut rt = Runtime::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    rt.define_app(ComponentOptions::new());
    rt.define_page("pages/home", ComponentOptions::new());
    let setup_log = log.clone();
    rt.define_component(
        "widgets/tracker",
        ComponentOptions::new().setup(move |rt, _, _| {
            let hook_log = setup_log.clone();
            register_hook(
                rt,
                Lifecycle::PageShow,
                Rc::new(move |_, _, _| {
                    hook_log.borrow_mut().push("component-saw-show");
                    Ok(None)
                }),
            );
            Ok(SetupResult::new())
        }),
    );

    rt.launch_app(json!({})).unwrap();
    rt.load_page("page-1", "pages/home", json!({})).unwrap();
    let tracker = rt.attach_component("widgets/tracker", Map::new()).unwrap();
    pump(&mut rt, &host);

    rt.page_event("page-1", Lifecycle::PageShow, &[]).unwrap();
    assert_eq!(*log.borrow(), ["component-saw-show"]);

    let vid = tracker.borrow().vid().to_string();
    rt.detach_component(&vid).unwrap();
    rt.page_event("page-1", Lifecycle::PageShow, &[]).unwrap();
    assert_eq!(
        log.borrow().len(),
        1,
        "delegated hook must not outlive the component"
    );
}

#[test]
fn test_app_events_need_a_launched_app() {
    let host = FakeHost::new();
    let mut rt = Runtime::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    assert!(matches!(
        rt.app_event(Lifecycle::AppHide, &[]),
        Err(RuntimeError::UnknownInstance(_))
    ));

    rt.define_app(ComponentOptions::new().member("onHide", tag(&log, "hide")));
    rt.launch_app(json!({})).unwrap();
    rt.app_event(Lifecycle::AppHide, &[]).unwrap();
    assert_eq!(*log.borrow(), ["hide"]);
}
