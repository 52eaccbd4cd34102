//! Outgoing component events and the argument normalization on the way
//! back in: emit declarations, the composition envelope, and dataset
//! casing fixup.
//!
//! Run with: cargo test -p acorn --test component_events

use std::cell::RefCell;
use std::rc::Rc;

use acorn::events::{wrap_emit_detail, EmitValidatorFn, DATA_KEYS_KEY};
use acorn::testing::{pump, FakeHost};
use acorn::{emit, ComponentOptions, EmitsOptions, InstanceHandle, Runtime, SetupResult};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

fn component_session(
    host: &FakeHost,
    options: ComponentOptions,
) -> (Runtime, InstanceHandle) {
    let mut rt = Runtime::new(host.clone());
    rt.define_app(ComponentOptions::new());
    rt.define_page("pages/home", ComponentOptions::new());
    rt.define_component("widgets/picker", options);
    rt.launch_app(json!({})).unwrap();
    rt.load_page("page-1", "pages/home", json!({})).unwrap();
    let picker = rt.attach_component("widgets/picker", Map::new()).unwrap();
    pump(&mut rt, host);
    (rt, picker)
}

fn capture_warnings(rt: &mut Runtime) -> Rc<RefCell<Vec<String>>> {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = warnings.clone();
    rt.app()
        .set_warn_handler(Rc::new(move |_, msg, _, _| {
            sink.borrow_mut().push(msg.to_owned());
        }));
    warnings
}

#[test]
fn test_composition_emit_wraps_arguments() {
    let host = FakeHost::new();
    let (mut rt, picker) = component_session(
        &host,
        ComponentOptions::from_setup(|_, _, _| Ok(SetupResult::new()))
            .emits(EmitsOptions::Names(vec!["select".into()])),
    );
    let vid = picker.borrow().vid().clone();

    emit(&mut rt, &picker, "select", &[json!(7), json!("row")]);

    let events = host.events();
    assert_eq!(events.len(), 1);
    let (event_vid, name, detail) = &events[0];
    assert_eq!(*event_vid, vid);
    assert_eq!(name, "select");
    assert_eq!(detail["acornCompositionEmit"], json!(true));
    assert_eq!(detail["args"], json!([7, "row"]));
    assert_eq!(detail["compileArgs"], json!(false));
}

#[test]
fn test_options_component_emits_first_argument_as_detail() {
    let host = FakeHost::new();
    let (mut rt, picker) = component_session(
        &host,
        ComponentOptions::new().emits(EmitsOptions::Names(vec!["select".into()])),
    );

    emit(&mut rt, &picker, "select", &[json!({"id": 3}), json!("extra")]);

    let events = host.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].2, json!({"id": 3}));
}

#[test]
fn test_undeclared_emit_warns_but_still_fires() {
    let host = FakeHost::new();
    let (mut rt, picker) = component_session(
        &host,
        ComponentOptions::new()
            .emits(EmitsOptions::Names(vec!["select".into()]))
            .member("fire", |rt, instance, _| {
                emit(rt, instance, "close", &[]);
                Ok(None)
            }),
    );
    let warnings = capture_warnings(&mut rt);

    let vid = picker.borrow().vid().to_string();
    rt.handle_event(&vid, "fire", &[]).unwrap();

    assert!(warnings
        .borrow()
        .iter()
        .any(|m| m.contains("\"close\"") && m.contains("emits")));
    assert_eq!(host.events().len(), 1, "the event still reaches the host");
}

#[test]
fn test_emit_validator_flags_bad_arguments() {
    let host = FakeHost::new();
    let mut emits: IndexMap<String, Option<EmitValidatorFn>> = IndexMap::new();
    emits.insert(
        "pick".to_owned(),
        Some(Rc::new(|args: &[Value]| args.first().is_some_and(Value::is_number)) as EmitValidatorFn),
    );
    let (mut rt, picker) = component_session(
        &host,
        ComponentOptions::new()
            .emits(EmitsOptions::Map(emits))
            .member("good", |rt, instance, _| {
                emit(rt, instance, "pick", &[json!(1)]);
                Ok(None)
            })
            .member("bad", |rt, instance, _| {
                emit(rt, instance, "pick", &[json!("nope")]);
                Ok(None)
            }),
    );
    let warnings = capture_warnings(&mut rt);
    let vid = picker.borrow().vid().to_string();

    rt.handle_event(&vid, "good", &[]).unwrap();
    assert!(warnings.borrow().is_empty());

    rt.handle_event(&vid, "bad", &[]).unwrap();
    assert!(warnings
        .borrow()
        .iter()
        .any(|m| m.contains("validation failed")));
    assert_eq!(host.events().len(), 2, "validation never blocks the event");
}

#[test]
fn test_handler_receives_unwrapped_composition_arguments() {
    let host = FakeHost::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new(host.clone());

    rt.define_app(ComponentOptions::new());
    let sink = seen.clone();
    rt.define_page(
        "pages/home",
        ComponentOptions::new().member("onPick", move |_, _, args| {
            sink.borrow_mut().push(args.to_vec());
            Ok(None)
        }),
    );
    rt.launch_app(json!({})).unwrap();
    let page = rt.load_page("page-1", "pages/home", json!({})).unwrap();
    pump(&mut rt, &host);

    // The event object a host builds when a child's composition emit is
    // bound to this handler.
    let event = json!({
        "type": "pick",
        "detail": wrap_emit_detail(&[json!(7), json!("row")], false),
    });
    rt.handle_event(&page.borrow().vid().to_string(), "onPick", &[event])
        .unwrap();

    assert_eq!(*seen.borrow(), vec![vec![json!(7), json!("row")]]);
}

#[test]
fn test_handler_dataset_keys_restored() {
    let host = FakeHost::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new(host.clone());

    rt.define_app(ComponentOptions::new());
    let sink = seen.clone();
    rt.define_page(
        "pages/home",
        ComponentOptions::new().member("onTap", move |_, _, args| {
            sink.borrow_mut().push(args[0]["target"]["dataset"].clone());
            Ok(None)
        }),
    );
    rt.launch_app(json!({})).unwrap();
    let page = rt.load_page("page-1", "pages/home", json!({})).unwrap();
    pump(&mut rt, &host);

    let event = json!({
        "target": {"dataset": {"rowindex": 2, DATA_KEYS_KEY: "row-index"}},
        "detail": {},
    });
    rt.handle_event(&page.borrow().vid().to_string(), "onTap", &[event])
        .unwrap();

    assert_eq!(*seen.borrow(), vec![json!({"rowIndex": 2})]);
}
