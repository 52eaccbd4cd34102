//! Compile-help: the contract between generated view code and the
//! runtime.
//!
//! The template compiler cannot call into component code directly, so it
//! leaves breadcrumbs: reserved props carrying scope ids and inline
//! event arguments, dataset markers, a second-stage setup, and a render
//! scope function for slot content. This module is the runtime half of
//! that contract.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::{call_with_error_handling, ErrorSource};
use crate::instance::{Binding, Callback, InstanceHandle, PARENT_ID_PROP};
use crate::refs::{init_ref_owner, set_ref};
use crate::runtime::Runtime;
use crate::warning::warn;

/// Scope id of a compiled child, `for_<id>-<index>` inside repeats.
pub const SCOPE_ID_PROP: &str = "acornScopeId";
/// Inline event arguments recorded by the compiler.
pub const EVENT_SCOPE_PROP: &str = "acornEventScopeId";
/// Set when the child renders slot content from its owner.
pub const USE_SLOT_PROP: &str = "acornUseSlot";
/// Registers the child under a name on the owning page's refs.
pub const PAGE_REF_PROP: &str = "acornPageRef";
/// Dataset marker asking for inline-argument injection.
pub const ARG_KEY: &str = "acorn_arg";

/// Reserved props every definition implicitly declares.
pub(crate) const COMPILE_PROP_KEYS: &[&str] = &[
    SCOPE_ID_PROP,
    EVENT_SCOPE_PROP,
    USE_SLOT_PROP,
    PAGE_REF_PROP,
    PARENT_ID_PROP,
];

/// The compile-generated render-scope function. Receives a fresh
/// [`SlotScope`] to fill with the slot content this instance renders for
/// its owner.
pub type AfterRenderFn =
    Rc<dyn Fn(&mut Runtime, &InstanceHandle, &mut SlotScope) -> anyhow::Result<()>>;

/// A parsed scope id.
pub struct ParsedScopeId {
    pub id: String,
    pub index: Option<usize>,
    pub is_for: bool,
}

/// Split a scope id into its template id and repeat index.
pub fn parse_scope_id(raw: &str) -> ParsedScopeId {
    if let Some(rest) = raw.strip_prefix("for_") {
        let mut parts = rest.splitn(2, '-');
        let id = parts.next().unwrap_or_default().to_owned();
        let index = parts.next().and_then(|s| s.parse().ok());
        return ParsedScopeId {
            id,
            index,
            is_for: true,
        };
    }
    ParsedScopeId {
        id: raw.to_owned(),
        index: None,
        is_for: false,
    }
}

/// The inline arguments the compiler recorded for handler `name`, if
/// any. Entries of the event-scope prop look like `["name", arg...]`.
pub(crate) fn compile_args_for(instance: &InstanceHandle, name: &str) -> Option<Vec<Value>> {
    let i = instance.borrow();
    let list = i.props().get(EVENT_SCOPE_PROP)?.as_array()?;
    for entry in list {
        let Some(entry) = entry.as_array() else {
            continue;
        };
        if entry.first().and_then(Value::as_str) == Some(name) {
            return Some(entry.iter().skip(1).cloned().collect());
        }
    }
    None
}

/// Wrap a handler from the second-stage setup so that composition
/// envelopes are unwrapped and compiler-recorded inline arguments are
/// appended before it runs.
fn wrap_event_fn(name: &str, cb: Callback) -> Callback {
    let name = name.to_owned();
    Rc::new(move |rt, instance, args| {
        if let Some(event) = args.first() {
            if let Some(wrap) = crate::events::composition_wrap(event) {
                let emitted: Vec<Value> = wrap
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let compile = wrap
                    .get("compileArgs")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let mut call_args = emitted;
                if compile {
                    call_args.extend(compile_args_for(instance, &name).unwrap_or_default());
                }
                return cb(rt, instance, &call_args);
            }

            let wants_inline = event
                .get("currentTarget")
                .and_then(|t| t.get("dataset"))
                .and_then(|d| d.get(ARG_KEY))
                .is_some();
            if wants_inline {
                if let Some(extra) = compile_args_for(instance, &name) {
                    let mut call_args = vec![event.clone()];
                    call_args.extend(extra);
                    return cb(rt, instance, &call_args);
                }
            }
        }
        cb(rt, instance, args)
    })
}

/// Slot content an instance renders on behalf of its owner, grouped by
/// slot name.
#[derive(Default)]
pub struct SlotScope {
    entries: IndexMap<String, Vec<Value>>,
}

impl SlotScope {
    /// Append slot props for `name`, tagged with the rendering scope id.
    pub fn set(&mut self, name: impl Into<String>, id: &str, props: Value) {
        self.entries
            .entry(name.into())
            .or_default()
            .push(json!({"id": id, "props": props}));
    }

    pub fn clear(&mut self, name: &str) {
        self.entries.shift_remove(name);
    }

    pub(crate) fn into_entries(self) -> IndexMap<String, Vec<Value>> {
        self.entries
    }
}

/// Run the compile-generated stages after `setup`: merge the second
/// stage's bindings (handlers wrapped for inline arguments), build the
/// slot scope, then register refs.
pub(crate) fn setup_call_compile_help(rt: &mut Runtime, instance: &InstanceHandle) {
    if let Some(after) = instance.borrow().options().setup_after.clone() {
        let props = instance.borrow().props().clone();
        rt.push_current_instance(instance.clone());
        rt.reactivity.pause_tracking();
        let result = call_with_error_handling(rt, Some(instance), ErrorSource::Setup, |rt| {
            after(rt, instance, &props)
        });
        rt.reactivity.reset_tracking();
        rt.pop_current_instance();

        if let Some(bindings) = result {
            let mut i = instance.borrow_mut();
            for (name, binding) in bindings {
                let binding = match binding {
                    Binding::Method(cb) => Binding::Method(wrap_event_fn(&name, cb)),
                    other => other,
                };
                i.setup_state.insert(name, binding);
            }
        }
    }

    set_after_render(rt, instance);
    init_ref_owner(instance);
    set_ref(rt, instance, false);
}

/// Run the render-scope function and hand its slot content to the
/// owner, keyed by this instance's scope id. Each run starts from a
/// fresh scope.
fn set_after_render(rt: &mut Runtime, instance: &InstanceHandle) {
    let Some(render) = instance.borrow().options().init_after_render.clone() else {
        return;
    };
    let scope_id = instance
        .borrow()
        .props()
        .get(SCOPE_ID_PROP)
        .and_then(Value::as_str)
        .map(str::to_owned);
    let Some(scope_id) = scope_id else {
        return;
    };

    let mut scope = SlotScope::default();
    rt.push_current_instance(instance.clone());
    rt.reactivity.pause_tracking();
    call_with_error_handling(rt, Some(instance), ErrorSource::Setup, |rt| {
        render(rt, instance, &mut scope)
    });
    rt.reactivity.reset_tracking();
    rt.pop_current_instance();

    if let Some(owner) = instance.borrow().parent_handle() {
        owner
            .borrow_mut()
            .slots_scope
            .insert(scope_id, scope.into_entries());
    }
}

/// Render-helper for repeats: arrays and strings iterate by index,
/// a positive integer `n` counts 1..=n, objects iterate entries.
pub fn each(
    rt: &mut Runtime,
    source: &Value,
    mut render: impl FnMut(&Value, &Value, usize) -> Value,
) -> Vec<Value> {
    match source {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| render(item, &json!(i), i))
            .collect(),
        Value::String(s) => s
            .chars()
            .enumerate()
            .map(|(i, ch)| render(&json!(ch.to_string()), &json!(i), i))
            .collect(),
        Value::Number(n) => match n.as_u64() {
            Some(count) => (0..count)
                .map(|i| render(&json!(i + 1), &json!(i), i as usize))
                .collect(),
            None => {
                warn(
                    rt,
                    &format!("each() range expects a positive integer but got {n}."),
                );
                Vec::new()
            }
        },
        Value::Object(map) => map
            .iter()
            .enumerate()
            .map(|(i, (key, value))| render(value, &json!(key), i))
            .collect(),
        _ => Vec::new(),
    }
}
