//! Component events: emit declarations, the composition emit envelope,
//! and the argument normalization every host event passes through.
//!
//! Handlers written against the composition API receive the emitted
//! arguments directly instead of the host's event object. To get there,
//! emits are wrapped in a marker envelope on the way out, and a private
//! before advice on every page and component member unwraps it on the
//! way in, rewriting the argument list in place. The same advice fixes
//! up dataset casing using the key list the template compiler leaves in
//! `acorn_data_keys`.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::aop::{register_private_aop, AdviceTable, AdviceWrap};
use crate::instance::InstanceHandle;
use crate::registry::{InstanceKind, Vid};
use crate::runtime::Runtime;
use crate::util::{camelize, to_handler_key};
use crate::warning::warn;

/// Marker key of the composition emit envelope.
pub const COMPOSITION_EMIT_KEY: &str = "acornCompositionEmit";
/// Dataset key listing the original (possibly hyphenated) data names.
pub const DATA_KEYS_KEY: &str = "acorn_data_keys";

/// Validator for emitted arguments.
pub type EmitValidatorFn = Rc<dyn Fn(&[Value]) -> bool>;

/// Raw `emits` declarations.
#[derive(Clone)]
pub enum EmitsOptions {
    /// `emits: ["select", "close"]`
    Names(Vec<String>),
    /// Event names with optional validators.
    Map(IndexMap<String, Option<EmitValidatorFn>>),
}

/// Normalized form: event name to optional validator.
pub type NormalizedEmits = IndexMap<String, Option<EmitValidatorFn>>;

pub(crate) fn normalize_emits_options(options: Option<EmitsOptions>) -> Option<NormalizedEmits> {
    match options? {
        EmitsOptions::Names(names) => {
            Some(names.into_iter().map(|name| (name, None)).collect())
        }
        EmitsOptions::Map(map) => Some(map),
    }
}

/// Declaration check for an outgoing event: warn when it is neither in
/// `emits` nor backed by an `onX` handler prop, and run its validator.
pub(crate) fn validate_emit(rt: &mut Runtime, instance: &InstanceHandle, event: &str, args: &[Value]) {
    let options = instance.borrow().options();
    let Some(emits) = &options.emits else {
        return;
    };

    match emits.get(event) {
        None => {
            let handler = to_handler_key(&camelize(event));
            if !options.props.has(&handler) {
                warn(
                    rt,
                    &format!(
                        "Component emitted event \"{event}\" but it is neither declared in the \
                         emits option nor as an \"{handler}\" prop."
                    ),
                );
            }
        }
        Some(Some(validator)) => {
            if !validator(args) {
                warn(
                    rt,
                    &format!("Invalid event arguments: event validation failed for event \"{event}\"."),
                );
            }
        }
        Some(None) => {}
    }
}

/// Build the composition emit envelope.
pub fn wrap_emit_detail(args: &[Value], compile_args: bool) -> Value {
    json!({
        COMPOSITION_EMIT_KEY: true,
        "args": args,
        "compileArgs": compile_args,
    })
}

/// The envelope inside an incoming event, if any. Looks through
/// `event.detail` first, then at the event itself for direct calls.
pub(crate) fn composition_wrap(event: &Value) -> Option<&Map<String, Value>> {
    fn as_wrap(value: &Value) -> Option<&Map<String, Value>> {
        let map = value.as_object()?;
        map.get(COMPOSITION_EMIT_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
            .then_some(map)
    }
    event
        .get("detail")
        .and_then(as_wrap)
        .or_else(|| as_wrap(event))
}

/// Emit `event` from a component toward its view-layer binding.
pub fn emit(rt: &mut Runtime, instance: &InstanceHandle, event: &str, args: &[Value]) {
    validate_emit(rt, instance, event, args);
    let (composition, vid) = {
        let i = instance.borrow();
        (i.options().composition, i.vid().clone())
    };
    let detail = if composition {
        wrap_emit_detail(args, false)
    } else {
        args.first().cloned().unwrap_or(Value::Null)
    };
    rt.host.trigger_event(&vid, event, detail);
}

/// Before advice applied to every unlisted page and component member:
/// unwrap composition emits into plain arguments, otherwise normalize
/// dataset casing on the event object.
pub(crate) fn wrap_event_handle(
    _rt: &mut Runtime,
    _instance: &InstanceHandle,
    args: &mut Vec<Value>,
) -> anyhow::Result<Option<Value>> {
    let Some(event) = args.first().cloned() else {
        return Ok(None);
    };

    if let Some(wrap) = composition_wrap(&event) {
        let compile_args = wrap
            .get("compileArgs")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !compile_args {
            let emitted = wrap
                .get("args")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            args.clear();
            args.extend(emitted);
            return Ok(None);
        }
    }

    if let Some(event) = args.first_mut() {
        for target_key in ["target", "currentTarget"] {
            let Some(dataset) = event
                .get(target_key)
                .and_then(|t| t.get("dataset"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            if !dataset.contains_key(DATA_KEYS_KEY) {
                continue;
            }
            let normalized = normalize_dataset(dataset, false);
            if let Some(target) = event.get_mut(target_key).and_then(Value::as_object_mut) {
                target.insert("dataset".to_owned(), Value::Object(normalized));
            }
        }
    }
    Ok(None)
}

/// Restore camelCase dataset keys. The view layer lowercases data
/// attribute names; the compiler records the originals in
/// `acorn_data_keys` so they can be mapped back. With `retain` unset the
/// lowercased duplicates and the bookkeeping key are dropped.
pub fn normalize_dataset(dataset: &Map<String, Value>, retain: bool) -> Map<String, Value> {
    let mut out = dataset.clone();
    let Some(keys) = dataset.get(DATA_KEYS_KEY).and_then(Value::as_str) else {
        return out;
    };

    for name in keys.split(',') {
        let camelized = camelize(name);
        let lowercase = camelized.to_lowercase();
        if out.contains_key(&lowercase) && !out.contains_key(&camelized) {
            if let Some(value) = out.get(&lowercase).cloned() {
                out.insert(camelized.clone(), value);
            }
        }
        if !retain && lowercase != camelized {
            out.shift_remove(&lowercase);
        }
    }
    if !retain {
        out.shift_remove(DATA_KEYS_KEY);
    }
    out
}

/// The live app instance, preferring the one the launch advice recorded.
pub fn use_app(rt: &Runtime) -> Option<InstanceHandle> {
    rt.current_app
        .clone()
        .or_else(|| rt.registry.instance(&Vid::App))
}

/// The foreground page, if any. Quiet when none is.
pub fn current_page(rt: &Runtime) -> Option<InstanceHandle> {
    rt.current_page.clone()
}

/// Install the runtime's private advice: current-app/current-page
/// bookkeeping on launch and show, and event-argument normalization on
/// everything that looks like a handler.
pub(crate) fn init_emit_wrap(rt: &mut Runtime) {
    let app_table = AdviceTable::new().wrap(
        "onLaunch",
        AdviceWrap::before(|rt, instance, _args| {
            rt.current_app = Some(instance.clone());
            Ok(None)
        }),
    );
    register_private_aop(rt, InstanceKind::App, app_table);

    let mut page_table = AdviceTable::new();
    for member in [
        "onLoad",
        "onHide",
        "onReady",
        "onUnload",
        "onTitleClick",
        "onPullDownRefresh",
        "onReachBottom",
        "onTabItemTap",
        "onPageScroll",
        "onShareAppMessage",
        "onShareTimeline",
        "onAddToFavorites",
        "onResize",
        "onSaveExitState",
    ] {
        page_table = page_table.untouched(member);
    }
    page_table = page_table
        .wrap(
            "onShow",
            AdviceWrap::before(|rt, instance, _args| {
                rt.current_page = Some(instance.clone());
                Ok(None)
            }),
        )
        .catch_all(AdviceWrap::before(wrap_event_handle));
    register_private_aop(rt, InstanceKind::Page, page_table);

    let component_table = AdviceTable::new().catch_all(AdviceWrap::before(wrap_event_handle));
    register_private_aop(rt, InstanceKind::Component, component_table);
}
