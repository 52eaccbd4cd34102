//! Template refs.
//!
//! A component that carries a scope id registers itself on its owner
//! when it mounts: into the owning page's ref table when `acornPageRef`
//! names it, otherwise through the owner's ref mapping, which points
//! either at a ref callback in the owner's setup state or at a named
//! slot in the owner's ref table. Unmounting writes `null` through the
//! same path.
//!
//! Refs hold the referenced instance's vid as a string; resolving a vid
//! back to an instance goes through the registry.

use serde_json::Value;

use crate::error::{call_with_error_handling, ErrorSource};
use crate::instance::{Binding, InstanceHandle};
use crate::render::merge_data_change;
use crate::runtime::Runtime;
use crate::template::{parse_scope_id, PAGE_REF_PROP, SCOPE_ID_PROP};

/// Where a child's ref lands on its owner: the binding key, and whether
/// that binding is a ref callback rather than a slot.
#[derive(Clone)]
pub(crate) struct HelpRef {
    pub key: String,
    pub is_func: bool,
}

/// Build the owner-side ref mapping from the definition's compile
/// metadata. Must run after setup so callback-ness is known.
pub(crate) fn init_ref_owner(instance: &InstanceHandle) {
    let mapping = instance.borrow().options().ref_mapping.clone();
    if mapping.is_empty() {
        return;
    }
    let mut i = instance.borrow_mut();
    for (id, key) in mapping {
        let is_func = matches!(i.setup_state.get(&key), Some(Binding::Method(_)));
        i.help_refs.insert(id, HelpRef { key, is_func });
    }
}

/// Register (or on `unmount`, clear) this instance on its owner's refs.
pub(crate) fn set_ref(rt: &mut Runtime, instance: &InstanceHandle, unmount: bool) {
    let (scope_id, page_ref, vid) = {
        let i = instance.borrow();
        (
            i.props().get(SCOPE_ID_PROP).and_then(Value::as_str).map(str::to_owned),
            i.props().get(PAGE_REF_PROP).and_then(Value::as_str).map(str::to_owned),
            i.vid().clone(),
        )
    };
    let Some(scope_id) = scope_id else {
        return;
    };
    let value = if unmount {
        Value::Null
    } else {
        Value::String(vid.to_string())
    };

    if let Some(page_ref) = page_ref {
        if let Some(page) = instance.borrow().current_page(rt) {
            page.borrow_mut().refs.insert(page_ref, value);
        }
        return;
    }

    let Some(owner) = instance.borrow().parent_handle() else {
        return;
    };
    let parsed = parse_scope_id(&scope_id);
    let Some(help) = owner.borrow().help_refs.get(&parsed.id).cloned() else {
        return;
    };

    if help.is_func {
        let callback = match owner.borrow().setup_state.get(&help.key) {
            Some(Binding::Method(cb)) => Some(cb.clone()),
            _ => None,
        };
        if let Some(callback) = callback {
            let args = [value];
            call_with_error_handling(rt, Some(&owner), ErrorSource::FunctionRef, |rt| {
                callback(rt, &owner, &args)
            });
        }
        return;
    }

    if let Some(index) = parsed.index {
        // Repeated refs collect into an array slot, one entry per index.
        let mut o = owner.borrow_mut();
        let slot = o
            .refs
            .entry(help.key.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Some(items) = slot.as_array_mut() {
            while items.len() <= index {
                items.push(Value::Null);
            }
            items[index] = value;
        }
        return;
    }

    owner.borrow_mut().refs.insert(help.key.clone(), value.clone());
    let mirrored = owner.borrow().setup_state.contains_key(&help.key);
    if mirrored {
        owner
            .borrow_mut()
            .setup_state
            .insert(help.key.clone(), Binding::Value(value));
        merge_data_change(rt, &owner, &help.key);
    }
}

/// Clear every ref this instance registered. Runs on unmount.
pub(crate) fn clear_ref_value(rt: &mut Runtime, instance: &InstanceHandle) {
    set_ref(rt, instance, true);
}

/// A named ref on the foreground page, exposed to the app instance as
/// `$getGlobalRef`.
pub fn global_page_ref(rt: &Runtime, name: &str) -> Option<Value> {
    let page = rt.current_page.clone()?;
    let value = page.borrow().refs.get(name).cloned();
    value
}
