//! Named access to instance state.
//!
//! A key resolves through fixed tiers: setup bindings, then data, then
//! declared props, then the loose context bag. The winning tier is
//! memoized per key so repeated access skips the probing; a key that
//! misses every tier is memoized too and from then on only the fallback
//! chain (context bag, app global properties) is consulted.

use serde_json::Value;

use crate::instance::{Binding, InstanceHandle};
use crate::runtime::Runtime;
use crate::warning::warn;

/// Which tier a key resolved to on first access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Other,
    Setup,
    Data,
    Props,
    Context,
}

/// Reserved `$`-prefixed names that refuse writes.
const RESERVED: &[&str] = &["data", "props", "setupState", "refs", "options", "vid", "scope"];

/// Resolve `key` on an instance.
pub fn instance_get(instance: &InstanceHandle, key: &str) -> Option<Binding> {
    if !key.starts_with('$') {
        let cached = instance.borrow().access_cache.get(key).copied();
        match cached {
            Some(AccessTier::Setup) => {
                return instance.borrow().setup_state().get(key).cloned();
            }
            Some(AccessTier::Data) => {
                return instance.borrow().data().get(key).cloned().map(Binding::Value);
            }
            Some(AccessTier::Props) => {
                return instance.borrow().props().get(key).cloned().map(Binding::Value);
            }
            Some(AccessTier::Context) => {
                return instance.borrow().ctx.get(key).cloned().map(Binding::Value);
            }
            // A memoized miss goes straight to the fallback chain.
            Some(AccessTier::Other) => {}
            None => {
                if let Some(found) = probe(instance, key) {
                    return Some(found);
                }
                instance
                    .borrow_mut()
                    .access_cache
                    .insert(key.to_owned(), AccessTier::Other);
            }
        }
    }

    let ctx_hit = instance.borrow().ctx.get(key).cloned();
    if let Some(value) = ctx_hit {
        return Some(Binding::Value(value));
    }
    let global = instance
        .borrow()
        .app_context()
        .borrow()
        .config
        .global_properties
        .get(key)
        .cloned();
    global.map(Binding::Value)
}

fn probe(instance: &InstanceHandle, key: &str) -> Option<Binding> {
    let mut i = instance.borrow_mut();
    if let Some(binding) = i.setup_state.get(key) {
        let binding = binding.clone();
        i.access_cache.insert(key.to_owned(), AccessTier::Setup);
        return Some(binding);
    }
    if let Some(value) = i.data.get(key) {
        let value = value.clone();
        i.access_cache.insert(key.to_owned(), AccessTier::Data);
        return Some(Binding::Value(value));
    }
    if i.options().props.has(key) {
        let value = i.props.get(key).cloned();
        i.access_cache.insert(key.to_owned(), AccessTier::Props);
        return value.map(Binding::Value);
    }
    if let Some(value) = i.ctx.get(key) {
        let value = value.clone();
        i.access_cache.insert(key.to_owned(), AccessTier::Context);
        return Some(Binding::Value(value));
    }
    None
}

/// Write `key` on an instance. Setup bindings and data accept the write;
/// props and reserved names refuse it with a warning; anything else
/// lands in the context bag.
pub fn instance_set(rt: &mut Runtime, instance: &InstanceHandle, key: &str, value: Value) -> bool {
    {
        let mut i = instance.borrow_mut();
        if i.setup_state.contains_key(key) {
            i.setup_state.insert(key.to_owned(), Binding::Value(value));
            return true;
        }
        if i.data.contains_key(key) {
            i.data.insert(key.to_owned(), value);
            return true;
        }
    }

    let is_prop = {
        let i = instance.borrow();
        i.props.contains_key(key) || i.options().props.has(key)
    };
    if is_prop {
        warn(
            rt,
            &format!("Attempting to mutate prop \"{key}\". Props are readonly."),
        );
        return false;
    }

    if let Some(rest) = key.strip_prefix('$') {
        if RESERVED.contains(&rest) {
            warn(
                rt,
                &format!("Attempting to mutate reserved property \"{key}\"."),
            );
            return false;
        }
    }

    instance.borrow_mut().ctx.insert(key.to_owned(), value);
    true
}

/// Whether `key` resolves anywhere on the instance.
pub fn instance_has(instance: &InstanceHandle, key: &str) -> bool {
    let i = instance.borrow();
    if matches!(i.access_cache.get(key), Some(tier) if *tier != AccessTier::Other) {
        return true;
    }
    i.data.contains_key(key)
        || i.setup_state.contains_key(key)
        || i.options().props.has(key)
        || i.ctx.contains_key(key)
        || i.app_context()
            .borrow()
            .config
            .global_properties
            .contains_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_instance, FakeHost};
    use serde_json::json;

    fn fixture() -> (Runtime, InstanceHandle) {
        let mut rt = Runtime::new(FakeHost::new());
        let instance = scratch_instance(&mut rt);
        (rt, instance)
    }

    #[test]
    fn test_setup_state_shadows_data() {
        let (_rt, instance) = fixture();
        {
            let mut i = instance.borrow_mut();
            i.data.insert("title".into(), json!("from data"));
            i.setup_state
                .insert("title".into(), Binding::Value(json!("from setup")));
        }
        let got = instance_get(&instance, "title").unwrap();
        assert_eq!(got.as_value(), Some(&json!("from setup")));
    }

    #[test]
    fn test_resolution_is_memoized() {
        let (_rt, instance) = fixture();
        instance
            .borrow_mut()
            .data
            .insert("count".into(), json!(1));
        assert!(instance_get(&instance, "count").is_some());
        assert_eq!(
            instance.borrow().access_cache.get("count"),
            Some(&AccessTier::Data)
        );

        // Later setup-state arrivals are shadowed by the memoized tier.
        instance
            .borrow_mut()
            .setup_state
            .insert("count".into(), Binding::Value(json!(2)));
        let got = instance_get(&instance, "count").unwrap();
        assert_eq!(got.as_value(), Some(&json!(1)));
    }

    #[test]
    fn test_missing_key_memoizes_and_uses_fallback() {
        let (_rt, instance) = fixture();
        assert!(instance_get(&instance, "ghost").is_none());
        assert_eq!(
            instance.borrow().access_cache.get("ghost"),
            Some(&AccessTier::Other)
        );

        // A context-bag write after the miss is still reachable through
        // the fallback chain.
        instance.borrow_mut().ctx.insert("ghost".into(), json!(5));
        let got = instance_get(&instance, "ghost").unwrap();
        assert_eq!(got.as_value(), Some(&json!(5)));
    }

    #[test]
    fn test_set_writes_tiers_in_order() {
        let (mut rt, instance) = fixture();
        instance.borrow_mut().data.insert("n".into(), json!(1));
        assert!(instance_set(&mut rt, &instance, "n", json!(2)));
        assert_eq!(instance.borrow().data.get("n"), Some(&json!(2)));

        // Unknown keys land in the context bag.
        assert!(instance_set(&mut rt, &instance, "loose", json!(true)));
        assert_eq!(instance.borrow().ctx.get("loose"), Some(&json!(true)));
    }

    #[test]
    fn test_prop_writes_are_refused() {
        let (mut rt, instance) = fixture();
        instance.borrow_mut().props.insert("label".into(), json!("a"));
        assert!(!instance_set(&mut rt, &instance, "label", json!("b")));
        assert_eq!(instance.borrow().props.get("label"), Some(&json!("a")));
    }

    #[test]
    fn test_reserved_writes_are_refused() {
        let (mut rt, instance) = fixture();
        assert!(!instance_set(&mut rt, &instance, "$props", json!(0)));
        assert!(instance_set(&mut rt, &instance, "$custom", json!(0)));
    }

    #[test]
    fn test_global_properties_reachable_from_fallback() {
        let (_rt, instance) = fixture();
        instance
            .borrow()
            .app_context()
            .borrow_mut()
            .config
            .global_properties
            .insert("$brand".into(), json!("acorn"));
        let got = instance_get(&instance, "$brand").unwrap();
        assert_eq!(got.as_value(), Some(&json!("acorn")));
        assert!(instance_has(&instance, "$brand"));
    }
}
