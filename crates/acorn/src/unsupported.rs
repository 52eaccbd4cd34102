//! Stubs for definition helpers the applet side cannot honor.
//!
//! The view layer owns templates, styles and element registration, so
//! these helpers have nothing to attach to here. Each one warns in
//! debug builds, names the API, and otherwise behaves as the identity.

use indexmap::IndexMap;

use crate::options::ComponentOptions;
use crate::runtime::Runtime;
use crate::warning::warn;

fn warn_unsupported(name: &str) {
    if cfg!(debug_assertions) {
        log::warn!("`{name}` is not supported on the applet side");
    }
}

/// Async loading is a view-layer concern; the definition is used as-is.
pub fn define_async_component(options: ComponentOptions) -> ComponentOptions {
    warn_unsupported("define_async_component");
    options
}

/// Custom-element registration does not exist on the applet side; the
/// definition is used as-is.
pub fn define_custom_element(options: ComponentOptions) -> ComponentOptions {
    warn_unsupported("define_custom_element");
    options
}

/// CSS modules are compiled away before the runtime sees a definition,
/// so the lookup always comes back empty.
pub fn use_css_module(rt: &mut Runtime, _name: Option<&str>) -> IndexMap<String, String> {
    if cfg!(debug_assertions) {
        match rt.current_instance() {
            None => warn(rt, "`use_css_module` must be called inside setup()."),
            Some(_) => warn(rt, "Current instance does not have CSS modules injected."),
        }
    }
    IndexMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[test]
    fn test_stubs_are_identity_and_quiet() {
        let options = ComponentOptions::new().composition();
        let passed = define_async_component(options);
        assert!(passed.composition);
        let passed = define_custom_element(passed);
        assert!(passed.composition);

        let mut rt = Runtime::new(FakeHost::new());
        assert!(use_css_module(&mut rt, None).is_empty());
        assert!(use_css_module(&mut rt, Some("$style")).is_empty());
    }
}
