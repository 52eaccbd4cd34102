//! Developer warnings.
//!
//! Warnings go through the app-level `warn_handler` when one is
//! installed, otherwise to [`log::warn!`]. A context stack names the
//! instance a warning belongs to, since most warnings fire from deep
//! inside dispatch where the triggering instance is not a parameter.

use std::rc::Rc;

use crate::instance::{format_instance_name, InstanceHandle};
use crate::runtime::Runtime;

/// App-level warning handler. Receives the message, the instance the
/// warning was attributed to, and a short origin trace.
pub type WarnHandlerFn = Rc<dyn Fn(&mut Runtime, &str, Option<&InstanceHandle>, &str)>;

pub(crate) fn push_warning_context(rt: &mut Runtime, instance: InstanceHandle) {
    rt.warning_stack.push(instance);
}

pub(crate) fn pop_warning_context(rt: &mut Runtime) {
    rt.warning_stack.pop();
}

/// Emit a runtime warning attributed to the instance on top of the
/// warning-context stack, falling back to the current instance.
pub fn warn(rt: &mut Runtime, msg: &str) {
    rt.reactivity.pause_tracking();

    let instance = rt
        .warning_stack
        .last()
        .cloned()
        .or_else(|| rt.current_instance());

    let trace = instance
        .as_ref()
        .map(|i| format!(" (in {})", format_instance_name(&i.borrow())))
        .unwrap_or_default();

    let handler = instance
        .as_ref()
        .and_then(|i| i.borrow().app_context().borrow().config.warn_handler.clone());

    match handler {
        Some(handler) => handler(rt, msg, instance.as_ref(), &trace),
        None => log::warn!("{msg}{trace}"),
    }

    rt.reactivity.reset_tracking();
}
