//! Error taxonomy and routing.
//!
//! User callbacks return `anyhow::Result`; the runtime never lets one
//! failure take down the dispatch loop. Every failure is tagged with the
//! [`ErrorSource`] it came from and routed up the error-capture chain,
//! then to the app-level handler, then to the log.

use std::rc::Rc;

use anyhow::Error;

use crate::instance::InstanceHandle;
use crate::lifecycle::Lifecycle;
use crate::runtime::Runtime;

/// Errors the runtime itself raises at its public boundary, as opposed
/// to errors user callbacks produce.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no definition registered for `{0}`")]
    UnknownDefinition(String),
    #[error("no instance registered for `{0}`")]
    UnknownInstance(String),
    #[error("app instance has already launched")]
    AlreadyLaunched,
    #[error("`{name}` is not a callable member of `{vid}`")]
    UnknownHandler { vid: String, name: String },
}

/// Where a captured error came from. Carried through the capture chain
/// and into the app-level handler as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Setup,
    Lifecycle(Lifecycle),
    WatchCallback,
    NativeEventHandler,
    ComponentEventHandler,
    AppErrorHandler,
    AppWarnHandler,
    FunctionRef,
    Scheduler,
    NextTick,
    AdviceBefore,
    AdviceAfter,
}

impl std::fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSource::Setup => f.write_str("setup function"),
            ErrorSource::Lifecycle(lc) => write!(f, "{} hook", lc.hook_name()),
            ErrorSource::WatchCallback => f.write_str("watcher callback"),
            ErrorSource::NativeEventHandler => f.write_str("native event handler"),
            ErrorSource::ComponentEventHandler => f.write_str("component event handler"),
            ErrorSource::AppErrorHandler => f.write_str("app errorHandler"),
            ErrorSource::AppWarnHandler => f.write_str("app warnHandler"),
            ErrorSource::FunctionRef => f.write_str("ref function"),
            ErrorSource::Scheduler => f.write_str("scheduler flush"),
            ErrorSource::NextTick => f.write_str("nextTick callback"),
            ErrorSource::AdviceBefore => f.write_str("before advice"),
            ErrorSource::AdviceAfter => f.write_str("after advice"),
        }
    }
}

/// App or global level error handler.
pub type ErrorHandlerFn = Rc<dyn Fn(&mut Runtime, &Error, Option<&InstanceHandle>, &str)>;

/// Run `f`, routing any error through [`handle_error`]. Returns `None`
/// when the call failed; the error never propagates past this point.
pub(crate) fn call_with_error_handling<T>(
    rt: &mut Runtime,
    instance: Option<&InstanceHandle>,
    source: ErrorSource,
    f: impl FnOnce(&mut Runtime) -> anyhow::Result<T>,
) -> Option<T> {
    match f(rt) {
        Ok(value) => Some(value),
        Err(err) => {
            handle_error(rt, instance, source, err);
            None
        }
    }
}

/// Route an error: ancestors' error-capture hooks first (any returning
/// `false` stops propagation), then the app-level handler, then the log.
pub fn handle_error(
    rt: &mut Runtime,
    instance: Option<&InstanceHandle>,
    source: ErrorSource,
    err: Error,
) {
    let source_text = source.to_string();

    if let Some(instance) = instance {
        let mut cursor = instance.borrow().parent_handle();
        while let Some(ancestor) = cursor {
            let hooks = ancestor.borrow().hooks_for(Lifecycle::ErrorCaptured);
            for hook in hooks {
                let args = [
                    serde_json::Value::String(format!("{err:#}")),
                    serde_json::Value::String(source_text.clone()),
                ];
                match hook(rt, &ancestor, &args) {
                    Ok(Some(serde_json::Value::Bool(false))) => return,
                    Ok(_) => {}
                    Err(capture_err) => {
                        log_error(ErrorSource::Lifecycle(Lifecycle::ErrorCaptured), &capture_err);
                    }
                }
            }
            cursor = ancestor.borrow().parent_handle();
        }

        let handler = instance.borrow().app_context().borrow().config.error_handler.clone();
        if let Some(handler) = handler {
            handler(rt, &err, Some(instance), &source_text);
            return;
        }
    }

    if let Some(handler) = rt.global_config().error_handler.clone() {
        handler(rt, &err, instance, &source_text);
        return;
    }

    log_error(source, &err);
}

pub(crate) fn log_error(source: ErrorSource, err: &Error) {
    log::error!("unhandled error in {source}: {err:#}");
}
