//! Instance lifecycle and update-scheduling core for applet hosts.
//!
//! The host owns the view layer; this crate owns everything between a
//! definition and the flat data patches the view applies:
//! - define app, page and component options, launch and load them
//! - run the lifecycle dispatch, including composition hooks and the
//!   kind-scoped advice tables
//! - coalesce state changes per instance and diff them into minimal
//!   `setData` patches
//! - serialize commits per instance and re-enter when the host reports
//!   a commit applied
//!
//! Everything runs on the host's thread. There is no hidden global: the
//! [`Runtime`] is the context object, every entry point takes it `&mut`,
//! and deferred work re-enters through [`Runtime::flush`] and
//! [`Runtime::complete_commit`].
//!
//! ```
//! use acorn::{ComponentOptions, Runtime};
//! # use acorn::{CommitId, DataPatch, Host, Vid};
//! # struct NullHost;
//! # impl Host for NullHost {
//! #     fn set_data(&mut self, _: &Vid, _: DataPatch, _: CommitId) {}
//! #     fn host_data(&self, _: &Vid) -> Option<serde_json::Value> {
//! #         None
//! #     }
//! # }
//! let mut rt = Runtime::new(NullHost);
//! rt.define_app(ComponentOptions::new());
//! rt.define_page("pages/home", ComponentOptions::new());
//! rt.launch_app(serde_json::json!({}))?;
//! rt.load_page("page-1", "pages/home", serde_json::json!({}))?;
//! rt.flush();
//! # Ok::<(), acorn::RuntimeError>(())
//! ```

pub mod aop;
pub mod app;
pub mod diff;
pub mod error;
pub mod events;
pub mod host;
pub mod instance;
pub mod lifecycle;
pub mod options;
pub mod props;
pub mod reactivity;
pub mod refs;
pub mod registry;
pub mod render;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod template;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod unsupported;
pub mod util;
pub mod warning;

pub use app::{inject, inject_or, provide, App, AppConfig, AppContext, Plugin};
pub use diff::{diff, Diff};
pub use error::{ErrorHandlerFn, ErrorSource, RuntimeError};
pub use events::{current_page, emit, use_app, EmitsOptions};
pub use host::{CommitId, DataPatch, Host};
pub use instance::{Binding, Callback, Instance, InstanceHandle};
pub use lifecycle::{register_hook, Lifecycle};
pub use options::{ComponentOptions, DataSource, GlobalConfig, SetupResult};
pub use props::{PropDefault, PropOptions, PropType, PropsOptions};
pub use registry::{InstanceKind, Vid};
pub use runtime::Runtime;
pub use scheduler::Job;
pub use warning::WarnHandlerFn;
