//! Host boundary.
//!
//! The runtime never renders anything itself. It hands the host flat
//! patches of dotted/bracketed data paths through [`Host::set_data`] and
//! learns about applied commits through [`crate::Runtime::complete_commit`].
//! Everything the view layer does with those patches is the host's
//! business.

use indexmap::IndexMap;
use serde_json::Value;

use crate::registry::Vid;

/// Flat data patch keyed by path expressions such as `user.name` or
/// `items[3].label`. Insertion order is preserved so hosts can apply
/// keys deterministically.
pub type DataPatch = IndexMap<String, Value>;

/// Token identifying one `set_data` round trip. The host hands it back
/// via [`crate::Runtime::complete_commit`] when the patch has been
/// applied and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub(crate) u64);

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "commit:{}", self.0)
    }
}

/// The surface the embedding host must provide.
///
/// `set_data` is fire-and-forget from the runtime's point of view; the
/// completion callback registered for the [`CommitId`] runs when the host
/// reports the commit back, never inline.
pub trait Host {
    /// Apply `patch` to the view data of the instance identified by `vid`.
    ///
    /// The host must eventually call [`crate::Runtime::complete_commit`]
    /// with `commit`, exactly once, after the data has reached the view.
    fn set_data(&mut self, vid: &Vid, patch: DataPatch, commit: CommitId);

    /// A snapshot of the host-side data object for `vid`, if the host
    /// keeps one. Returning `None` disables path-level diffing for the
    /// instance and the runtime falls back to sending whole values.
    fn host_data(&self, vid: &Vid) -> Option<Value>;

    /// Make a callable member visible on the host-side object so the view
    /// layer can route events to it by name.
    fn expose_method(&mut self, vid: &Vid, name: &str) {
        let _ = (vid, name);
    }

    /// Fire a component event into the view layer. The host routes it
    /// through the view's event bindings and calls back into the runtime
    /// for whichever handler is bound.
    fn trigger_event(&mut self, vid: &Vid, event: &str, detail: Value) {
        let _ = (vid, event, detail);
    }
}
