//! Reactivity seam.
//!
//! The runtime does not own a dependency-tracking engine. It drives one
//! through the [`Reactivity`] trait: effect scopes group everything a
//! component sets up so teardown is one call, and tracking is paused
//! around lifecycle hooks so host callbacks never register as
//! dependencies. [`LocalReactivity`] is the built-in implementation and
//! is enough for hosts without their own reactive graph.

/// Identifier for an effect scope.
pub type ScopeId = u64;

/// Hooks the runtime needs from a reactivity engine.
pub trait Reactivity {
    /// Suspend dependency tracking. Calls nest.
    fn pause_tracking(&mut self);

    /// Undo the most recent [`pause_tracking`](Reactivity::pause_tracking).
    fn reset_tracking(&mut self);

    /// Create a scope. A detached scope is not stopped when its parent
    /// scope stops.
    fn create_scope(&mut self, detached: bool) -> ScopeId;

    /// Make `scope` the collection target for newly created effects.
    fn enter_scope(&mut self, scope: ScopeId);

    /// Leave `scope`, restoring the previously entered one.
    fn leave_scope(&mut self, scope: ScopeId);

    /// Stop `scope` and every non-detached scope created under it.
    fn stop_scope(&mut self, scope: ScopeId);

    /// Whether `scope` has not been stopped.
    fn is_scope_active(&self, scope: ScopeId) -> bool;
}

#[derive(Debug, Default)]
struct ScopeState {
    active: bool,
    children: Vec<ScopeId>,
    detached: bool,
}

/// In-process [`Reactivity`] implementation.
///
/// Keeps a scope tree and a pause depth. There is no dependency graph
/// behind it; state invalidation is driven explicitly through
/// [`crate::Runtime::notify_state_changed`].
#[derive(Debug, Default)]
pub struct LocalReactivity {
    scopes: Vec<ScopeState>,
    entered: Vec<ScopeId>,
    pause_depth: u32,
}

impl LocalReactivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether tracking is currently paused. Mostly useful to assert the
    /// pause/reset pairing around hook dispatch.
    pub fn tracking_paused(&self) -> bool {
        self.pause_depth > 0
    }

    fn state(&self, scope: ScopeId) -> Option<&ScopeState> {
        self.scopes.get(scope as usize)
    }

    fn state_mut(&mut self, scope: ScopeId) -> Option<&mut ScopeState> {
        self.scopes.get_mut(scope as usize)
    }
}

impl Reactivity for LocalReactivity {
    fn pause_tracking(&mut self) {
        self.pause_depth += 1;
    }

    fn reset_tracking(&mut self) {
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    fn create_scope(&mut self, detached: bool) -> ScopeId {
        let id = self.scopes.len() as ScopeId;
        self.scopes.push(ScopeState {
            active: true,
            children: Vec::new(),
            detached,
        });
        if !detached {
            if let Some(&parent) = self.entered.last() {
                if let Some(parent_state) = self.state_mut(parent) {
                    parent_state.children.push(id);
                }
            }
        }
        id
    }

    fn enter_scope(&mut self, scope: ScopeId) {
        self.entered.push(scope);
    }

    fn leave_scope(&mut self, scope: ScopeId) {
        if let Some(pos) = self.entered.iter().rposition(|&s| s == scope) {
            self.entered.remove(pos);
        }
    }

    fn stop_scope(&mut self, scope: ScopeId) {
        let children = match self.state_mut(scope) {
            Some(state) if state.active => {
                state.active = false;
                std::mem::take(&mut state.children)
            }
            _ => return,
        };
        for child in children {
            let detached = self.state(child).map(|s| s.detached).unwrap_or(true);
            if !detached {
                self.stop_scope(child);
            }
        }
    }

    fn is_scope_active(&self, scope: ScopeId) -> bool {
        self.state(scope).map(|s| s.active).unwrap_or(false)
    }
}
