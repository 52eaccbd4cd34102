//! Instance identity and the live-instance registry.
//!
//! Every instance gets a [`Vid`] at creation time. The registry maps vids
//! to entries that may exist before the instance itself does: a component
//! can attach while its page is still loading, in which case its
//! initialization is parked on the page's entry and drained when the page
//! publishes itself.

use indexmap::IndexMap;

use crate::instance::InstanceHandle;
use crate::scheduler::Job;

/// View identifier. Stable for the life of an instance and echoed into
/// the host-side data as `acorn_vid` so the view layer can route events
/// back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Vid {
    /// The singleton application instance.
    App,
    /// A page, keyed by the host's page identifier.
    Page(String),
    /// A component, keyed by a process-unique counter.
    Component(u64),
}

impl std::fmt::Display for Vid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vid::App => f.write_str("app"),
            Vid::Page(id) => f.write_str(id),
            Vid::Component(uid) => write!(f, "com:{uid}"),
        }
    }
}

impl Vid {
    /// The instance kind this identifier shape implies.
    pub fn kind(&self) -> InstanceKind {
        match self {
            Vid::App => InstanceKind::App,
            Vid::Page(_) => InstanceKind::Page,
            Vid::Component(_) => InstanceKind::Component,
        }
    }
}

impl From<&str> for Vid {
    fn from(s: &str) -> Self {
        if s == "app" {
            return Vid::App;
        }
        if let Some(uid) = s.strip_prefix("com:") {
            if let Ok(uid) = uid.parse::<u64>() {
                return Vid::Component(uid);
            }
        }
        Vid::Page(s.to_owned())
    }
}

impl std::str::FromStr for Vid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Vid::from(s))
    }
}

/// What kind of thing an instance is. Decides which lifecycle hooks
/// apply and which advice tables wrap its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum InstanceKind {
    App,
    Page,
    Component,
}

/// One registry slot. `instance` is `None` while the entry is only a
/// placeholder holding deferred work.
pub struct RegistryEntry {
    pub kind: InstanceKind,
    pub instance: Option<InstanceHandle>,
    pub(crate) callbacks: Vec<Job>,
}

/// Vid-keyed table of live (and pending) instances.
#[derive(Default)]
pub struct Registry {
    entries: IndexMap<Vid, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, vid: &Vid) -> Option<&RegistryEntry> {
        self.entries.get(vid)
    }

    /// The live instance for `vid`, if it has been published.
    pub fn instance(&self, vid: &Vid) -> Option<InstanceHandle> {
        self.entries.get(vid).and_then(|e| e.instance.clone())
    }

    pub fn contains(&self, vid: &Vid) -> bool {
        self.entries.contains_key(vid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vids(&self) -> impl Iterator<Item = &Vid> {
        self.entries.keys()
    }

    /// Get or create the entry for `vid`. A created entry starts as a
    /// placeholder of the given kind.
    pub(crate) fn ensure_entry(&mut self, vid: Vid, kind: InstanceKind) -> &mut RegistryEntry {
        self.entries.entry(vid).or_insert_with(|| RegistryEntry {
            kind,
            instance: None,
            callbacks: Vec::new(),
        })
    }

    /// Park `job` on the entry for `vid`, creating a placeholder entry if
    /// needed. The job runs when the instance publishes itself.
    pub(crate) fn defer(&mut self, vid: Vid, kind: InstanceKind, job: Job) {
        self.ensure_entry(vid, kind).callbacks.push(job);
    }

    /// Publish a live instance into its entry, adopting any placeholder
    /// that earlier arrivals left behind. Returns the deferred jobs that
    /// were parked on the entry; the caller runs them.
    pub(crate) fn publish(
        &mut self,
        vid: Vid,
        kind: InstanceKind,
        instance: InstanceHandle,
    ) -> Vec<Job> {
        let entry = self.ensure_entry(vid, kind);
        entry.kind = kind;
        entry.instance = Some(instance);
        std::mem::take(&mut entry.callbacks)
    }

    pub(crate) fn remove(&mut self, vid: &Vid) -> Option<RegistryEntry> {
        self.entries.shift_remove(vid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vid_display() {
        assert_eq!(Vid::App.to_string(), "app");
        assert_eq!(Vid::Page("pages/home".into()).to_string(), "pages/home");
        assert_eq!(Vid::Component(7).to_string(), "com:7");
    }

    #[test]
    fn test_vid_round_trip() {
        for vid in [Vid::App, Vid::Page("pages/home".into()), Vid::Component(12)] {
            let parsed: Vid = vid.to_string().parse().unwrap();
            assert_eq!(parsed, vid);
        }
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(InstanceKind::App.to_string(), "app");
        assert_eq!(InstanceKind::Component.to_string(), "component");
    }

    #[test]
    fn test_placeholder_entry_collects_deferred_jobs() {
        let mut registry = Registry::new();
        let vid = Vid::Page("pages/home".into());
        registry.defer(vid.clone(), InstanceKind::Page, Box::new(|_| {}));
        registry.defer(vid.clone(), InstanceKind::Page, Box::new(|_| {}));

        let entry = registry.entry(&vid).unwrap();
        assert!(entry.instance.is_none());
        assert_eq!(entry.callbacks.len(), 2);
    }
}
