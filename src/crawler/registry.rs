//! Capability registry for optional crawl collaborators
//!
//! Each optional collaborator is registered under a [`Capability`] tag as a
//! [`Component`] holding a typed trait object. The coordinator resolves the
//! registry once, during initialization, into [`Components`]; nothing is
//! looked up by type at crawl time.

use crate::change::ChangeResult;
use crate::crawler::{FetchResponse, ParsedPage};
use crate::robots::RobotsPolicy;
use crate::storage::StateStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Extracts text and links from non-HTML documents (PDF, office formats, ...)
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// True if this processor understands the content type
    fn supports(&self, content_type: &str) -> bool;

    async fn extract(&self, response: &FetchResponse) -> crate::Result<ParsedPage>;
}

/// Renders a page in a headless browser and returns the resulting HTML
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> crate::Result<String>;
}

/// Receives significant changes; failures are logged and never fail the crawl
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, url: &str, change: &ChangeResult) -> crate::Result<()>;
}

/// Tag of an optional collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    DocumentProcessing,
    HeadlessRendering,
    Persistence,
    Notification,
    RobotsPolicy,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DocumentProcessing => "document-processing",
            Self::HeadlessRendering => "headless-rendering",
            Self::Persistence => "persistence",
            Self::Notification => "notification",
            Self::RobotsPolicy => "robots-policy",
        };
        f.write_str(name)
    }
}

/// A collaborator implementation, typed by its capability
#[derive(Clone)]
pub enum Component {
    DocumentProcessing(Arc<dyn DocumentProcessor>),
    HeadlessRendering(Arc<dyn PageRenderer>),
    Persistence(Arc<dyn StateStore>),
    Notification(Arc<dyn ChangeNotifier>),
    RobotsPolicy(Arc<dyn RobotsPolicy>),
}

impl Component {
    pub fn capability(&self) -> Capability {
        match self {
            Self::DocumentProcessing(_) => Capability::DocumentProcessing,
            Self::HeadlessRendering(_) => Capability::HeadlessRendering,
            Self::Persistence(_) => Capability::Persistence,
            Self::Notification(_) => Capability::Notification,
            Self::RobotsPolicy(_) => Capability::RobotsPolicy,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.capability())
    }
}

/// At most one component per capability
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<Capability, Component>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component, returning the one it replaced
    pub fn register(&mut self, component: Component) -> Option<Component> {
        let capability = component.capability();
        let replaced = self.components.insert(capability, component);
        if replaced.is_some() {
            tracing::debug!("Replaced registered {} component", capability);
        }
        replaced
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, component: Component) -> Self {
        self.register(component);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.components.contains_key(&capability)
    }

    /// Registered capabilities, sorted
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities: Vec<Capability> = self.components.keys().copied().collect();
        capabilities.sort();
        capabilities
    }

    /// Resolves every registered component into its typed slot
    pub fn resolve(&self) -> Components {
        let mut resolved = Components::default();
        for component in self.components.values() {
            match component {
                Component::DocumentProcessing(c) => resolved.document_processor = Some(Arc::clone(c)),
                Component::HeadlessRendering(c) => resolved.renderer = Some(Arc::clone(c)),
                Component::Persistence(c) => resolved.store = Some(Arc::clone(c)),
                Component::Notification(c) => resolved.notifier = Some(Arc::clone(c)),
                Component::RobotsPolicy(c) => resolved.robots = Some(Arc::clone(c)),
            }
        }
        resolved
    }
}

/// Resolved collaborators; `None` where nothing was registered
#[derive(Clone, Default)]
pub struct Components {
    pub document_processor: Option<Arc<dyn DocumentProcessor>>,
    pub renderer: Option<Arc<dyn PageRenderer>>,
    pub store: Option<Arc<dyn StateStore>>,
    pub notifier: Option<Arc<dyn ChangeNotifier>>,
    pub robots: Option<Arc<dyn RobotsPolicy>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robots::AllowAll;
    use crate::storage::SqliteStore;

    struct NoopNotifier;

    #[async_trait]
    impl ChangeNotifier for NoopNotifier {
        async fn notify(&self, _url: &str, _change: &ChangeResult) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_registry_resolves_to_nothing() {
        let components = ComponentRegistry::new().resolve();
        assert!(components.document_processor.is_none());
        assert!(components.renderer.is_none());
        assert!(components.store.is_none());
        assert!(components.notifier.is_none());
        assert!(components.robots.is_none());
    }

    #[test]
    fn test_components_land_in_their_slots() {
        let store = SqliteStore::new_in_memory().unwrap();
        let registry = ComponentRegistry::new()
            .with(Component::Persistence(Arc::new(store)))
            .with(Component::Notification(Arc::new(NoopNotifier)))
            .with(Component::RobotsPolicy(Arc::new(AllowAll)));

        assert_eq!(
            registry.capabilities(),
            vec![
                Capability::Persistence,
                Capability::Notification,
                Capability::RobotsPolicy
            ]
        );

        let components = registry.resolve();
        assert!(components.store.is_some());
        assert!(components.notifier.is_some());
        assert!(components.robots.is_some());
        assert!(components.renderer.is_none());
    }

    #[test]
    fn test_register_replaces_same_capability() {
        let mut registry = ComponentRegistry::new();
        assert!(registry
            .register(Component::RobotsPolicy(Arc::new(AllowAll)))
            .is_none());

        let replaced = registry.register(Component::RobotsPolicy(Arc::new(AllowAll)));
        assert_eq!(replaced.map(|c| c.capability()), Some(Capability::RobotsPolicy));
        assert_eq!(registry.capabilities().len(), 1);
        assert!(registry.contains(Capability::RobotsPolicy));
        assert!(!registry.contains(Capability::Persistence));
    }
}
