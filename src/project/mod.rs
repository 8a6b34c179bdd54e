//! Project: a named set of service configs and the lifecycle actions over them
//!
//! Every action walks the relationship graph, runs the selected services
//! concurrently in dependency order, and reports the first failure.

mod action;
mod events;
mod relationships;
mod service;
mod traverse;
mod wrapper;

pub use action::Action;
pub use events::{Event, EventBus, EventType};
pub use relationships::{dependent_services, RelationshipType, ServiceRelationship};
pub use service::{
    Container, EmptyService, Flow, Info, InfoPart, InfoSet, Outcome, Service, ServiceError,
    ServiceFactory, ServiceResult,
};
pub use traverse::is_selected;
pub use wrapper::{ServiceWrapper, WrapperMap, WrapperState};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::{split_entry, ConfigLookup, Environment, EnvironmentLookup, ServiceConfig};

/// Invoked between restart generations, typically to re-read configuration
/// and queue changed services with [`Project::add_config`].
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn reload(&self, project: &Project) -> Result<(), ProjectError>;
}

/// Collaborators and settings a project is built from
#[derive(Clone)]
pub struct Context {
    project_name: String,
    service_factory: Arc<dyn ServiceFactory>,
    environment_lookup: Option<Arc<dyn EnvironmentLookup>>,
    config_lookup: Option<Arc<dyn ConfigLookup>>,
    max_concurrency: Option<usize>,
}

impl Context {
    pub fn new(project_name: impl Into<String>, service_factory: Arc<dyn ServiceFactory>) -> Self {
        Self {
            project_name: project_name.into(),
            service_factory,
            environment_lookup: None,
            config_lookup: None,
            max_concurrency: None,
        }
    }

    /// Fill environment entries declared without a value
    pub fn with_environment_lookup(mut self, lookup: Arc<dyn EnvironmentLookup>) -> Self {
        self.environment_lookup = Some(lookup);
        self
    }

    /// File loader handed to whoever populates the project
    pub fn with_config_lookup(mut self, lookup: Arc<dyn ConfigLookup>) -> Self {
        self.config_lookup = Some(lookup);
        self
    }

    /// Cap the number of actions running at once (at least 1)
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn config_lookup(&self) -> Option<&Arc<dyn ConfigLookup>> {
        self.config_lookup.as_ref()
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }
}

/// Lowercase, with anything outside `[a-z0-9_.-]` replaced by `-`
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '-',
        })
        .collect()
}

/// A compose-style project
pub struct Project {
    name: String,
    context: Context,
    /// Service configs by name
    configs: RwLock<BTreeMap<String, ServiceConfig>>,
    /// Names added since the last traversal generation loaded wrappers
    reload: Mutex<Vec<String>>,
    events: EventBus,
    reload_hook: Option<Arc<dyn ReloadHook>>,
}

impl Project {
    /// Create an empty project. The default logging listener is installed.
    pub fn new(context: Context) -> Result<Self, ProjectError> {
        let name = normalize_project_name(&context.project_name);
        if name.is_empty() {
            return Err(ProjectError::Config("project name is empty".to_string()));
        }

        Ok(Self {
            events: EventBus::new(&name),
            name,
            context,
            configs: RwLock::new(BTreeMap::new()),
            reload: Mutex::new(Vec::new()),
            reload_hook: None,
        })
    }

    pub fn with_reload_hook(mut self, hook: Arc<dyn ReloadHook>) -> Self {
        self.reload_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Configured service names, sorted
    pub async fn service_names(&self) -> Vec<String> {
        self.configs.read().await.keys().cloned().collect()
    }

    /// Get a copy of a service's config
    pub async fn config(&self, name: &str) -> Option<ServiceConfig> {
        self.configs.read().await.get(name).cloned()
    }

    /// Add or replace a service config and queue it for (re)loading
    pub async fn add_config(&self, name: &str, config: ServiceConfig) -> Result<(), ProjectError> {
        self.notify(EventType::ServiceAdd, name, None).await;

        self.configs.write().await.insert(name.to_string(), config);
        self.reload.lock().await.push(name.to_string());
        Ok(())
    }

    /// Build a runnable service from a copy of its config, resolving
    /// environment entries that were declared without a value.
    pub async fn create_service(&self, name: &str) -> Result<Arc<dyn Service>, ProjectError> {
        let mut config = self
            .config(name)
            .await
            .ok_or_else(|| ProjectError::NoSuchService(name.to_string()))?;

        if let Some(lookup) = &self.context.environment_lookup {
            let mut resolved = Vec::with_capacity(config.environment.entries().len());
            for entry in config.environment.entries() {
                match split_entry(entry) {
                    (_, Some(value)) if !value.is_empty() => resolved.push(entry.clone()),
                    (key, _) => resolved.extend(lookup.lookup(key, name, &config)),
                }
            }
            config.environment = Environment::new(resolved);
        }

        self.context
            .service_factory
            .create(self, name, config)
            .map_err(|e| ProjectError::Factory {
                service: name.to_string(),
                source: Arc::new(e),
            })
    }

    /// Register an event listener. The first one replaces the default logger.
    pub fn add_listener(&self, sender: mpsc::Sender<Event>) {
        self.events.add_listener(sender);
    }

    /// Send an event to every listener. An empty `service_name` marks a
    /// project-level event.
    pub async fn notify(
        &self,
        event_type: EventType,
        service_name: &str,
        data: Option<BTreeMap<String, String>>,
    ) {
        let service_name = (!service_name.is_empty()).then_some(service_name);
        self.events
            .notify(event_type, service_name, data.unwrap_or_default())
            .await;
    }

    /// Build images (like `docker build`)
    pub async fn build(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Build, services, None).await
    }

    /// Create containers without starting them
    pub async fn create(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Create, services, None).await
    }

    /// Create and start. Services joined by an optional cycle are still created.
    pub async fn up(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Up, services, Some(Action::Create)).await
    }

    /// Stop containers
    pub async fn down(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Down, services, None).await
    }

    pub async fn start(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Start, services, None).await
    }

    pub async fn restart(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Restart, services, None).await
    }

    pub async fn kill(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Kill, services, None).await
    }

    /// Remove containers
    pub async fn delete(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Delete, services, None).await
    }

    pub async fn pause(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Pause, services, None).await
    }

    pub async fn unpause(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Unpause, services, None).await
    }

    pub async fn pull(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Pull, services, None).await
    }

    /// Follow logs of the selected services
    pub async fn log(&self, services: &[&str]) -> Result<(), ProjectError> {
        self.perform(Action::Log, services, None).await
    }

    /// Collect `ps` rows for the named services (all when empty), in name order
    pub async fn ps(&self, services: &[&str]) -> Result<InfoSet, ProjectError> {
        let names: Vec<String> = if services.is_empty() {
            self.service_names().await
        } else {
            let configs = self.configs.read().await;
            let mut names = BTreeSet::new();
            for name in services {
                if !configs.contains_key(*name) {
                    return Err(ProjectError::NoSuchService(name.to_string()));
                }
                names.insert(name.to_string());
            }
            names.into_iter().collect()
        };

        let mut all = InfoSet::default();
        for name in &names {
            let service = self.create_service(name).await?;
            let info = service.info().await.map_err(|e| ProjectError::Action {
                service: name.clone(),
                source: Arc::new(e),
            })?;
            all.extend(info);
        }
        Ok(all)
    }

    async fn perform(
        &self,
        action: Action,
        services: &[&str],
        cycle_action: Option<Action>,
    ) -> Result<(), ProjectError> {
        let selected: BTreeSet<String> = services.iter().map(|s| s.to_string()).collect();
        let project_events = action.project_events();

        if let Some((start, _)) = project_events {
            self.notify(start, "", None).await;
        }

        let result = self.traverse(&selected, action, cycle_action).await;

        if let Some((_, done)) = project_events {
            self.notify(done, "", None).await;
        }

        result
    }
}

/// Project errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("No such service: {0}")]
    NoSuchService(String),

    #[error("Cycle detected in path {}", .0.join("->"))]
    Cycle(Vec<String>),

    #[error("Failed to find {dependency} (dependency of {service})")]
    DependencyMissing { service: String, dependency: String },

    #[error("Service {service} failed: {source}")]
    Action {
        service: String,
        #[source]
        source: Arc<ServiceError>,
    },

    #[error("Cycle action failed for {service}: {source}")]
    CycleAction {
        service: String,
        #[source]
        source: Arc<ServiceError>,
    },

    #[error("Failed to create service {service}: {source}")]
    Factory {
        service: String,
        #[source]
        source: Arc<ServiceError>,
    },

    #[error("{service}: cannot move from {from} to {to}")]
    InvalidTransition {
        service: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Returned by [`ReloadHook`] implementations that cannot re-read their configuration
    #[error("Reload failed: {0}")]
    Reload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyFactory;

    impl ServiceFactory for EmptyFactory {
        fn create(
            &self,
            _project: &Project,
            name: &str,
            config: ServiceConfig,
        ) -> Result<Arc<dyn Service>, ServiceError> {
            Ok(Arc::new(EmptyService::new(name, config)))
        }
    }

    struct FixedLookup;

    impl EnvironmentLookup for FixedLookup {
        fn lookup(&self, key: &str, service_name: &str, _config: &ServiceConfig) -> Vec<String> {
            match key {
                "HOST" => vec![format!("HOST={}.local", service_name)],
                "MULTI" => vec!["MULTI_A=1".into(), "MULTI_B=2".into()],
                _ => Vec::new(),
            }
        }
    }

    fn project() -> Project {
        Project::new(Context::new("Demo", Arc::new(EmptyFactory))).unwrap()
    }

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("My App"), "my-app");
        assert_eq!(normalize_project_name("svc_1.x-y"), "svc_1.x-y");
        assert_eq!(normalize_project_name("a/b:c"), "a-b-c");
    }

    #[test]
    fn test_empty_project_name_rejected() {
        let err = Project::new(Context::new("", Arc::new(EmptyFactory)))
            .err()
            .unwrap();
        assert!(matches!(err, ProjectError::Config(_)));
    }

    #[test]
    fn test_max_concurrency_at_least_one() {
        let ctx = Context::new("x", Arc::new(EmptyFactory)).with_max_concurrency(0);
        assert_eq!(ctx.max_concurrency(), Some(1));
    }

    #[test]
    fn test_context_builder() {
        let ctx = Context::new("x", Arc::new(EmptyFactory))
            .with_config_lookup(Arc::new(crate::config::FileConfigLookup));
        assert!(ctx.config_lookup().is_some());
        assert_eq!(ctx.max_concurrency(), None);
    }

    #[tokio::test]
    async fn test_add_config_queues_reload() {
        let p = project();
        assert_eq!(p.name(), "demo");
        p.add_config("web", ServiceConfig::default()).await.unwrap();
        p.add_config("db", ServiceConfig::default()).await.unwrap();

        assert_eq!(p.service_names().await, vec!["db", "web"]);
        assert_eq!(*p.reload.lock().await, vec!["web", "db"]);
    }

    #[tokio::test]
    async fn test_create_service_unknown() {
        let p = project();
        assert!(matches!(
            p.create_service("ghost").await,
            Err(ProjectError::NoSuchService(_))
        ));
    }

    #[tokio::test]
    async fn test_create_service_resolves_environment() {
        let ctx = Context::new("demo", Arc::new(EmptyFactory))
            .with_environment_lookup(Arc::new(FixedLookup));
        let p = Project::new(ctx).unwrap();
        let cfg = ServiceConfig {
            environment: Environment::new(vec![
                "KEEP=1".into(),
                "HOST".into(),
                "MULTI=".into(),
                "MISSING".into(),
            ]),
            ..Default::default()
        };
        p.add_config("web", cfg).await.unwrap();

        let svc = p.create_service("web").await.unwrap();
        assert_eq!(
            svc.config().environment.entries(),
            ["KEEP=1", "HOST=web.local", "MULTI_A=1", "MULTI_B=2"]
        );

        // The stored config is untouched
        let stored = p.config("web").await.unwrap();
        assert_eq!(stored.environment.entries().len(), 4);
    }

    #[tokio::test]
    async fn test_notify_reaches_listener() {
        let p = project();
        let (tx, mut rx) = mpsc::channel(4);
        p.add_listener(tx);

        p.notify(EventType::ProjectUpStart, "", None).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::ProjectUpStart);
        assert_eq!(event.service_name, None);
    }
}
