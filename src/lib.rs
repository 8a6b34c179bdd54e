//! muster - Dependency-ordered lifecycle orchestration for compose-style projects
//!
//! A Rust implementation that:
//! - Resolves service relationships (links, volumes_from, net/ipc namespaces)
//! - Runs lifecycle actions concurrently, dependencies first
//! - Reports progress through a lifecycle event bus
//!
//! Container runtimes plug in through the [`Service`] and [`ServiceFactory`] traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     Project                      │
//! ├─────────────────────────────────────────────────┤
//! │ Relationships │ Traversal Driver │  Event Bus   │
//! ├─────────────────────────────────────────────────┤
//! │        ServiceWrapper (one per service)         │
//! ├─────────────────────────────────────────────────┤
//! │            Service backend (plugged in)         │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod project;

pub use config::{
    ConfigLookup, EnvironmentLookup, FileConfigLookup, ProcessEnvLookup, ServiceConfig,
};
pub use project::{
    Action, Container, Context, EmptyService, Event, EventBus, EventType, Flow, InfoPart, InfoSet,
    Outcome, Project, ProjectError, RelationshipType, ReloadHook, Service, ServiceError,
    ServiceFactory, ServiceRelationship, ServiceResult,
};
