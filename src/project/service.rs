//! Backend capability interfaces
//!
//! A [`Service`] is the runtime unit of work for one named service. The
//! engine never talks to a container runtime itself; it only calls these
//! methods in dependency order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::relationships::{dependent_services, ServiceRelationship};
use super::Project;
use crate::config::ServiceConfig;

/// What the engine should do after a successful action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Configuration changed underneath us, re-plan and run again
    Restart,
}

pub type ServiceResult = Result<Flow, ServiceError>;

/// Cached result of a wrapper, handed to every waiter
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Restart,
    Failed(Arc<ServiceError>),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Restart)
    }

    pub fn error(&self) -> Option<&Arc<ServiceError>> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServiceResult> for Outcome {
    fn from(result: ServiceResult) -> Self {
        match result {
            Ok(Flow::Continue) => Self::Success,
            Ok(Flow::Restart) => Self::Restart,
            Err(e) => Self::Failed(Arc::new(e)),
        }
    }
}

/// Errors raised by backend services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("{service}: {message}")]
    Failed { service: String, message: String },

    #[error("{0}: completion signal dropped")]
    Interrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// A container backing a service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    /// Private port ("80/tcp") -> public binding ("0.0.0.0:8080")
    pub ports: BTreeMap<String, String>,
}

/// Lifecycle capability set supplied by a backend
///
/// Every action defaults to [`ServiceError::Unsupported`], so a backend only
/// implements what it can actually do.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &ServiceConfig;

    /// Services this one depends on
    fn dependent_services(&self) -> Vec<ServiceRelationship> {
        dependent_services(self.config())
    }

    async fn build(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("build"))
    }

    async fn create(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("create"))
    }

    async fn up(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("up"))
    }

    async fn start(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("start"))
    }

    async fn down(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("down"))
    }

    async fn restart(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("restart"))
    }

    async fn kill(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("kill"))
    }

    async fn delete(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("delete"))
    }

    async fn pause(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("pause"))
    }

    async fn unpause(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("unpause"))
    }

    async fn pull(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("pull"))
    }

    async fn log(&self) -> ServiceResult {
        Err(ServiceError::Unsupported("log"))
    }

    async fn info(&self) -> Result<InfoSet, ServiceError> {
        Err(ServiceError::Unsupported("info"))
    }

    async fn containers(&self) -> Result<Vec<Container>, ServiceError> {
        Err(ServiceError::Unsupported("containers"))
    }
}

/// Backend construction point
pub trait ServiceFactory: Send + Sync {
    fn create(
        &self,
        project: &Project,
        name: &str,
        config: ServiceConfig,
    ) -> Result<Arc<dyn Service>, ServiceError>;
}

/// A service that accepts every action and does nothing
#[derive(Debug, Clone, Default)]
pub struct EmptyService {
    name: String,
    config: ServiceConfig,
}

impl EmptyService {
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

#[async_trait]
impl Service for EmptyService {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ServiceConfig {
        &self.config
    }

    async fn build(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn create(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn up(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn start(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn down(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn restart(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn kill(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn delete(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn pause(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn unpause(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn pull(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn log(&self) -> ServiceResult {
        Ok(Flow::Continue)
    }

    async fn info(&self) -> Result<InfoSet, ServiceError> {
        Ok(InfoSet::default())
    }

    async fn containers(&self) -> Result<Vec<Container>, ServiceError> {
        Ok(Vec::new())
    }
}

/// One column of a `ps` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPart {
    pub key: String,
    pub value: String,
}

impl InfoPart {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One `ps` row
pub type Info = Vec<InfoPart>;

/// Rows returned by [`Project::ps`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSet(pub Vec<Info>);

impl InfoSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn extend(&mut self, other: InfoSet) {
        self.0.extend(other.0);
    }

    /// Render as a column-aligned table, with a header row of keys taken
    /// from the first row when `title` is set.
    pub fn table(&self, title: bool) -> String {
        let mut rows: Vec<Vec<&str>> = Vec::new();
        if let (true, Some(first)) = (title, self.0.first()) {
            rows.push(first.iter().map(|p| p.key.as_str()).collect());
        }
        for info in &self.0 {
            rows.push(info.iter().map(|p| p.value.as_str()).collect());
        }

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<usize> = (0..columns)
            .map(|col| {
                let widest = rows
                    .iter()
                    .filter_map(|r| r.get(col))
                    .map(|c| c.chars().count())
                    .max()
                    .unwrap_or(0);
                (widest + 2).max(4)
            })
            .collect();

        let mut out = String::new();
        for row in rows {
            let last = row.len().saturating_sub(1);
            for (col, cell) in row.iter().enumerate() {
                if col == last {
                    out.push_str(cell);
                } else {
                    out.push_str(&format!("{:<width$}", cell, width = widths[col]));
                }
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for InfoSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table(true))
    }
}
