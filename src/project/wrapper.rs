//! Per-run execution unit around one service
//!
//! ```text
//!     ┌─────────┐  ignore   ┌─────────┐
//!     │ Pending │──────────▶│ Ignored │
//!     └────┬────┘           └─────────┘
//!          │ run
//!     ┌────▼────┐  dependency failed/restarted
//!     │ Waiting │──────────────────────────┐
//!     └────┬────┘                          │
//!          │ dependencies done             │
//!     ┌────▼────┐                     ┌────▼──────────┐
//!     │ Running │────────────────────▶│ Done | Failed │
//!     └─────────┘                     └───────────────┘
//!
//!     any terminal state ──reset──▶ Pending
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};

use super::action::Action;
use super::events::{EventBus, EventType};
use super::service::{Flow, Outcome, Service, ServiceError};
use super::ProjectError;

/// Wrappers of one traversal, keyed by service name
pub type WrapperMap = BTreeMap<String, Arc<ServiceWrapper>>;

/// Execution state of a wrapper
#[derive(Debug, Clone)]
pub enum WrapperState {
    Pending,
    Waiting,
    Running,
    Done { restart: bool },
    Failed(Arc<ServiceError>),
    Ignored,
}

impl WrapperState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Done { .. } => "done",
            Self::Failed(_) => "failed",
            Self::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed(_) | Self::Ignored)
    }

    /// Result seen by waiters, once terminal
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Done { restart: false } | Self::Ignored => Some(Outcome::Success),
            Self::Done { restart: true } => Some(Outcome::Restart),
            Self::Failed(e) => Some(Outcome::Failed(e.clone())),
            Self::Pending | Self::Waiting | Self::Running => None,
        }
    }
}

/// Pairs a service with the signal its dependents wait on
pub struct ServiceWrapper {
    name: String,
    service: Arc<dyn Service>,
    state: watch::Sender<WrapperState>,
    ignored_deps: Mutex<HashSet<String>>,
    /// Result of an action that actually ran; replayed by later generations
    executed: Mutex<Option<WrapperState>>,
}

impl std::fmt::Debug for ServiceWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWrapper")
            .field("name", &self.name)
            .field("state", &self.state.borrow().as_str())
            .finish()
    }
}

impl ServiceWrapper {
    pub fn new(name: impl Into<String>, service: Arc<dyn Service>) -> Self {
        let (state, _) = watch::channel(WrapperState::Pending);
        Self {
            name: name.into(),
            service,
            state,
            ignored_deps: Mutex::new(HashSet::new()),
            executed: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    /// Snapshot of the current state
    pub fn state(&self) -> WrapperState {
        self.state.borrow().clone()
    }

    /// Dependencies this wrapper will not wait for
    pub fn ignored_deps(&self) -> BTreeSet<String> {
        self.ignored_deps.lock().unwrap().iter().cloned().collect()
    }

    /// Stop waiting on `name`; used when an optional edge closes a cycle
    pub fn ignore_dep(&self, name: &str) {
        self.ignored_deps.lock().unwrap().insert(name.to_string());
    }

    /// Mark a reachable but unselected service as finished without acting on it
    pub async fn ignore(&self, events: &EventBus) -> Result<(), ProjectError> {
        self.transition("ignored", |s| matches!(s, WrapperState::Pending))?;
        events
            .notify(EventType::ServiceUpIgnored, Some(&self.name), BTreeMap::new())
            .await;
        self.state.send_replace(WrapperState::Ignored);
        Ok(())
    }

    /// Re-arm a finished wrapper for the next restart generation
    pub fn reset(&self) -> Result<(), ProjectError> {
        self.transition("pending", WrapperState::is_terminal)?;
        self.ignored_deps.lock().unwrap().clear();
        self.state.send_replace(WrapperState::Pending);
        Ok(())
    }

    fn transition(
        &self,
        to: &'static str,
        allowed: impl Fn(&WrapperState) -> bool,
    ) -> Result<(), ProjectError> {
        let current = self.state.borrow();
        if allowed(&current) {
            Ok(())
        } else {
            Err(ProjectError::InvalidTransition {
                service: self.name.clone(),
                from: current.as_str(),
                to,
            })
        }
    }

    /// Block until the wrapper reaches a terminal state and return its result.
    /// Safe to call repeatedly; later calls return the cached result.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(WrapperState::is_terminal)
            .await
            .ok()
            .and_then(|state| state.outcome());

        outcome.unwrap_or_else(|| {
            Outcome::Failed(Arc::new(ServiceError::Interrupted(self.name.clone())))
        })
    }

    /// Wait for dependencies (when `wrappers` is given), then run `action`.
    ///
    /// A failed or restarted dependency settles this wrapper with the same
    /// result without invoking the action.
    pub async fn run(
        &self,
        wrappers: Option<&WrapperMap>,
        action: Action,
        events: &EventBus,
        limiter: Option<&Semaphore>,
    ) {
        let executed = self.executed.lock().unwrap().clone();
        if let Some(settled) = executed {
            log::debug!("{} already executed, skipping {}", self.name, action.as_str());
            self.state.send_replace(settled);
            return;
        }

        // Settles the wrapper as interrupted if this future is dropped early
        let _guard = SettleOnDrop(self);

        self.state.send_replace(WrapperState::Waiting);

        if let Some(wrappers) = wrappers {
            if let Some(settled) = self.wait_for_deps(wrappers, events).await {
                self.state.send_replace(settled);
                return;
            }
        }

        // Held until the action returns; dependency waits never hold a permit
        let _permit = match limiter {
            Some(sem) => sem.acquire().await.ok(),
            None => None,
        };

        self.state.send_replace(WrapperState::Running);

        let service_events = action.service_events();
        if let Some((start, _)) = service_events {
            events.notify(start, Some(&self.name), BTreeMap::new()).await;
        }

        let settled = match action.invoke(self.service.as_ref()).await {
            Ok(Flow::Continue) => {
                if let Some((_, done)) = service_events {
                    events.notify(done, Some(&self.name), BTreeMap::new()).await;
                }
                let settled = WrapperState::Done { restart: false };
                *self.executed.lock().unwrap() = Some(settled.clone());
                settled
            }
            Ok(Flow::Restart) => {
                log::debug!("{} requested a restart during {}", self.name, action.as_str());
                events
                    .notify(EventType::ProjectReloadTrigger, Some(&self.name), BTreeMap::new())
                    .await;
                WrapperState::Done { restart: true }
            }
            Err(e) => {
                log::error!("Failed {} {}: {}", action.as_str(), self.name, e);
                let settled = WrapperState::Failed(Arc::new(e));
                *self.executed.lock().unwrap() = Some(settled.clone());
                settled
            }
        };

        self.state.send_replace(settled);
    }

    async fn wait_for_deps(&self, wrappers: &WrapperMap, events: &EventBus) -> Option<WrapperState> {
        let ignored = self.ignored_deps.lock().unwrap().clone();

        for dep in self.service.dependent_services() {
            if ignored.contains(&dep.target) {
                continue;
            }
            let Some(wrapper) = wrappers.get(&dep.target) else {
                log::debug!("{}: not waiting on unknown dependency {}", self.name, dep.target);
                continue;
            };

            match wrapper.wait().await {
                Outcome::Success => {}
                Outcome::Restart => {
                    events
                        .notify(EventType::ProjectReload, Some(&dep.target), BTreeMap::new())
                        .await;
                    return Some(WrapperState::Done { restart: true });
                }
                Outcome::Failed(e) => {
                    log::warn!("{}: dependency {} failed, not running", self.name, dep.target);
                    return Some(WrapperState::Failed(e));
                }
            }
        }

        None
    }
}

/// Keeps dependents from hanging when a running task panics or is dropped
struct SettleOnDrop<'a>(&'a ServiceWrapper);

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        let name = &self.0.name;
        self.0.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            log::error!("{}: task ended before settling", name);
            *state = WrapperState::Failed(Arc::new(ServiceError::Interrupted(name.clone())));
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::project::service::{EmptyService, ServiceResult};
    use async_trait::async_trait;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        config: ServiceConfig,
        calls: AtomicUsize,
        result: fn() -> ServiceResult,
    }

    impl Counting {
        fn new(config: ServiceConfig, result: fn() -> ServiceResult) -> Arc<Self> {
            Arc::new(Self {
                config,
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl Service for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn config(&self) -> &ServiceConfig {
            &self.config
        }

        async fn up(&self) -> ServiceResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn empty(name: &str) -> Arc<ServiceWrapper> {
        Arc::new(ServiceWrapper::new(
            name,
            Arc::new(EmptyService::new(name, ServiceConfig::default())),
        ))
    }

    fn linked_to(dep: &str) -> ServiceConfig {
        ServiceConfig {
            links: vec![dep.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_success() {
        let bus = EventBus::new("test");
        let wrapper = empty("web");
        assert_eq!(wrapper.state().as_str(), "pending");

        wrapper.run(None, Action::Up, &bus, None).await;
        assert_eq!(wrapper.state().as_str(), "done");
        assert!(wrapper.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_wait_returns_cached_result() {
        let bus = EventBus::new("test");
        let svc = Counting::new(ServiceConfig::default(), || {
            Err(ServiceError::failed("web", "boom"))
        });
        let wrapper = ServiceWrapper::new("web", svc.clone());
        wrapper.run(None, Action::Up, &bus, None).await;

        let first = wrapper.wait().await;
        let second = wrapper.wait().await;
        assert!(Arc::ptr_eq(first.error().unwrap(), second.error().unwrap()));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
        assert_eq!(wrapper.state().as_str(), "failed");
    }

    #[tokio::test]
    async fn test_ignore_only_from_pending() {
        let bus = EventBus::new("test");
        let wrapper = empty("db");
        tokio_test::assert_ok!(wrapper.ignore(&bus).await);
        assert_eq!(wrapper.state().as_str(), "ignored");
        assert!(wrapper.wait().await.is_success());

        let err = wrapper.ignore(&bus).await.unwrap_err();
        assert!(matches!(err, ProjectError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reset_requires_terminal_state() {
        let wrapper = empty("db");
        tokio_test::assert_err!(wrapper.reset());

        let bus = EventBus::new("test");
        wrapper.ignore_dep("web");
        wrapper.ignore(&bus).await.unwrap();
        tokio_test::assert_ok!(wrapper.reset());
        assert_eq!(wrapper.state().as_str(), "pending");
        assert!(wrapper.ignored_deps().is_empty());
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_action() {
        let bus = EventBus::new("test");
        let db_svc = Counting::new(ServiceConfig::default(), || {
            Err(ServiceError::failed("db", "no disk"))
        });
        let web_svc = Counting::new(linked_to("db"), || Ok(Flow::Continue));

        let mut wrappers = WrapperMap::new();
        wrappers.insert("db".into(), Arc::new(ServiceWrapper::new("db", db_svc.clone())));
        wrappers.insert("web".into(), Arc::new(ServiceWrapper::new("web", web_svc.clone())));

        wrappers["db"].run(Some(&wrappers), Action::Up, &bus, None).await;
        wrappers["web"].run(Some(&wrappers), Action::Up, &bus, None).await;

        assert_eq!(web_svc.calls.load(Ordering::SeqCst), 0);
        let outcome = wrappers["web"].wait().await;
        assert_eq!(outcome.error().unwrap().to_string(), "db: no disk");
    }

    #[tokio::test]
    async fn test_dependency_restart_propagates() {
        let bus = EventBus::new("test");
        let db_svc = Counting::new(ServiceConfig::default(), || Ok(Flow::Restart));
        let web_svc = Counting::new(linked_to("db"), || Ok(Flow::Continue));

        let mut wrappers = WrapperMap::new();
        wrappers.insert("db".into(), Arc::new(ServiceWrapper::new("db", db_svc)));
        wrappers.insert("web".into(), Arc::new(ServiceWrapper::new("web", web_svc.clone())));

        wrappers["db"].run(Some(&wrappers), Action::Up, &bus, None).await;
        wrappers["web"].run(Some(&wrappers), Action::Up, &bus, None).await;

        assert_eq!(web_svc.calls.load(Ordering::SeqCst), 0);
        assert!(wrappers["web"].wait().await.is_restart());
    }

    #[tokio::test]
    async fn test_ignored_dep_not_awaited() {
        let bus = EventBus::new("test");
        let web_svc = Counting::new(linked_to("db"), || Ok(Flow::Continue));

        let mut wrappers = WrapperMap::new();
        // db is never run, so waiting on it would hang
        wrappers.insert("db".into(), empty("db"));
        wrappers.insert("web".into(), Arc::new(ServiceWrapper::new("web", web_svc.clone())));

        wrappers["web"].ignore_dep("db");
        wrappers["web"].run(Some(&wrappers), Action::Up, &bus, None).await;
        assert_eq!(web_svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_not_repeated_after_reset() {
        let bus = EventBus::new("test");
        let svc = Counting::new(ServiceConfig::default(), || Ok(Flow::Continue));
        let wrapper = ServiceWrapper::new("web", svc.clone());

        wrapper.run(None, Action::Up, &bus, None).await;
        wrapper.reset().unwrap();
        wrapper.run(None, Action::Up, &bus, None).await;

        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
        assert!(wrapper.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_failure_replayed_after_reset() {
        let bus = EventBus::new("test");
        let svc = Counting::new(ServiceConfig::default(), || {
            Err(ServiceError::failed("web", "boom"))
        });
        let wrapper = ServiceWrapper::new("web", svc.clone());

        wrapper.run(None, Action::Up, &bus, None).await;
        let first = wrapper.wait().await;
        wrapper.reset().unwrap();
        wrapper.run(None, Action::Up, &bus, None).await;
        let second = wrapper.wait().await;

        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(first.error().unwrap(), second.error().unwrap()));
    }

    #[tokio::test]
    async fn test_restart_runs_again_after_reset() {
        let bus = EventBus::new("test");
        let svc = Counting::new(ServiceConfig::default(), || Ok(Flow::Restart));
        let wrapper = ServiceWrapper::new("web", svc.clone());

        wrapper.run(None, Action::Up, &bus, None).await;
        assert!(wrapper.wait().await.is_restart());
        wrapper.reset().unwrap();
        wrapper.run(None, Action::Up, &bus, None).await;

        assert_eq!(svc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_run_settles_as_interrupted() {
        let bus = EventBus::new("test");
        let db = Arc::new(ServiceWrapper::new(
            "db",
            Arc::new(EmptyService::new("db", ServiceConfig::default())),
        ));
        let web_svc = Counting::new(linked_to("db"), || Ok(Flow::Continue));
        let web = Arc::new(ServiceWrapper::new("web", web_svc));

        let mut wrappers = WrapperMap::new();
        wrappers.insert("db".into(), db.clone());
        wrappers.insert("web".into(), web.clone());

        // web parks waiting on db; dropping its future must not leave it hanging
        {
            let run = web.run(Some(&wrappers), Action::Up, &bus, None);
            tokio::pin!(run);
            assert!(poll_once(run.as_mut()).await);
        }
        assert_eq!(web.state().as_str(), "failed");
        let outcome = web.wait().await;
        assert!(matches!(
            outcome.error().map(|e| e.as_ref()),
            Some(ServiceError::Interrupted(_))
        ));
    }

    /// Poll once; true if still pending
    async fn poll_once<F: Future + Unpin>(mut fut: F) -> bool {
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(std::pin::Pin::new(&mut fut).poll(cx).is_pending())
        })
        .await
    }

    #[tokio::test]
    async fn test_waiter_unblocks_on_completion() {
        let bus = EventBus::new("test");
        let wrapper = empty("db");
        let waiter = {
            let wrapper = wrapper.clone();
            tokio::spawn(async move { wrapper.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        wrapper.run(None, Action::Up, &bus, None).await;
        assert!(waiter.await.unwrap().is_success());
    }
}
