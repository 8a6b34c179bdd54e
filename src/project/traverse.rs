//! Dependency traversal
//!
//! Each generation loads wrappers, plans a depth-first walk over the
//! relationship graph, then executes the plan: selected services get a task
//! of their own, unselected ones are settled as ignored. The whole walk is
//! planned before anything is spawned, so a fatal cycle aborts with no
//! action invoked. A restart request from any service triggers another
//! generation over the same wrapper map.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use super::action::Action;
use super::service::Outcome;
use super::wrapper::{ServiceWrapper, WrapperMap};
use super::{Project, ProjectError};

/// Whether `name` is part of `selected`. An empty selection selects everything.
pub fn is_selected(name: &str, selected: &BTreeSet<String>) -> bool {
    selected.is_empty() || selected.contains(name)
}

/// One planned step, executed in order
#[derive(Debug)]
pub(crate) enum Step {
    /// Spawn the action for a selected service
    Launch(Arc<ServiceWrapper>),
    /// Settle a reachable but unselected service
    Ignore(Arc<ServiceWrapper>),
    /// Run the cycle action on the service that closes an optional cycle
    CycleAction { target: Arc<ServiceWrapper>, path: String },
}

/// Depth-first planner for one generation
struct Planner<'a> {
    wrappers: &'a WrapperMap,
    selected: &'a BTreeSet<String>,
    with_cycle_action: bool,
    launched: HashSet<String>,
    steps: Vec<Step>,
}

impl<'a> Planner<'a> {
    fn new(wrappers: &'a WrapperMap, selected: &'a BTreeSet<String>, with_cycle_action: bool) -> Self {
        Self {
            wrappers,
            selected,
            with_cycle_action,
            launched: HashSet::new(),
            steps: Vec::new(),
        }
    }

    /// Plan every wrapper, dependencies before dependents
    fn plan(mut self) -> Result<Vec<Step>, ProjectError> {
        for wrapper in self.wrappers.values() {
            self.visit(wrapper, &[])?;
        }
        Ok(self.steps)
    }

    fn visit(&mut self, wrapper: &Arc<ServiceWrapper>, history: &[String]) -> Result<(), ProjectError> {
        if !self.launched.insert(wrapper.name().to_string()) {
            return Ok(());
        }

        // Each branch gets its own copy of the path
        let mut history = history.to_vec();
        history.push(wrapper.name().to_string());

        for dep in wrapper.service().dependent_services() {
            let Some(target) = self.wrappers.get(&dep.target) else {
                let err = ProjectError::DependencyMissing {
                    service: wrapper.name().to_string(),
                    dependency: dep.target.clone(),
                };
                log::error!("{}", err);
                continue;
            };

            if history.contains(&dep.target) {
                let mut path = history.clone();
                path.push(dep.target.clone());

                if !dep.optional {
                    return Err(ProjectError::Cycle(path));
                }

                let path = path.join("->");
                log::debug!("Ignoring cycle for {}", path);
                wrapper.ignore_dep(&dep.target);
                if self.with_cycle_action {
                    self.steps.push(Step::CycleAction {
                        target: Arc::clone(target),
                        path,
                    });
                }
                continue;
            }

            self.visit(target, &history)?;
        }

        if is_selected(wrapper.name(), self.selected) {
            self.steps.push(Step::Launch(Arc::clone(wrapper)));
        } else {
            self.steps.push(Step::Ignore(Arc::clone(wrapper)));
        }

        Ok(())
    }
}

/// Plan a generation over `wrappers`
pub(crate) fn plan(
    wrappers: &WrapperMap,
    selected: &BTreeSet<String>,
    with_cycle_action: bool,
) -> Result<Vec<Step>, ProjectError> {
    Planner::new(wrappers, selected, with_cycle_action).plan()
}

impl Project {
    /// Run `action` over the selected services (all when `selected` is empty)
    pub(crate) async fn traverse(
        &self,
        selected: &BTreeSet<String>,
        action: Action,
        cycle_action: Option<Action>,
    ) -> Result<(), ProjectError> {
        let limiter = self.context.max_concurrency().map(|n| Arc::new(Semaphore::new(n)));
        let mut wrappers = WrapperMap::new();
        let mut start = true;

        loop {
            let to_load: Vec<String> = if start {
                self.service_names().await
            } else {
                for wrapper in wrappers.values() {
                    wrapper.reset()?;
                }
                self.reload.lock().await.clone()
            };
            self.load_wrappers(&mut wrappers, &to_load).await?;
            self.reload.lock().await.clear();

            if let Some(missing) = selected.iter().find(|name| !wrappers.contains_key(*name)) {
                return Err(ProjectError::NoSuchService(missing.clone()));
            }

            let steps = plan(&wrappers, selected, cycle_action.is_some())?;
            self.execute(steps, &wrappers, action, cycle_action, limiter.clone())
                .await?;

            let mut first_error = None;
            let mut restart = false;
            for wrapper in wrappers.values() {
                if !is_selected(wrapper.name(), selected) {
                    continue;
                }
                match wrapper.wait().await {
                    Outcome::Success => {}
                    Outcome::Restart => restart = true,
                    Outcome::Failed(e) => {
                        log::error!("Failed to {} {}: {}", action.as_str(), wrapper.name(), e);
                        first_error.get_or_insert(ProjectError::Action {
                            service: wrapper.name().to_string(),
                            source: e,
                        });
                    }
                }
            }

            if !restart {
                return first_error.map_or(Ok(()), Err);
            }

            if let Some(hook) = &self.reload_hook {
                if let Err(e) = hook.reload(self).await {
                    log::error!("Failed calling reload callback: {}", e);
                }
            }
            log::debug!("Restarting traversal for {}", action.as_str());
            start = false;
        }
    }

    /// Construct fresh wrappers for `names`, replacing any existing ones
    async fn load_wrappers(&self, wrappers: &mut WrapperMap, names: &[String]) -> Result<(), ProjectError> {
        for name in names {
            let service = self.create_service(name).await?;
            wrappers.insert(name.clone(), Arc::new(ServiceWrapper::new(name.clone(), service)));
        }
        Ok(())
    }

    async fn execute(
        &self,
        steps: Vec<Step>,
        wrappers: &WrapperMap,
        action: Action,
        cycle_action: Option<Action>,
        limiter: Option<Arc<Semaphore>>,
    ) -> Result<(), ProjectError> {
        let deps = action
            .waits_for_dependencies()
            .then(|| Arc::new(wrappers.clone()));

        for step in steps {
            match step {
                Step::Launch(wrapper) => {
                    log::debug!("Launching action for {}", wrapper.name());
                    let deps = deps.clone();
                    let events = self.events.clone();
                    let limiter = limiter.clone();
                    tokio::spawn(async move {
                        wrapper
                            .run(deps.as_deref(), action, &events, limiter.as_deref())
                            .await;
                    });
                }
                Step::Ignore(wrapper) => wrapper.ignore(&self.events).await?,
                Step::CycleAction { target, path } => {
                    let Some(cycle_action) = cycle_action else {
                        continue;
                    };
                    log::debug!("Running cycle action for {}", path);
                    if let Err(e) = cycle_action.invoke(target.service().as_ref()).await {
                        return Err(ProjectError::CycleAction {
                            service: target.name().to_string(),
                            source: Arc::new(e),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
