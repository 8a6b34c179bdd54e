//! Lifecycle event fan-out
//!
//! Every registered listener receives every event, in emission order. Sends
//! are awaited, so a slow listener stalls whichever task is emitting.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ContainerCreated,
    ContainerStarted,

    ServiceAdd,
    ServiceUpStart,
    ServiceUpIgnored,
    ServiceUp,
    ServiceCreateStart,
    ServiceCreate,
    ServiceDeleteStart,
    ServiceDelete,
    ServiceDownStart,
    ServiceDown,
    ServiceRestartStart,
    ServiceRestart,
    ServicePullStart,
    ServicePull,
    ServiceKillStart,
    ServiceKill,
    ServiceStartStart,
    ServiceStart,
    ServiceBuildStart,
    ServiceBuild,
    ServicePauseStart,
    ServicePause,
    ServiceUnpauseStart,
    ServiceUnpause,

    ProjectDownStart,
    ProjectDownDone,
    ProjectCreateStart,
    ProjectCreateDone,
    ProjectUpStart,
    ProjectUpDone,
    ProjectDeleteStart,
    ProjectDeleteDone,
    ProjectRestartStart,
    ProjectRestartDone,
    ProjectReload,
    ProjectReloadTrigger,
    ProjectKillStart,
    ProjectKillDone,
    ProjectStartStart,
    ProjectStartDone,
    ProjectBuildStart,
    ProjectBuildDone,
    ProjectPauseStart,
    ProjectPauseDone,
    ProjectUnpauseStart,
    ProjectUnpauseDone,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerCreated => "Created container",
            Self::ContainerStarted => "Started container",

            Self::ServiceAdd => "Adding",
            Self::ServiceUpStart => "Starting",
            Self::ServiceUpIgnored => "Ignoring",
            Self::ServiceUp => "Started",
            Self::ServiceCreateStart => "Creating",
            Self::ServiceCreate => "Created",
            Self::ServiceDeleteStart => "Deleting",
            Self::ServiceDelete => "Deleted",
            Self::ServiceDownStart => "Stopping",
            Self::ServiceDown => "Stopped",
            Self::ServiceRestartStart => "Restarting",
            Self::ServiceRestart => "Restarted",
            Self::ServicePullStart => "Pulling",
            Self::ServicePull => "Pulled",
            Self::ServiceKillStart => "Killing",
            Self::ServiceKill => "Killed",
            Self::ServiceStartStart => "Starting",
            Self::ServiceStart => "Started",
            Self::ServiceBuildStart => "Building",
            Self::ServiceBuild => "Built",
            Self::ServicePauseStart => "Pausing",
            Self::ServicePause => "Paused",
            Self::ServiceUnpauseStart => "Unpausing",
            Self::ServiceUnpause => "Unpaused",

            Self::ProjectDownStart => "Stopping project",
            Self::ProjectDownDone => "Project stopped",
            Self::ProjectCreateStart => "Creating project",
            Self::ProjectCreateDone => "Project created",
            Self::ProjectUpStart => "Starting project",
            Self::ProjectUpDone => "Project started",
            Self::ProjectDeleteStart => "Deleting project",
            Self::ProjectDeleteDone => "Project deleted",
            Self::ProjectRestartStart => "Restarting project",
            Self::ProjectRestartDone => "Project restarted",
            Self::ProjectReload => "Reloading project",
            Self::ProjectReloadTrigger => "Triggering project reload",
            Self::ProjectKillStart => "Killing project",
            Self::ProjectKillDone => "Project killed",
            Self::ProjectStartStart => "Starting project",
            Self::ProjectStartDone => "Project started",
            Self::ProjectBuildStart => "Building project",
            Self::ProjectBuildDone => "Project built",
            Self::ProjectPauseStart => "Pausing project",
            Self::ProjectPauseDone => "Project paused",
            Self::ProjectUnpauseStart => "Unpausing project",
            Self::ProjectUnpauseDone => "Project unpaused",
        }
    }

    /// Events the default listener reports at info level
    fn is_info(&self) -> bool {
        matches!(
            self,
            Self::ProjectDeleteDone
                | Self::ProjectDeleteStart
                | Self::ProjectDownDone
                | Self::ProjectDownStart
                | Self::ProjectRestartDone
                | Self::ProjectRestartStart
                | Self::ProjectUpDone
                | Self::ProjectUpStart
                | Self::ServiceDeleteStart
                | Self::ServiceDelete
                | Self::ServiceDownStart
                | Self::ServiceDown
                | Self::ServiceRestartStart
                | Self::ServiceRestart
                | Self::ServiceUpStart
                | Self::ServiceUp
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    /// `None` for project-level events
    pub service_name: Option<String>,
    pub data: BTreeMap<String, String>,
}

/// Logs every event and keeps a running "started" count
#[derive(Debug)]
struct DefaultListener {
    project: String,
    state: Mutex<DefaultListenerState>,
}

#[derive(Debug, Default)]
struct DefaultListenerState {
    up_count: usize,
    services: HashSet<String>,
}

impl DefaultListener {
    fn handle(&self, event: &Event) {
        let data = event
            .data
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        let (up, total) = {
            let mut state = self.state.lock().unwrap();
            match event.event_type {
                EventType::ServiceAdd => {
                    if let Some(name) = &event.service_name {
                        state.services.insert(name.clone());
                    }
                }
                EventType::ServiceUp => state.up_count += 1,
                _ => {}
            }
            (state.up_count, state.services.len())
        };

        let level = if event.event_type.is_info() {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        match &event.service_name {
            None => log::log!(level, "Project [{}]: {} {}", self.project, event.event_type, data),
            Some(name) => log::log!(
                level,
                "[{}/{}] [{}]: {} {}",
                up,
                total,
                name,
                event.event_type,
                data
            ),
        }
    }
}

#[derive(Debug, Clone)]
enum Listener {
    Default(Arc<DefaultListener>),
    Channel(mpsc::Sender<Event>),
}

#[derive(Debug)]
struct BusInner {
    listeners: Vec<Listener>,
    /// Set once a caller-supplied listener has replaced the default one
    custom: bool,
}

/// Event fan-out owned by a [`crate::Project`]
///
/// Cloning yields another handle to the same listener set.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create a bus with the logging listener installed
    pub fn new(project: &str) -> Self {
        let default = DefaultListener {
            project: project.to_string(),
            state: Mutex::new(DefaultListenerState::default()),
        };
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                listeners: vec![Listener::Default(Arc::new(default))],
                custom: false,
            })),
        }
    }

    /// Register a listener. The first registration replaces the default listener.
    pub fn add_listener(&self, sender: mpsc::Sender<Event>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.custom {
            inner.custom = true;
            inner.listeners.clear();
        }
        inner.listeners.push(Listener::Channel(sender));
    }

    /// Number of registered listeners (the default one included)
    pub fn listener_count(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    /// Deliver an event to every listener
    pub async fn notify(
        &self,
        event_type: EventType,
        service_name: Option<&str>,
        data: BTreeMap<String, String>,
    ) {
        let event = Event {
            event_type,
            service_name: service_name.map(str::to_string),
            data,
        };

        // Never hold the lock across a send
        let listeners = self.inner.lock().unwrap().listeners.clone();
        for listener in listeners {
            match listener {
                Listener::Default(l) => l.handle(&event),
                Listener::Channel(tx) => {
                    if tx.send(event.clone()).await.is_err() {
                        log::debug!("Event listener closed, dropping {}", event.event_type);
                    }
                }
            }
        }
    }
}
