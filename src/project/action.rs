//! Lifecycle actions the project can run across its services

use super::events::EventType;
use super::service::{Service, ServiceResult};

/// A lifecycle operation applied to each selected service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Build,
    Create,
    Up,
    Start,
    Down,
    Restart,
    Kill,
    Delete,
    Pause,
    Unpause,
    Pull,
    Log,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Create => "create",
            Self::Up => "up",
            Self::Start => "start",
            Self::Down => "down",
            Self::Restart => "restart",
            Self::Kill => "kill",
            Self::Delete => "delete",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Pull => "pull",
            Self::Log => "log",
        }
    }

    /// Call the matching backend method
    pub async fn invoke(&self, service: &dyn Service) -> ServiceResult {
        match self {
            Self::Build => service.build().await,
            Self::Create => service.create().await,
            Self::Up => service.up().await,
            Self::Start => service.start().await,
            Self::Down => service.down().await,
            Self::Restart => service.restart().await,
            Self::Kill => service.kill().await,
            Self::Delete => service.delete().await,
            Self::Pause => service.pause().await,
            Self::Unpause => service.unpause().await,
            Self::Pull => service.pull().await,
            Self::Log => service.log().await,
        }
    }

    /// Whether a service must wait for its dependencies before acting.
    /// Teardown-style actions run every selected service at once.
    pub fn waits_for_dependencies(&self) -> bool {
        matches!(
            self,
            Self::Build | Self::Create | Self::Up | Self::Start | Self::Restart
        )
    }

    /// Per-service (start, done) events
    pub fn service_events(&self) -> Option<(EventType, EventType)> {
        use EventType::*;
        match self {
            Self::Build => Some((ServiceBuildStart, ServiceBuild)),
            Self::Create => Some((ServiceCreateStart, ServiceCreate)),
            Self::Up => Some((ServiceUpStart, ServiceUp)),
            Self::Start => Some((ServiceStartStart, ServiceStart)),
            Self::Down => Some((ServiceDownStart, ServiceDown)),
            Self::Restart => Some((ServiceRestartStart, ServiceRestart)),
            Self::Kill => Some((ServiceKillStart, ServiceKill)),
            Self::Delete => Some((ServiceDeleteStart, ServiceDelete)),
            Self::Pause => Some((ServicePauseStart, ServicePause)),
            Self::Unpause => Some((ServiceUnpauseStart, ServiceUnpause)),
            Self::Pull => Some((ServicePullStart, ServicePull)),
            Self::Log => None,
        }
    }

    /// Project-level (start, done) events. Pull and log run without them.
    pub fn project_events(&self) -> Option<(EventType, EventType)> {
        use EventType::*;
        match self {
            Self::Build => Some((ProjectBuildStart, ProjectBuildDone)),
            Self::Create => Some((ProjectCreateStart, ProjectCreateDone)),
            Self::Up => Some((ProjectUpStart, ProjectUpDone)),
            Self::Start => Some((ProjectStartStart, ProjectStartDone)),
            Self::Down => Some((ProjectDownStart, ProjectDownDone)),
            Self::Restart => Some((ProjectRestartStart, ProjectRestartDone)),
            Self::Kill => Some((ProjectKillStart, ProjectKillDone)),
            Self::Delete => Some((ProjectDeleteStart, ProjectDeleteDone)),
            Self::Pause => Some((ProjectPauseStart, ProjectPauseDone)),
            Self::Unpause => Some((ProjectUnpauseStart, ProjectUnpauseDone)),
            Self::Pull | Self::Log => None,
        }
    }
}
