use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    ChildrenWaiting,
    Succeeded,
    Failed,
    Aborted,
    Errored,
    Expired,
    Skipped,
    IgnoreFailed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::AsyncWaiting => "ASYNC_WAITING",
            Self::TaskWaiting => "TASK_WAITING",
            Self::ChildrenWaiting => "CHILDREN_WAITING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
            Self::Errored => "ERRORED",
            Self::Expired => "EXPIRED",
            Self::Skipped => "SKIPPED",
            Self::IgnoreFailed => "IGNORE_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "ASYNC_WAITING" => Some(Self::AsyncWaiting),
            "TASK_WAITING" => Some(Self::TaskWaiting),
            "CHILDREN_WAITING" => Some(Self::ChildrenWaiting),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "ABORTED" => Some(Self::Aborted),
            "ERRORED" => Some(Self::Errored),
            "EXPIRED" => Some(Self::Expired),
            "SKIPPED" => Some(Self::Skipped),
            "IGNORE_FAILED" => Some(Self::IgnoreFailed),
            _ => None,
        }
    }

    /// Terminal statuses; a node never leaves one of these.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Aborted
                | Self::Errored
                | Self::Expired
                | Self::Skipped
                | Self::IgnoreFailed
        )
    }

    /// Failure-like statuses that trigger adviser re-routing. ABORTED is not part
    /// of this set.
    pub fn is_broke(&self) -> bool {
        matches!(self, Self::Failed | Self::Errored | Self::Expired)
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped | Self::IgnoreFailed)
    }

    pub fn is_broke_or_aborted(&self) -> bool {
        self.is_broke() || *self == Self::Aborted
    }

    /// Aggregate status of a set of finished children.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a Status>) -> Status {
        let mut result = Status::Succeeded;
        for status in statuses {
            match status {
                Status::Aborted => return Status::Aborted,
                Status::Errored => result = Status::Errored,
                Status::Failed | Status::Expired if result != Status::Errored => {
                    result = Status::Failed
                }
                _ => {}
            }
        }
        result
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
