use serde::{Deserialize, Serialize};
use std::fmt;

/// `Created -> Running -> {Completed, Terminated}`. A cycle that is terminated before it
/// runs goes straight from `Created` to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Created,
    Running,
    Completed,
    Terminated,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    pub(crate) fn can_become(&self, next: CycleState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Terminated)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Terminated)
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Terminated => "TERMINATED",
        })
    }
}
