use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a single formation assignment (one ordered participant pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentState {
    /// Created and waiting for its first notification outcome
    Initial,
    /// The receiver acknowledged but still needs configuration from the other side
    ConfigPending,
    /// Fully established
    Ready,
    /// Creation failed; retryable through resync
    CreateError,
    /// Receiver confirmed creation and a second confirmation is outstanding
    CreateReady,
    /// Removal in progress
    Deleting,
    /// Removal failed; retryable through resync
    DeleteError,
    /// Receiver confirmed removal and a second confirmation is outstanding
    DeleteReady,
}

impl AssignmentState {
    pub const ALL: [AssignmentState; 8] = [
        Self::Initial,
        Self::ConfigPending,
        Self::Ready,
        Self::CreateError,
        Self::CreateReady,
        Self::Deleting,
        Self::DeleteError,
        Self::DeleteReady,
    ];

    /// Stable success state; resync leaves these alone
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if this is an error state that may allow recovery
    pub fn is_error(&self) -> bool {
        matches!(self, Self::CreateError | Self::DeleteError)
    }

    /// States that still expect a notification outcome
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Initial
                | Self::ConfigPending
                | Self::CreateReady
                | Self::Deleting
                | Self::DeleteReady
        )
    }

    /// Whether the assignment is on the removal path
    pub fn is_unassign_phase(&self) -> bool {
        matches!(self, Self::Deleting | Self::DeleteError | Self::DeleteReady)
    }

    /// States a receiver can report while an assign operation is outstanding
    pub fn is_reportable_on_assign(&self) -> bool {
        matches!(
            self,
            Self::CreateError | Self::Ready | Self::CreateReady | Self::ConfigPending
        )
    }

    /// States a receiver can report while an unassign operation is outstanding
    pub fn is_reportable_on_unassign(&self) -> bool {
        matches!(self, Self::DeleteError | Self::Ready | Self::DeleteReady)
    }

    /// States that may carry a configuration payload in a status report
    pub fn accepts_configuration(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::ConfigPending | Self::CreateReady | Self::DeleteReady
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::ConfigPending => "CONFIG_PENDING",
            Self::Ready => "READY",
            Self::CreateError => "CREATE_ERROR",
            Self::CreateReady => "CREATE_READY",
            Self::Deleting => "DELETING",
            Self::DeleteError => "DELETE_ERROR",
            Self::DeleteReady => "DELETE_READY",
        }
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssignmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL" => Ok(Self::Initial),
            "CONFIG_PENDING" => Ok(Self::ConfigPending),
            "READY" => Ok(Self::Ready),
            "CREATE_ERROR" => Ok(Self::CreateError),
            "CREATE_READY" => Ok(Self::CreateReady),
            "DELETING" => Ok(Self::Deleting),
            "DELETE_ERROR" => Ok(Self::DeleteError),
            "DELETE_READY" => Ok(Self::DeleteReady),
            _ => Err(format!("Invalid assignment state: {s}")),
        }
    }
}

impl Default for AssignmentState {
    fn default() -> Self {
        Self::Initial
    }
}

/// Formation-level lifecycle, driven only by the formation template's lifecycle webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormationState {
    /// Memberships are recorded but nothing is dispatched
    Draft,
    /// Lifecycle create notification outstanding
    Initial,
    Ready,
    CreateError,
    /// Participants are being removed or the lifecycle delete notification is outstanding
    Deleting,
    DeleteError,
}

impl FormationState {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::CreateError | Self::DeleteError)
    }

    /// Lifecycle work is still outstanding
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Initial | Self::Deleting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Initial => "INITIAL",
            Self::Ready => "READY",
            Self::CreateError => "CREATE_ERROR",
            Self::Deleting => "DELETING",
            Self::DeleteError => "DELETE_ERROR",
        }
    }
}

impl fmt::Display for FormationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "INITIAL" => Ok(Self::Initial),
            "READY" => Ok(Self::Ready),
            "CREATE_ERROR" => Ok(Self::CreateError),
            "DELETING" => Ok(Self::Deleting),
            "DELETE_ERROR" => Ok(Self::DeleteError),
            _ => Err(format!("Invalid formation state: {s}")),
        }
    }
}

impl Default for FormationState {
    fn default() -> Self {
        Self::Initial
    }
}

/// Aggregated condition reported for a formation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormationCondition {
    Draft,
    InProgress,
    Ready,
    Error,
}

impl fmt::Display for FormationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Ready => write!(f, "READY"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}
