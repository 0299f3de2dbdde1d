use crate::models::{RecordKind, StatusRecord};

/// Lifecycle phase of one audit job. A job enters `Running` once, may only
/// move forward through its steps, and leaves `Running` exactly once into
/// either terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Created,
    Running(usize),
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        match (*self, next) {
            (JobPhase::Created, JobPhase::Running(_)) => true,
            (JobPhase::Running(a), JobPhase::Running(b)) => b >= a,
            (JobPhase::Running(_), JobPhase::Completed) => true,
            (JobPhase::Created | JobPhase::Running(_), JobPhase::Failed) => true,
            _ => false,
        }
    }
}

impl StatusRecord {
    pub fn phase(&self) -> JobPhase {
        match self.kind {
            RecordKind::Start | RecordKind::NotFound => JobPhase::Created,
            RecordKind::Progress | RecordKind::RunComplete => {
                JobPhase::Running(self.step.unwrap_or(0))
            }
            RecordKind::Complete => JobPhase::Completed,
            RecordKind::Error => JobPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}
