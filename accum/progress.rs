use std::fmt;

/// Stages reported during an assembly run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssemblyStage {
    Accumulation,
    Verification,
}

impl AssemblyStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Accumulation => "rank-one accumulation",
            Self::Verification => "serial reference",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for incremental progress. Called from worker threads, hence `&self`.
pub trait AssemblyProgress: Sync {
    fn on_stage_start(&self, stage: AssemblyStage, total_contributions: usize) {
        let _ = (stage, total_contributions);
    }
    fn on_stage_advance(&self, stage: AssemblyStage, processed_contributions: usize) {
        let _ = (stage, processed_contributions);
    }
    fn on_stage_finish(&self, stage: AssemblyStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl AssemblyProgress for NoopProgress {}
