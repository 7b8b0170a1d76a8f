//! The contract every pipeline stage honors.

use crate::error::PipelineError;
use crate::record::StageRecord;
use serde::Serialize;
use tracing::warn;

/// A failed stage run, carrying whatever output was produced before failing
/// (e.g. the source code a profiler read before every preset broke).
#[derive(Debug)]
pub struct StageFailure<O> {
    pub partial: O,
    pub error: PipelineError,
}

impl<O> StageFailure<O> {
    pub fn new(partial: O, error: PipelineError) -> Self {
        Self { partial, error }
    }
}

impl<O: Default> From<PipelineError> for StageFailure<O> {
    fn from(error: PipelineError) -> Self {
        Self {
            partial: O::default(),
            error,
        }
    }
}

pub type StageResult<O> = Result<O, StageFailure<O>>;

/// A pipeline stage: configured once, then invoked with records.
pub trait Stage {
    /// Fields this stage guarantees on its output record.
    type Output: Serialize + Default;

    /// Stage name; also the prefix of the `<name>_error` field.
    fn name(&self) -> &'static str;

    /// Load static resources. Must be idempotent and fail fast with
    /// [`PipelineError::Configuration`] when something required is missing.
    fn configure(&mut self) -> Result<(), PipelineError>;

    /// Stage body. Implementations may use `?` freely; [`Stage::execute`]
    /// turns failures into data.
    fn run(&self, input: &StageRecord) -> StageResult<Self::Output>;

    /// Run the stage and fold the result into the input record.
    ///
    /// Never fails: on error the record carries the partial output and a
    /// non-null `<name>_error`; on success `<name>_error` is null.
    fn execute(&self, input: StageRecord) -> StageRecord {
        let mut record = input;
        let (output, error) = match self.run(&record) {
            Ok(output) => (output, None),
            Err(StageFailure { partial, error }) => {
                warn!(stage = self.name(), kind = error.kind(), error = %error, "stage failed");
                (partial, Some(error.to_string()))
            }
        };

        let error = match record.merge(&output) {
            Ok(()) => error,
            Err(merge_err) => Some(error.unwrap_or_else(|| merge_err.to_string())),
        };
        record.set_error(self.name(), error);
        record
    }
}
