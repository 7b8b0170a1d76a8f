//! Deterministic on-disk layout for a run.
//!
//! ```text
//! {output_dir}/
//!   run_summary.yaml
//!   {source}/
//!     original/{file}
//!     iter_{n}/
//!       {stage}_input.yaml
//!       {stage}_output.yaml
//!       patched/{variant}/{file}
//!       build/{label}/...
//! ```
//!
//! Every path is derived from sanitized identifiers only, so re-running an
//! iteration overwrites its own artifacts instead of creating new ones.

use crate::error::Result;
use crate::record::StageRecord;
use crate::sanitize::{sanitize_file_name, sanitize_variant_id};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Input,
    Output,
}

impl RecordKind {
    fn suffix(self) -> &'static str {
        match self {
            RecordKind::Input => "input",
            RecordKind::Output => "output",
        }
    }
}

pub const RECORD_EXTENSION: &str = "yaml";

#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything produced for one source file.
    pub fn source_dir(&self, source_name: &str) -> PathBuf {
        self.root.join(sanitize_file_name(source_name))
    }

    pub fn original_dir(&self, source_name: &str) -> PathBuf {
        self.source_dir(source_name).join("original")
    }

    pub fn iteration_dir(&self, source_name: &str, iteration: u32) -> PathBuf {
        self.source_dir(source_name).join(format!("iter_{iteration}"))
    }

    pub fn record_path(
        &self,
        source_name: &str,
        iteration: u32,
        stage: &str,
        kind: RecordKind,
    ) -> PathBuf {
        self.iteration_dir(source_name, iteration).join(format!(
            "{stage}_{}.{RECORD_EXTENSION}",
            kind.suffix()
        ))
    }

    /// Stage label for a per-variant stage run, e.g. `profiler_Variant_1`.
    pub fn variant_stage(stage: &str, variant_id: &str) -> String {
        format!("{stage}_{}", sanitize_variant_id(variant_id))
    }

    pub fn patch_dir(&self, source_name: &str, iteration: u32) -> PathBuf {
        self.iteration_dir(source_name, iteration).join("patched")
    }

    pub fn build_dir(&self, source_name: &str, iteration: u32, label: &str) -> PathBuf {
        self.iteration_dir(source_name, iteration)
            .join("build")
            .join(sanitize_variant_id(label))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(format!("run_summary.{RECORD_EXTENSION}"))
    }

    /// Persist `record` and return the path it was written to.
    pub fn write(
        &self,
        source_name: &str,
        iteration: u32,
        stage: &str,
        kind: RecordKind,
        record: &StageRecord,
    ) -> Result<PathBuf> {
        let path = self.record_path(source_name, iteration, stage, kind);
        record.save(&path)?;
        debug!(path = %path.display(), stage, "persisted stage record");
        Ok(path)
    }
}
