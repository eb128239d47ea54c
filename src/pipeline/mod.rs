//! Execution of single units of work, and the orchestrator that drives them.

pub mod orchestrator;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{watch_folders, Database};
use crate::error::Result;
use crate::faces::{run_clustering_pass, ClusteringSettings, ExtractionOutcome, FaceExtractor};
use crate::scanner::{self, MediaSource, ScanReport, ScanScope};
use crate::tasks::WorkTarget;

pub use orchestrator::Orchestrator;

/// Everything a unit of work needs to run.
pub struct PipelineContext {
    pub db: Arc<Database>,
    pub source: Arc<dyn MediaSource>,
    pub extractor: Arc<FaceExtractor>,
    pub clustering: ClusteringSettings,
}

impl PipelineContext {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn MediaSource>,
        extractor: Arc<FaceExtractor>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            source,
            extractor,
            clustering: ClusteringSettings::from(&config.faces),
        }
    }

    /// Run one attempt of a unit. Blocking.
    ///
    /// Returns the follow-up work to enqueue once the unit has succeeded.
    pub fn execute(&self, target: WorkTarget, cancel: &AtomicBool) -> Result<Vec<WorkTarget>> {
        match target {
            WorkTarget::GlobalSync => {
                let report = scanner::scan(&self.db, self.source.as_ref(), &ScanScope::All, cancel)?;
                let mut follow_ups = extraction_follow_ups(&report);
                follow_ups.push(WorkTarget::Clustering);
                Ok(follow_ups)
            }
            WorkTarget::FolderScan { folder_id } => {
                let Some(folder) = self.db.read(|c| watch_folders::get(c, folder_id))? else {
                    tracing::debug!(folder_id, "Watch folder removed, skipping scan");
                    return Ok(Vec::new());
                };
                if !folder.is_enabled {
                    tracing::debug!(folder_id, path = %folder.path, "Watch folder disabled, skipping scan");
                    return Ok(Vec::new());
                }
                let scope = ScanScope::Folder(folder.path);
                let report = scanner::scan(&self.db, self.source.as_ref(), &scope, cancel)?;
                Ok(extraction_follow_ups(&report))
            }
            WorkTarget::ExtractFaces { photo_id } => {
                match self.extractor.process_photo(&self.db, self.source.as_ref(), photo_id)? {
                    ExtractionOutcome::Extracted { face_ids } if !face_ids.is_empty() => {
                        Ok(vec![WorkTarget::Clustering])
                    }
                    ExtractionOutcome::Superseded => {
                        tracing::info!(photo_id, "Photo changed during extraction, extracting again");
                        Ok(vec![WorkTarget::ExtractFaces { photo_id }])
                    }
                    _ => Ok(Vec::new()),
                }
            }
            WorkTarget::Clustering => {
                run_clustering_pass(&self.db, &self.clustering)?;
                Ok(Vec::new())
            }
        }
    }
}

fn extraction_follow_ups(report: &ScanReport) -> Vec<WorkTarget> {
    report
        .needs_extraction
        .iter()
        .map(|&photo_id| WorkTarget::ExtractFaces { photo_id })
        .collect()
}
