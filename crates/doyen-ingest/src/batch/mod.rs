//! Unit aggregation and the batch update orchestrator

mod orchestrator;
mod unit;

pub use orchestrator::{
    author_batch, institution_batch, institution_link_batch, mesh_annotation_batch,
    mesh_term_batch, paper_link_batch, BatchReport, BatchUpdater,
};
pub use unit::{MeshOccurrence, RecordIssue, UnitBatch};
