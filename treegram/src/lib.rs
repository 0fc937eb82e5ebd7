//! treegram crate root
//!
//! Corpus-level plumbing around the `treegram-core` model types: a
//! line-oriented treebank reader and the batch pipelines behind the
//! `treegram` binary (train / eval / check / cost).
//!
//! Public API exported here:
//! - `Treebank` from `corpus`
//! - the pipeline entry points and their summary types from `pipeline`

pub mod corpus;
pub mod pipeline;

pub use corpus::Treebank;
pub use pipeline::{
    check_model_pipeline, check_table_pipeline, cost_pipeline, eval_pipeline, train_pipeline,
    CostSummary, TrainSummary,
};
