use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::consts::PARALLEL_KEY_THRESHOLD;
use crate::error::Result;
use crate::keys::RecordKey;

use super::context::PipelineContext;
use super::types::{KeyFailure, PopulateSummary, ProgressReporter, RunOutcome, StageName};

/// A keyed computation whose records are written at most once per key.
///
/// `make` must not write anything the stage owns; the single insert in
/// `persist` is what makes a key complete.
pub trait Stage: Send + Sync {
    type Key: RecordKey;
    type Record: Serialize + Send;

    fn name(&self) -> StageName;

    /// Keys whose upstream records all exist.
    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<Self::Key>>;

    fn make(&self, ctx: &PipelineContext, key: &Self::Key) -> Result<Self::Record>;

    /// Insert unless present. Returns whether this call inserted.
    fn persist(
        &self,
        ctx: &PipelineContext,
        key: &Self::Key,
        record: &Self::Record,
    ) -> Result<bool> {
        ctx.catalog.insert_record(self.name().table(), key, record)
    }
}

/// Eligible keys that have no record yet.
pub fn pending_keys<S: Stage>(stage: &S, ctx: &PipelineContext) -> Result<Vec<S::Key>> {
    without_records(stage, ctx, stage.key_source(ctx)?)
}

fn without_records<S: Stage>(
    stage: &S,
    ctx: &PipelineContext,
    keys: Vec<S::Key>,
) -> Result<Vec<S::Key>> {
    let done: HashSet<String> = ctx
        .catalog
        .store()
        .keys(stage.name().table())?
        .into_iter()
        .collect();
    let mut pending = Vec::with_capacity(keys.len());
    for key in keys {
        if !done.contains(&key.encode()?) {
            pending.push(key);
        }
    }
    Ok(pending)
}

/// Run one key. A key that already has a record is left untouched, and a
/// writer that loses an insert race reports `AlreadyPresent`.
pub fn run_key<S: Stage>(stage: &S, ctx: &PipelineContext, key: &S::Key) -> Result<RunOutcome> {
    if ctx.catalog.contains(stage.name().table(), key)? {
        return Ok(RunOutcome::AlreadyPresent);
    }
    let record = stage.make(ctx, key)?;
    if stage.persist(ctx, key, &record)? {
        debug!(stage = %stage.name(), key = %key, "Inserted");
        Ok(RunOutcome::Inserted)
    } else {
        debug!(stage = %stage.name(), key = %key, "Record appeared while running, discarded");
        Ok(RunOutcome::AlreadyPresent)
    }
}

/// Run every pending key of `stage`, collecting per-key failures instead of
/// stopping at the first one.
pub fn populate<S: Stage>(
    stage: &S,
    ctx: &PipelineContext,
    parallel: bool,
    reporter: &dyn ProgressReporter,
) -> Result<PopulateSummary> {
    let mut summary = PopulateSummary::new(stage.name());
    let eligible = stage.key_source(ctx)?;
    summary.eligible = eligible.len();
    let pending = without_records(stage, ctx, eligible)?;
    summary.skipped = summary.eligible - pending.len();

    reporter.begin_stage(stage.name(), Some(pending.len()));
    let done = AtomicUsize::new(0);
    let attempt = |key: &S::Key| {
        let outcome = run_key(stage, ctx, key);
        let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.advance(completed);
        outcome
    };

    let outcomes: Vec<Result<RunOutcome>> = if parallel && pending.len() >= PARALLEL_KEY_THRESHOLD
    {
        pending.par_iter().map(attempt).collect()
    } else {
        pending.iter().map(attempt).collect()
    };
    reporter.finish_stage();

    for (key, outcome) in pending.iter().zip(outcomes) {
        match outcome {
            Ok(RunOutcome::Inserted) => summary.inserted += 1,
            Ok(RunOutcome::AlreadyPresent) => summary.skipped += 1,
            Err(e) => {
                warn!(stage = %stage.name(), key = %key, error = %e, "Key failed");
                summary.failed.push(KeyFailure::new(key, &e));
            }
        }
    }
    Ok(summary)
}
