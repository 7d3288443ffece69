//! Stage 6: sync course outcomes, keyed by their code.

use std::collections::BTreeSet;
use std::path::PathBuf;

use lectern_changes::StageScope;
use lectern_core::course::load_outcomes;
use lectern_core::types::OutcomeSpec;

use crate::cache::outcome_key;
use crate::error::ItemError;
use crate::payload::outcome_payload;
use crate::remote::RemoteKind;
use crate::stages::{target, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, _scope: &StageScope, run: &mut StageRun) {
    let file = ctx.layout.outcomes_file();
    let rel = ctx.layout.relative(&file).unwrap_or(file);
    let outcomes = match load_outcomes(ctx.layout) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            run.fail(rel, e);
            return;
        }
    };

    let mut seen = BTreeSet::new();
    for outcome in &outcomes {
        if !seen.insert(outcome.code.trim()) {
            run.fail(rel.clone(), format!("duplicate outcome code '{}'", outcome.code.trim()));
            return;
        }
    }
    tracing::debug!("outcomes: {} outcome(s)", outcomes.len());

    ctx.run_jobs(
        &outcomes,
        |o| PathBuf::from(format!("outcome:{}", o.code.trim())),
        |o| sync_outcome(ctx, o),
        run,
    );
}

fn sync_outcome(ctx: &StageContext<'_>, outcome: &OutcomeSpec) -> Result<Vec<Done>, ItemError> {
    if outcome.title.trim().is_empty() {
        return Err(ItemError::Invalid(format!(
            "outcome '{}' has no title",
            outcome.code.trim()
        )));
    }
    let upserted = ctx.upsert(
        RemoteKind::Outcome,
        &outcome_key(&outcome.code),
        &outcome.title,
        &outcome_payload(outcome),
    )?;
    Ok(vec![Done::new(
        upserted.change,
        target(RemoteKind::Outcome, outcome.code.trim()),
    )])
}
