//! Stage 3: import question banks whose bytes changed.
//!
//! Imports are not retried: a remote import job is not idempotent.

use lectern_changes::StageScope;
use lectern_core::types::QuestionBankSource;

use crate::cache::bank_key;
use crate::error::ItemError;
use crate::payload::fingerprint_bytes;
use crate::remote::RemoteKind;
use crate::stages::{target, Change, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    let banks: Vec<&QuestionBankSource> = ctx
        .course
        .banks
        .iter()
        .filter(|b| scope.includes(&b.logical_path))
        .collect();
    tracing::debug!("banks: {} bank(s)", banks.len());
    ctx.run_jobs(&banks, |b| b.logical_path.clone(), |bank| import_bank(ctx, bank), run);
}

fn import_bank(ctx: &StageContext<'_>, bank: &QuestionBankSource) -> Result<Vec<Done>, ItemError> {
    let bytes = std::fs::read(&bank.path).map_err(|source| ItemError::Io {
        path: bank.path.clone(),
        source,
    })?;
    let key = bank_key(&bank.name);
    let fp = fingerprint_bytes(&bytes);
    let label = target(RemoteKind::QuestionBank, &bank.name);

    if let Some(id) = ctx.cached(&key, &fp) {
        ctx.remember(&key, id);
        return Ok(vec![Done::new(Change::Unchanged, label)]);
    }
    let change = if ctx.known(&key).is_some() {
        Change::Updated
    } else {
        Change::Created
    };
    if ctx.dry_run() {
        ctx.remember(&key, ctx.next_provisional());
        return Ok(vec![Done::new(change, label)]);
    }
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }

    let id = ctx
        .client
        .import_question_bank(ctx.course_id(), &bank.name, &bytes)?;
    tracing::info!("imported bank '{}' as {id}", bank.name);
    ctx.record(&key, &fp, id);
    Ok(vec![Done::new(change, label)])
}
