//! Stage 7: build each assignment's rubric and attach it.
//!
//! Runs after publish and outcomes: the payload carries the assignment id and
//! the ids of any outcomes its criteria align to. Rubric creation is not
//! retried; attaching is.

use lectern_changes::StageScope;
use lectern_core::types::{ContentItem, ContentKind};

use crate::cache::{content_key, outcome_key, rubric_key};
use crate::error::ItemError;
use crate::payload::{fingerprint_json, rubric_payload};
use crate::remote::{RemoteId, RemoteKind};
use crate::stages::{target, Change, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    if ctx.options.assets_only {
        return;
    }
    let assignments = ctx.items_in(scope, |i| i.kind == ContentKind::Assignment);
    tracing::debug!("rubrics: {} assignment(s)", assignments.len());
    ctx.run_jobs(
        &assignments,
        |i| i.logical_path.clone(),
        |item| sync_rubric(ctx, item),
        run,
    );
}

fn sync_rubric(ctx: &StageContext<'_>, item: &ContentItem) -> Result<Vec<Done>, ItemError> {
    let Some(rubric) = ctx.renderer.rubric(item)? else {
        return Ok(Vec::new());
    };
    let assignment_id = ctx
        .resolve_id(
            RemoteKind::Assignment,
            &content_key(item.kind, &item.declared_name),
            &item.declared_name,
        )?
        .ok_or_else(|| ItemError::MissingDependency {
            what: "assignment",
            name: item.declared_name.clone(),
        })?;
    let payload = rubric_payload(&rubric, &assignment_id, |code| {
        ctx.known(&outcome_key(code))
    })?;

    let key = rubric_key(&item.declared_name);
    let fp = fingerprint_json(&payload);
    let label = target(RemoteKind::Rubric, &rubric.title);
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

    let rubric_id = ctx.client.create_rubric(ctx.course_id(), &payload)?;
    attach(ctx, &rubric_id, &assignment_id)?;
    tracing::info!(
        "rubric '{}' ({rubric_id}) attached to '{}'",
        rubric.title,
        item.declared_name
    );
    ctx.record(&key, &fp, rubric_id);
    Ok(vec![Done::new(change, label)])
}

fn attach(ctx: &StageContext<'_>, rubric: &RemoteId, assignment: &RemoteId) -> Result<(), ItemError> {
    ctx.options.retry.run("attach rubric", || {
        ctx.client.attach_rubric(ctx.course_id(), rubric, assignment)
    })?;
    Ok(())
}
