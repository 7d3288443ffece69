//! Stage 8: delete remote objects nothing local declares any more.
//!
//! The plan comes from [`reconcile`]; this stage only carries it out.
//! Order matters:
//!
//! 1. content deletions (re-verified before each retry),
//! 2. module-item removals,
//! 3. empty-module deletions,
//! 4. orphaned work artifacts on disk.
//!
//! With `prune.apply` off (or in a dry run) the plan is reported and nothing
//! is touched.

use std::path::PathBuf;

use lectern_changes::StageScope;
use lectern_core::types::ContentKind;

use crate::artifacts::cleanup_orphans;
use crate::error::ItemError;
use crate::pipeline::SyncOptions;
use crate::reconcile::{
    reconcile, Deletion, LocalDeclared, ModuleDeletion, ModuleItemRemoval, Protections,
    RemoteActual,
};
use crate::remote::{RemoteError, RemoteKind};
use crate::retry::delete_verified;
use crate::stages::{target, Change, Done, StageContext, StageRun};

/// Whether a prune run with these options mutates anything.
pub(crate) fn applies(options: &SyncOptions) -> bool {
    options.prune.apply && !options.dry_run
}

pub(crate) fn run(ctx: &StageContext<'_>, _scope: &StageScope, run: &mut StageRun) {
    if ctx.options.skip_prune {
        return;
    }
    let applied = applies(ctx.options);
    let protections = Protections::new(ctx.course.protected_modules(), ctx.options.prune.assignments);

    let remote = match list_remote(ctx, &protections) {
        Ok(remote) => remote,
        Err(e) => {
            run.fail("(course)", format!("listing remote state: {e}"));
            return;
        }
    };
    let plan = reconcile(&LocalDeclared::from_course(ctx.course), &remote, &protections);
    if plan.is_empty() {
        tracing::debug!("prune: remote matches local declarations");
    } else {
        tracing::info!(
            "prune: {} deletion(s), {} module item removal(s), {} empty module(s){}",
            plan.deletions.len(),
            plan.module_item_removals.len(),
            plan.empty_module_deletions.len(),
            if applied { "" } else { " (report only)" }
        );
    }

    ctx.run_jobs(
        &plan.deletions,
        |d| PathBuf::from(format!("remote:{}/{}", d.kind, d.name)),
        |d| delete_content(ctx, d, applied),
        run,
    );
    ctx.run_jobs(
        &plan.module_item_removals,
        |r| PathBuf::from(format!("remote:module/{}", r.module_name)),
        |r| remove_item(ctx, r, applied),
        run,
    );
    for module in &plan.empty_module_deletions {
        let result = delete_module(ctx, module, applied);
        run.absorb(PathBuf::from(format!("remote:module/{}", module.name)), result);
    }

    match cleanup_orphans(ctx.layout, !applied) {
        Ok(removed) => {
            for path in removed {
                let shown = ctx.layout.relative(&path).unwrap_or(path);
                run.record(Done::new(Change::Deleted, format!("artifact {}", shown.display())));
            }
        }
        Err(e) => run.fail("(artifacts)", e),
    }
}

fn list_remote(ctx: &StageContext<'_>, protections: &Protections) -> Result<RemoteActual, RemoteError> {
    let mut remote = RemoteActual::default();
    for kind in &protections.prunable {
        let Some(remote_kind) = RemoteKind::for_content(*kind) else {
            continue;
        };
        let listed = ctx.options.retry.run(&format!("list {remote_kind}"), || {
            ctx.client.list(ctx.course_id(), remote_kind)
        })?;
        remote.objects.insert(*kind, listed);
    }
    remote.modules = ctx
        .options
        .retry
        .run("list modules", || ctx.client.list_modules(ctx.course_id()))?;
    Ok(remote)
}

fn delete_content(ctx: &StageContext<'_>, d: &Deletion, applied: bool) -> Result<Vec<Done>, ItemError> {
    let kind = remote_kind(d.kind)?;
    let done = Done::new(Change::Deleted, target(kind, &d.name));
    if !applied {
        return Ok(vec![done]);
    }
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }
    delete_verified(ctx.client, &ctx.options.retry, ctx.course_id(), kind, &d.id)?;
    tracing::info!("deleted {kind} '{}' ({})", d.name, d.id);
    ctx.forget_remote(&d.id);
    Ok(vec![done])
}

fn remove_item(ctx: &StageContext<'_>, r: &ModuleItemRemoval, applied: bool) -> Result<Vec<Done>, ItemError> {
    let done = Done::new(
        Change::RemovedFromModule,
        format!("'{}' from module '{}'", r.title, r.module_name),
    );
    if !applied {
        return Ok(vec![done]);
    }
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }
    let what = format!("remove '{}' from module '{}'", r.title, r.module_name);
    ctx.options.retry.run(&what, || {
        match ctx
            .client
            .remove_module_item(ctx.course_id(), &r.module_id, &r.item_id)
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    })?;
    Ok(vec![done])
}

fn delete_module(ctx: &StageContext<'_>, m: &ModuleDeletion, applied: bool) -> Result<Vec<Done>, ItemError> {
    let done = Done::new(Change::Deleted, format!("module '{}'", m.name));
    if !applied {
        return Ok(vec![done]);
    }
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }
    ctx.options.retry.run(&format!("delete module '{}'", m.name), || {
        match ctx.client.delete_module(ctx.course_id(), &m.id) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    })?;
    tracing::info!("deleted empty module '{}' ({})", m.name, m.id);
    Ok(vec![done])
}

fn remote_kind(kind: ContentKind) -> Result<RemoteKind, ItemError> {
    RemoteKind::for_content(kind).ok_or_else(|| ItemError::Invalid(format!("{kind} is not prunable")))
}
