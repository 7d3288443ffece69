//! Stage 5: make sure every module exists and holds its members.
//!
//! Modules are walked in order so creation positions are stable; placing
//! members runs on the pool. Creating a module or adding an item is not
//! idempotent remotely and is never retried.

use lectern_changes::StageScope;
use lectern_core::types::{normalize_name, ContentKind, Module, ModuleMember};

use crate::cache::content_key;
use crate::error::ItemError;
use crate::remote::{
    ModuleItemKind, ModuleItemRequest, RemoteId, RemoteKind, RemoteModule, RemoteModuleItem,
};
use crate::stages::{Change, Done, StageContext, StageRun};

/// Where one member should end up.
struct Placement<'m> {
    module_id: RemoteId,
    module_name: String,
    /// Items already in the remote module; empty for a module created this run.
    existing: &'m [RemoteModuleItem],
    member: ModuleMember,
    position: u32,
}

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    let remote = match ctx
        .options
        .retry
        .run("list modules", || ctx.client.list_modules(ctx.course_id()))
    {
        Ok(modules) => modules,
        Err(e) => {
            run.fail("(course)", format!("listing modules: {e}"));
            return;
        }
    };

    let modules: Vec<Module> = ctx
        .course
        .modules()
        .into_iter()
        .filter(|m| scope.is_all() || m.members.iter().any(|mm| scope.includes(&mm.item)))
        .collect();
    tracing::debug!("modules: {} module(s) to place", modules.len());

    let mut placements = Vec::new();
    for (index, module) in modules.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            run.report.cancelled += 1;
            continue;
        }
        let Some((module_id, existing)) = ensure_module(ctx, &remote, module, index, run) else {
            continue;
        };
        for (at, member) in module.members.iter().enumerate() {
            if !scope.includes(&member.item) || ctx.has_failed(&member.item) {
                continue;
            }
            placements.push(Placement {
                module_id: module_id.clone(),
                module_name: module.name.clone(),
                existing,
                member: member.clone(),
                position: at as u32 + 1,
            });
        }
    }

    ctx.run_jobs(&placements, |p| p.member.item.clone(), |p| place(ctx, p), run);
}

/// Find `module` remotely or create it; `None` when creation failed.
fn ensure_module<'r>(
    ctx: &StageContext<'_>,
    remote: &'r [RemoteModule],
    module: &Module,
    index: usize,
    run: &mut StageRun,
) -> Option<(RemoteId, &'r [RemoteModuleItem])> {
    let wanted = normalize_name(&module.name);
    if let Some(found) = remote.iter().find(|r| normalize_name(&r.name) == wanted) {
        return Some((found.id.clone(), found.items.as_slice()));
    }

    let label = format!("module '{}'", module.name);
    if ctx.dry_run() {
        run.record(Done::new(Change::Created, label));
        return Some((ctx.next_provisional(), &[]));
    }
    match ctx
        .client
        .create_module(ctx.course_id(), &module.name, index as u32 + 1)
    {
        Ok(id) => {
            tracing::info!("created module '{}' ({id})", module.name);
            run.record(Done::new(Change::Created, label));
            Some((id, &[]))
        }
        Err(e) => {
            run.fail(format!("module:{}", module.name), e);
            None
        }
    }
}

fn place(ctx: &StageContext<'_>, p: &Placement<'_>) -> Result<Vec<Done>, ItemError> {
    let member = &p.member;
    let label = format!("'{}' in module '{}'", member.name, p.module_name);

    let request = if member.kind == ContentKind::Link {
        let item = ctx.course.item(&member.item);
        let url = item
            .and_then(|i| i.frontmatter.external_url.clone())
            .ok_or_else(|| ItemError::Invalid(format!("link '{}' has no external_url", member.name)))?;
        if p
            .existing
            .iter()
            .any(|r| r.kind == ModuleItemKind::ExternalUrl && r.external_url.as_deref() == Some(url.as_str()))
        {
            return Ok(vec![Done::new(Change::Unchanged, label)]);
        }
        ModuleItemRequest {
            kind: ModuleItemKind::ExternalUrl,
            title: member.name.clone(),
            content_id: None,
            external_url: Some(url),
            new_tab: item.and_then(|i| i.frontmatter.new_tab).unwrap_or(true),
            indent: member.indent,
            position: p.position,
        }
    } else {
        let kind = RemoteKind::for_content(member.kind)
            .ok_or_else(|| ItemError::Invalid(format!("{} cannot be placed", member.kind)))?;
        let content_id = ctx
            .resolve_id(kind, &content_key(member.kind, &member.name), &member.name)?
            .ok_or_else(|| ItemError::MissingDependency {
                what: kind.label(),
                name: member.name.clone(),
            })?;
        let item_kind = ModuleItemKind::for_content(member.kind);
        let title = normalize_name(&member.name);
        if p.existing.iter().any(|r| {
            r.content_id.as_ref() == Some(&content_id)
                || (r.kind == item_kind && normalize_name(&r.title) == title)
        }) {
            return Ok(vec![Done::new(Change::Unchanged, label)]);
        }
        ModuleItemRequest {
            kind: item_kind,
            title: member.name.clone(),
            content_id: Some(content_id),
            external_url: None,
            new_tab: false,
            indent: member.indent,
            position: p.position,
        }
    };

    if ctx.dry_run() {
        return Ok(vec![Done::new(Change::Created, label)]);
    }
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }
    ctx.client
        .add_module_item(ctx.course_id(), &p.module_id, &request)?;
    Ok(vec![Done::new(Change::Created, label)])
}
