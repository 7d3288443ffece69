//! Stage 2: publish pages, assignments and files.
//!
//! Links are never published on their own; they only exist as module items.

use lectern_changes::StageScope;
use lectern_core::types::{ContentItem, ContentKind};

use crate::cache::content_key;
use crate::error::ItemError;
use crate::payload::{assignment_payload, file_payload, page_payload};
use crate::remote::{Payload, RemoteKind};
use crate::stages::{target, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    let items = ctx.items_in(scope, |i| match i.kind {
        ContentKind::File => true,
        ContentKind::Page | ContentKind::Assignment => !ctx.options.assets_only,
        ContentKind::Quiz | ContentKind::Link => false,
    });
    tracing::debug!("publish: {} item(s)", items.len());
    ctx.run_jobs(&items, |i| i.logical_path.clone(), |item| publish_item(ctx, item), run);
}

fn publish_item(ctx: &StageContext<'_>, item: &ContentItem) -> Result<Vec<Done>, ItemError> {
    let (kind, payload) = match item.kind {
        ContentKind::Page => (RemoteKind::Page, page_payload(item, &ctx.body(item)?)),
        ContentKind::Assignment => (
            RemoteKind::Assignment,
            assignment_payload(item, &ctx.body(item)?),
        ),
        ContentKind::File => (RemoteKind::File, file_payload(item)?),
        ContentKind::Quiz | ContentKind::Link => return Ok(Vec::new()),
    };
    let remote_name = match &payload {
        Payload::File { file_name, .. } => file_name.clone(),
        Payload::Json(_) => item.declared_name.clone(),
    };
    let key = content_key(item.kind, &item.declared_name);
    let upserted = ctx.upsert(kind, &key, &remote_name, &payload)?;
    tracing::debug!(
        "{} -> {} ({:?})",
        item.logical_path.display(),
        upserted.id,
        upserted.change
    );
    Ok(vec![Done::new(upserted.change, target(kind, &item.declared_name))])
}
