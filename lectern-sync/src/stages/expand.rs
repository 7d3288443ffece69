//! Stage 1: expand every item in scope and refresh its work artifacts.

use lectern_changes::StageScope;
use lectern_core::types::{ContentItem, ContentKind};

use crate::artifacts::{diff_source, write_artifact, WriteResult, META_FILE, SOURCE_FILE};
use crate::error::ItemError;
use crate::payload::meta_json;
use crate::stages::{Change, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    let items = ctx.items_in(scope, |i| !ctx.options.assets_only || i.kind == ContentKind::File);
    tracing::debug!("expand: {} item(s)", items.len());

    ctx.run_jobs(&items, |i| i.logical_path.clone(), |item| expand_item(ctx, item), run);

    if ctx.dry_run() && ctx.options.diff {
        for item in items.iter().filter(|i| !ctx.has_failed(&i.logical_path)) {
            let Ok(body) = ctx.body(item) else { continue };
            match diff_source(ctx.layout, &item.dir, &body) {
                Ok(Some(diff)) => run.report.diffs.push(diff),
                Ok(None) => {}
                Err(e) => tracing::warn!("diff {}: {e}", item.logical_path.display()),
            }
        }
    }
}

fn expand_item(ctx: &StageContext<'_>, item: &ContentItem) -> Result<Vec<Done>, ItemError> {
    let expansion = ctx.renderer.render_body(item)?;
    for key in &expansion.unresolved_vars {
        tracing::warn!(
            "{}: unresolved variable '{key}' left as placeholder",
            item.logical_path.display()
        );
    }
    for name in &expansion.missing_includes {
        tracing::warn!("{}: include '{name}' not found", item.logical_path.display());
    }
    ctx.store_body(&item.logical_path, expansion.text.clone());

    let meta = serde_json::to_string_pretty(&meta_json(item))
        .map_err(|e| ItemError::Invalid(format!("metadata: {e}")))?;

    let mut done = Vec::with_capacity(2);
    for (file, content) in [(SOURCE_FILE, expansion.text.as_str()), (META_FILE, meta.as_str())] {
        let path = item.dir.join(file);
        let result = write_artifact(&path, content, ctx.dry_run())
            .map_err(|e| ItemError::Invalid(e.to_string()))?;
        let target = ctx
            .layout
            .relative(&path)
            .unwrap_or(path)
            .display()
            .to_string();
        done.push(match result {
            WriteResult::Unchanged { .. } => Done::new(Change::Unchanged, target),
            WriteResult::Written { .. } | WriteResult::WouldWrite { .. } => {
                Done::new(Change::Written, target)
            }
        });
    }
    Ok(done)
}
