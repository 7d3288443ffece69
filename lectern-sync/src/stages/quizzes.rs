//! Stage 4: create or update quizzes, binding question groups to bank ids.

use std::collections::BTreeMap;

use lectern_changes::StageScope;
use lectern_core::types::{ContentItem, ContentKind};

use crate::cache::{bank_key, content_key};
use crate::error::ItemError;
use crate::payload::quiz_payload;
use crate::remote::RemoteKind;
use crate::stages::{target, Done, StageContext, StageRun};

pub(crate) fn run(ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    if ctx.options.assets_only {
        return;
    }
    let quizzes = ctx.items_in(scope, |i| i.kind == ContentKind::Quiz);
    tracing::debug!("quizzes: {} quiz(zes)", quizzes.len());
    ctx.run_jobs(&quizzes, |i| i.logical_path.clone(), |quiz| publish_quiz(ctx, quiz), run);
}

fn publish_quiz(ctx: &StageContext<'_>, quiz: &ContentItem) -> Result<Vec<Done>, ItemError> {
    let mut bank_ids = BTreeMap::new();
    for group in &quiz.frontmatter.question_groups {
        if let Some(id) =
            ctx.resolve_id(RemoteKind::QuestionBank, &bank_key(&group.bank), &group.bank)?
        {
            bank_ids.insert(group.bank.clone(), id);
        }
    }
    let body = ctx.body(quiz)?;
    let payload = quiz_payload(quiz, &body, |bank| bank_ids.get(bank).cloned())?;
    let key = content_key(quiz.kind, &quiz.declared_name);
    let upserted = ctx.upsert(RemoteKind::Quiz, &key, &quiz.declared_name, &payload)?;
    Ok(vec![Done::new(
        upserted.change,
        target(RemoteKind::Quiz, &quiz.declared_name),
    )])
}
