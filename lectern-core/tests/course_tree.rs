//! Course-tree loading: names, modules, ordering, and load-time failures.

use assert_fs::prelude::*;
use lectern_core::{course, CoreError, ContentKind, CourseLayout};
use predicates::prelude::{predicate, Predicate};

fn write_item(root: &assert_fs::TempDir, rel: &str, index: &str) {
    root.child(rel).child("index.md").write_str(index).expect("write index");
}

// ---------------------------------------------------------------------------
// 1. Items and modules
// ---------------------------------------------------------------------------

#[test]
fn loads_items_with_inferred_and_declared_names() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/01-Intro.module/01-welcome.page", "# Welcome\n");
    write_item(
        &root,
        "content/01-Intro.module/02-essay.assignment",
        "---\nname: First Essay\npoints_possible: 10\n---\nWrite.\n",
    );
    write_item(&root, "content/standalone-notes.page", "---\nname: Notes\n---\nNotes body\n");

    let layout = CourseLayout::new(root.path());
    let loaded = course::load_course(&layout).expect("load");

    assert_eq!(loaded.items.len(), 3);
    let welcome = loaded.find(ContentKind::Page, "welcome").expect("welcome");
    assert_eq!(welcome.module_memberships[0].module, "Intro");
    assert_eq!(welcome.body_template, "# Welcome\n");

    let essay = loaded.find(ContentKind::Assignment, "first  essay").expect("essay");
    assert_eq!(essay.frontmatter.points_possible, Some(10.0));
    assert_eq!(essay.body_template, "Write.\n");

    let notes = loaded.find(ContentKind::Page, "Notes").expect("notes");
    assert!(notes.module_memberships.is_empty());
}

#[test]
fn modules_follow_order_file_then_prefix() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/02-Beta.module/a.page", "A\n");
    write_item(&root, "content/01-Alpha.module/b.page", "B\n");
    write_item(&root, "content/c.page", "---\nmodules: [Appendix]\n---\nC\n");
    root.child("modules/module_order.yaml")
        .write_str("- Appendix\n")
        .expect("order");

    let layout = CourseLayout::new(root.path());
    let loaded = course::load_course(&layout).expect("load");
    let names: Vec<String> = loaded.modules().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["Appendix", "Alpha", "Beta"]);
    assert_eq!(loaded.protected_modules(), vec!["Appendix".to_string()]);
}

#[test]
fn members_sorted_by_position_then_prefix_then_folder() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/Week.module/zeta.page", "Z\n");
    write_item(&root, "content/Week.module/02-second.page", "S\n");
    write_item(&root, "content/Week.module/alpha.page", "---\nposition: 1\n---\nA\n");
    write_item(&root, "content/Week.module/01-first.page", "F\n");

    let layout = CourseLayout::new(root.path());
    let loaded = course::load_course(&layout).expect("load");
    let week = loaded
        .modules()
        .into_iter()
        .find(|m| m.name == "Week")
        .expect("module");
    let order: Vec<&str> = week.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(order, vec!["Alpha", "First", "Second", "Zeta"]);
}

#[test]
fn folders_without_index_are_skipped() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("content/draft.page/notes.txt").write_str("x").expect("write");
    write_item(&root, "content/real.page", "R\n");

    let loaded = course::load_course(&CourseLayout::new(root.path())).expect("load");
    assert_eq!(loaded.items.len(), 1);
}

#[test]
fn legacy_pages_dir_is_accepted() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "pages/module-Week 1/intro.page", "Hi\n");

    let loaded = course::load_course(&CourseLayout::new(root.path())).expect("load");
    assert_eq!(loaded.items[0].module_memberships[0].module, "Week 1");
}

#[test]
fn banks_are_listed_by_name() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/a.page", "A\n");
    root.child("quiz-banks/week1.bank.zip").write_binary(b"PK\x03\x04").expect("bank");
    root.child("quiz-banks/readme.md").write_str("ignored").expect("readme");

    let loaded = course::load_course(&CourseLayout::new(root.path())).expect("load");
    assert_eq!(loaded.banks.len(), 1);
    assert_eq!(loaded.banks[0].name, "week1");
}

// ---------------------------------------------------------------------------
// 2. Load-time failures
// ---------------------------------------------------------------------------

#[test]
fn duplicate_names_abort_load() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/one.page", "---\nname: Syllabus\n---\n1\n");
    write_item(&root, "content/two.page", "---\nname: \"  syllabus \"\n---\n2\n");

    let err = course::load_course(&CourseLayout::new(root.path())).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateName { kind: ContentKind::Page, .. }), "got: {err}");
}

#[test]
fn same_name_different_kind_is_allowed() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/one.page", "---\nname: Lab 1\n---\n1\n");
    write_item(&root, "content/two.assignment", "---\nname: Lab 1\n---\n2\n");

    let loaded = course::load_course(&CourseLayout::new(root.path())).expect("load");
    assert_eq!(loaded.items.len(), 2);
}

#[test]
fn malformed_frontmatter_sets_the_item_aside() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/bad.page", "---\nname: [unclosed\n---\nBody\n");
    write_item(&root, "content/09-typo.assignment", "---\nposition: [oops]\n---\nBody\n");
    write_item(&root, "content/good.page", "---\nname: Good\n---\nBody\n");

    let loaded = course::load_course(&CourseLayout::new(root.path())).expect("load");

    assert_eq!(loaded.items.len(), 1);
    assert_eq!(loaded.items[0].declared_name, "Good");
    assert_eq!(loaded.load_failures.len(), 2);
    let bad = &loaded.load_failures[0];
    assert_eq!(bad.logical_path, std::path::PathBuf::from("content/09-typo.assignment"));
    assert_eq!(bad.kind, ContentKind::Assignment);
    assert_eq!(bad.inferred_name, "Typo");
    assert!(predicate::str::contains("index.md").eval(&loaded.load_failures[1].error));
    assert_eq!(
        loaded.unsettled_kinds().into_iter().collect::<Vec<_>>(),
        vec![ContentKind::Page, ContentKind::Assignment]
    );
}

#[test]
fn empty_name_still_aborts_load() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    write_item(&root, "content/ok.page", "Body\n");
    write_item(&root, "content/blank.page", "---\nname: \"   \"\n---\nBody\n");

    let err = course::load_course(&CourseLayout::new(root.path())).unwrap_err();
    assert!(matches!(err, CoreError::EmptyName { .. }), "got: {err}");
}

#[test]
fn missing_content_dir_is_reported() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let err = course::load_course(&CourseLayout::new(root.path())).unwrap_err();
    assert!(matches!(err, CoreError::NoContentDir { .. }));
}
