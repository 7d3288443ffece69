//! Expansion behaviour over real course fixtures.

use assert_fs::prelude::*;
use lectern_core::{course, ContentKind, CourseLayout};
use lectern_template::{CycleKind, Renderer, TemplateError};

fn fixture() -> (assert_fs::TempDir, CourseLayout) {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    let root = tmp.child("course");
    root.create_dir_all().expect("course dir");
    let layout = CourseLayout::new(root.path()).with_global_root(tmp.child("global").path());
    (tmp, layout)
}

fn write(layout: &CourseLayout, rel: &str, text: &str) {
    let path = layout.root().join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, text).expect("write");
}

fn write_global(layout: &CourseLayout, rel: &str, text: &str) {
    let path = layout.global_root().join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, text).expect("write");
}

// ---------------------------------------------------------------------------
// 1. Includes
// ---------------------------------------------------------------------------

#[test]
fn item_local_include_beats_global() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/intro.page/index.md", "{{include:footer}}");
    write(&layout, "content/intro.page/includes/footer.md", "LOCAL FOOTER");
    write_global(&layout, "shared/footer.md", "GLOBAL FOOTER");

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    let out = renderer.render_body(&loaded.items[0]).expect("render");
    assert_eq!(out.text, "LOCAL FOOTER");
}

#[test]
fn course_include_beats_global() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/intro.page/index.md", "{{include:footer}}");
    write(&layout, "shared/footer.md", "COURSE");
    write_global(&layout, "shared/footer.md", "GLOBAL");

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    assert_eq!(renderer.render_body(&loaded.items[0]).expect("render").text, "COURSE");
}

#[test]
fn transitive_include_cycle_names_the_chain() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/intro.page/index.md", "start {{include:a}}");
    write(&layout, "shared/a.md", "A {{include:b}}");
    write(&layout, "shared/b.md", "B {{include:a}}");

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    let err = renderer.render_body(&loaded.items[0]).unwrap_err();
    let TemplateError::Cycle(cycle) = err else {
        panic!("expected a cycle error, got {err}");
    };
    assert_eq!(cycle.kind, CycleKind::Include);
    assert_eq!(cycle.chain, vec!["a", "b", "a"]);
    assert_eq!(cycle.offending(), "a");
}

#[test]
fn frontmatter_variable_beats_shared() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/intro.page/index.md", "---\nroom: Lab 3\n---\n{{var:room}} {{var:term}}");
    write(&layout, "shared/variables.yaml", "room: B12\nterm: Fall\n");
    write_global(&layout, "shared/variables.yaml", "term: Any\n");

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    assert_eq!(renderer.render_body(&loaded.items[0]).expect("render").text, "Lab 3 Fall");
}

// ---------------------------------------------------------------------------
// 2. Rubric rows
// ---------------------------------------------------------------------------

const CRITERION: &str = "    points: 5\n    ratings:\n      - {description: Full, points: 5}\n      - {description: None, points: 0}\n";

fn inline_rubric() -> String {
    format!(
        "title: Essay rubric\ncriteria:\n  - description: Thesis\n{CRITERION}  - description: Evidence\n{CRITERION}  - \"{{{{rubric_row:writing}}}}\"\n  - description: Citations\n{CRITERION}"
    )
}

#[test]
fn row_reference_expands_in_place() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/essay.assignment/index.md", "Write an essay.");
    write(&layout, "content/essay.assignment/rubric.yaml", &inline_rubric());
    write(
        &layout,
        "rubrics/rows/writing.yaml",
        &format!(
            "- description: Grammar\n  outcome_code: CLO2\n{}- description: Style\n{}",
            CRITERION.replacen("    ", "  ", 1).replace("\n    ", "\n  "),
            CRITERION.replacen("    ", "  ", 1).replace("\n    ", "\n  "),
        ),
    );

    let loaded = course::load_course(&layout).expect("load");
    let essay = loaded.find(ContentKind::Assignment, "Essay").expect("essay");
    let renderer = Renderer::load(&layout).expect("renderer");
    let rubric = renderer.rubric(essay).expect("resolve").expect("rubric");

    let names: Vec<&str> = rubric.criteria.iter().map(|c| c.description.as_str()).collect();
    assert_eq!(names, vec!["Thesis", "Evidence", "Grammar", "Style", "Citations"]);
    assert_eq!(rubric.criteria[2].outcome_code.as_deref(), Some("CLO2"));
    assert_eq!(rubric.points_possible(), 25.0);
}

#[test]
fn shared_rubric_via_frontmatter_expands_variables() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/lab.assignment/index.md", "---\nuse_rubric: lab\nlab_no: \"4\"\n---\nDo it.");
    write(
        &layout,
        "rubrics/lab.yaml",
        &format!("title: Lab {{{{var:lab_no}}}}\ncriteria:\n  - description: Results\n{CRITERION}"),
    );

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    let rubric = renderer.rubric(&loaded.items[0]).expect("resolve").expect("rubric");
    assert_eq!(rubric.title, "Lab 4");
}

#[test]
fn missing_row_is_an_item_error() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/essay.assignment/index.md", "x");
    write(&layout, "content/essay.assignment/rubric.yaml", &inline_rubric());

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    let err = renderer.rubric(&loaded.items[0]).unwrap_err();
    assert!(
        matches!(err, TemplateError::UnresolvedRubricRow { ref name, .. } if name == "writing"),
        "got: {err}"
    );
}

#[test]
fn nested_row_cycle_is_detected() {
    let (_tmp, layout) = fixture();
    write(&layout, "content/essay.assignment/index.md", "x");
    write(&layout, "content/essay.assignment/rubric.yaml", &inline_rubric());
    write(&layout, "rubrics/rows/writing.yaml", "- \"{{rubric_row:style}}\"\n");
    write(&layout, "rubrics/rows/style.yaml", "- \"{{rubric_row:writing}}\"\n");

    let loaded = course::load_course(&layout).expect("load");
    let renderer = Renderer::load(&layout).expect("renderer");
    let err = renderer.rubric(&loaded.items[0]).unwrap_err();
    let TemplateError::Cycle(cycle) = err else {
        panic!("expected cycle, got {err}");
    };
    assert_eq!(cycle.kind, CycleKind::RubricRow);
    assert_eq!(cycle.chain, vec!["writing", "style", "writing"]);
}
