use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;

const ENV_VARS: [&str; 8] = [
    "LECTERN_COURSE_ID",
    "LECTERN_API_URL",
    "LECTERN_API_KEY",
    "LECTERN_CREDENTIAL_FILE",
    "LECTERN_PRUNE_APPLY",
    "LECTERN_PRUNE_ASSIGNMENTS",
    "LECTERN_WORKERS",
    "LECTERN_CHANGED_FILES",
];

struct Sandbox {
    home: TempDir,
    work: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Sandbox {
            home: TempDir::new().expect("home"),
            work: TempDir::new().expect("work"),
        };
        sandbox
            .course()
            .child("content/01-Week 1.module/01-welcome.page/index.md")
            .write_str("---\nname: Welcome\n---\nHello {{var:course_title}}\n")
            .expect("page");
        sandbox
            .course()
            .child("shared/variables.yaml")
            .write_str("course_title: Rhetoric 101\n")
            .expect("variables");
        sandbox
    }

    fn course(&self) -> assert_fs::fixture::ChildPath {
        self.work.child("course")
    }

    fn lectern(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("lectern"));
        cmd.env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env("NO_COLOR", "1")
            .arg("--course-root")
            .arg(self.course().path());
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn validate_accepts_a_clean_course() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("no issues"));
}

#[test]
fn validate_fails_on_duplicate_outcome_codes() {
    let sandbox = Sandbox::new();
    sandbox
        .course()
        .child("outcomes/outcomes.yaml")
        .write_str("course_outcomes:\n  - code: LO1\n    title: One\n  - code: LO1\n    title: Two\n")
        .expect("outcomes");

    let assert = sandbox.lectern().args(["validate", "--json"]).assert().failure();
    let report = stdout_json(assert.get_output());
    let issues = report["issues"].as_array().expect("issues");
    assert!(issues.iter().any(|i| i["severity"] == "error"
        && i["message"].as_str().unwrap_or_default().contains("LO1")));
}

#[test]
fn status_reports_course_id_from_the_course_config() {
    let sandbox = Sandbox::new();
    sandbox
        .course()
        .child("lectern.yaml")
        .write_str("course_id: 555\n")
        .expect("config");

    let assert = sandbox.lectern().args(["status", "--json"]).assert().success();
    let status = stdout_json(assert.get_output());
    assert_eq!(status["course_id"], "555");
    assert_eq!(status["course_id_source"], "course_config");
    assert_eq!(status["run_count"], 0);
    assert_eq!(status["cache_entries"], 0);
    assert!(status["last_run_at"].is_null());
}

#[test]
fn environment_course_id_beats_the_config_file() {
    let sandbox = Sandbox::new();
    sandbox
        .course()
        .child("lectern.yaml")
        .write_str("course_id: 555\n")
        .expect("config");

    let assert = sandbox
        .lectern()
        .env("LECTERN_COURSE_ID", "777")
        .args(["status", "--json"])
        .assert()
        .success();
    let status = stdout_json(assert.get_output());
    assert_eq!(status["course_id"], "777");
    assert_eq!(status["course_id_source"], "env");
}

#[test]
fn status_table_says_when_no_course_id_is_set() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .arg("status")
        .assert()
        .success()
        .stdout(contains("not set"))
        .stdout(contains("never"));
}

#[test]
fn sync_without_course_id_fails_before_any_remote_call() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("no course id"));
    sandbox
        .course()
        .child("_course_metadata/cache.json")
        .assert(predicates::path::missing());
}

#[test]
fn sync_without_credentials_fails_and_stores_nothing() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .args(["sync", "--course-id", "4101"])
        .assert()
        .failure()
        .stderr(contains("credentials"));
    sandbox
        .course()
        .child("_course_metadata/defaults.json")
        .assert(predicates::path::missing());
}

#[test]
fn prune_without_course_id_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .args(["prune", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("no course id"));
}

#[test]
fn diff_requires_dry_run() {
    let sandbox = Sandbox::new();
    sandbox
        .lectern()
        .args(["sync", "--diff", "--course-id", "1"])
        .assert()
        .failure()
        .stderr(contains("--dry-run"));
}

#[test]
fn list_filters_by_kind_and_module() {
    let sandbox = Sandbox::new();
    sandbox
        .course()
        .child("content/02-Week 2.module/01-essay.assignment/index.md")
        .write_str("---\nname: Essay\npublished: false\n---\nWrite.\n")
        .expect("assignment");

    let assert = sandbox.lectern().args(["list", "--json"]).assert().success();
    let report = stdout_json(assert.get_output());
    let names: Vec<&str> = report["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|i| i["name"].as_str())
        .collect();
    assert_eq!(names, ["Welcome", "Essay"]);
    assert_eq!(report["items"][1]["published"], false);
    assert_eq!(report["items"][1]["modules"][0], "Week 2");

    sandbox
        .lectern()
        .args(["list", "--module", "week 1"])
        .assert()
        .success()
        .stdout(contains("Welcome").and(contains("Essay").not()));

    sandbox
        .lectern()
        .args(["list", "--kind", "assignment", "--json"])
        .assert()
        .success()
        .stdout(contains("Essay").and(contains("Welcome").not()));
}

#[test]
fn list_names_unreadable_items() {
    let sandbox = Sandbox::new();
    sandbox
        .course()
        .child("content/02-broken.page/index.md")
        .write_str("---\nname: [unclosed\n---\nBody\n")
        .expect("broken page");

    sandbox
        .lectern()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("Welcome").and(contains("unreadable:")).and(contains("02-broken.page")));
}
