//! In-memory LMS and course fixtures shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use lectern_core::types::normalize_name;
use lectern_core::CourseLayout;
use lectern_sync::remote::{
    LmsClient, ModuleItemRequest, Payload, RemoteError, RemoteId, RemoteKind, RemoteModule,
    RemoteModuleItem, RemoteObject,
};

// ---------------------------------------------------------------------------
// Recording client
// ---------------------------------------------------------------------------

/// One call made against [`MemoryLms`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    /// Object, module or bank name the call was about.
    pub name: String,
    pub mutating: bool,
}

#[derive(Debug, Clone)]
struct Stored {
    id: RemoteId,
    name: String,
    payload: Option<Payload>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    objects: BTreeMap<RemoteKind, Vec<Stored>>,
    modules: Vec<RemoteModule>,
    rubrics: Vec<(RemoteId, Value)>,
    attachments: Vec<(RemoteId, RemoteId)>,
    /// Requested position of each module item.
    positions: BTreeMap<RemoteId, u32>,
    calls: Vec<Call>,
    /// Names whose writes fail with the given error (any number of times).
    failing: BTreeMap<String, RemoteError>,
    /// Remaining transient failures injected before any call succeeds.
    flaky: u32,
    /// Re-importing a bank yields a fresh id, as a new migration does.
    fresh_bank_ids: bool,
}

impl State {
    fn id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::new((100 + self.next_id).to_string())
    }

    fn call(&mut self, op: &'static str, name: &str, mutating: bool) -> Result<(), RemoteError> {
        self.calls.push(Call {
            op,
            name: name.to_string(),
            mutating,
        });
        if self.flaky > 0 {
            self.flaky -= 1;
            return Err(RemoteError::Server {
                status: 503,
                message: "try again".into(),
            });
        }
        match self.failing.get(&normalize_name(name)) {
            Some(err) if mutating => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

/// A remote course held in memory that records every call.
#[derive(Default)]
pub struct MemoryLms {
    state: Mutex<State>,
}

impl MemoryLms {
    pub fn new() -> Self {
        MemoryLms::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("state lock")
    }

    /// Put an object in place as if created outside lectern.
    pub fn seed(&self, kind: RemoteKind, name: &str) -> RemoteId {
        let mut state = self.state();
        let id = state.id();
        state.objects.entry(kind).or_default().push(Stored {
            id: id.clone(),
            name: name.to_string(),
            payload: None,
        });
        id
    }

    pub fn seed_module(&self, name: &str) -> RemoteId {
        let mut state = self.state();
        let id = state.id();
        let position = state.modules.len() as u32 + 1;
        state.modules.push(RemoteModule {
            id: id.clone(),
            name: name.to_string(),
            position,
            items: Vec::new(),
        });
        id
    }

    /// Delete an object behind lectern's back.
    pub fn remove_externally(&self, kind: RemoteKind, name: &str) {
        let wanted = normalize_name(name);
        if let Some(list) = self.state().objects.get_mut(&kind) {
            list.retain(|o| normalize_name(&o.name) != wanted);
        }
    }

    pub fn fail_writes_for(&self, name: &str, err: RemoteError) {
        self.state().failing.insert(normalize_name(name), err);
    }

    pub fn flaky(&self, failures: u32) {
        self.state().flaky = failures;
    }

    pub fn fresh_bank_ids(&self) {
        self.state().fresh_bank_ids = true;
    }

    pub fn id_of(&self, kind: RemoteKind, name: &str) -> Option<RemoteId> {
        let wanted = normalize_name(name);
        self.state()
            .objects
            .get(&kind)?
            .iter()
            .find(|o| normalize_name(&o.name) == wanted)
            .map(|o| o.id.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.mutating).collect()
    }

    pub fn names(&self, kind: RemoteKind) -> Vec<String> {
        let state = self.state();
        let mut names: Vec<String> = state
            .objects
            .get(&kind)
            .map(|list| list.iter().map(|o| o.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn payload(&self, kind: RemoteKind, name: &str) -> Option<Payload> {
        let wanted = normalize_name(name);
        self.state()
            .objects
            .get(&kind)?
            .iter()
            .find(|o| normalize_name(&o.name) == wanted)
            .and_then(|o| o.payload.clone())
    }

    pub fn modules(&self) -> Vec<RemoteModule> {
        self.state().modules.clone()
    }

    pub fn module_titles(&self, module: &str) -> Vec<String> {
        self.state()
            .modules
            .iter()
            .find(|m| m.name == module)
            .map(|m| m.items.iter().map(|i| i.title.clone()).collect())
            .unwrap_or_default()
    }

    pub fn rubrics(&self) -> Vec<Value> {
        self.state().rubrics.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn attachments(&self) -> usize {
        self.state().attachments.len()
    }
}

impl LmsClient for MemoryLms {
    fn list(&self, _course: &str, kind: RemoteKind) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut state = self.state();
        state.call("list", kind.label(), false)?;
        Ok(state
            .objects
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|o| RemoteObject {
                        id: o.id.clone(),
                        name: o.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create_or_update(
        &self,
        _course: &str,
        kind: RemoteKind,
        name: &str,
        known: Option<&RemoteId>,
        payload: &Payload,
    ) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.call("create_or_update", name, true)?;
        let wanted = normalize_name(name);
        let list = state.objects.entry(kind).or_default();
        let index = match known {
            Some(id) => Some(
                list.iter()
                    .position(|o| &o.id == id)
                    .ok_or_else(|| RemoteError::NotFound(format!("{kind} {id}")))?,
            ),
            None => list.iter().position(|o| normalize_name(&o.name) == wanted),
        };
        if let Some(index) = index {
            let stored = &mut list[index];
            stored.name = name.to_string();
            stored.payload = Some(payload.clone());
            return Ok(stored.id.clone());
        }
        let id = state.id();
        state.objects.entry(kind).or_default().push(Stored {
            id: id.clone(),
            name: name.to_string(),
            payload: Some(payload.clone()),
        });
        Ok(id)
    }

    fn delete(&self, _course: &str, kind: RemoteKind, id: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        let name = state
            .objects
            .get(&kind)
            .and_then(|list| list.iter().find(|o| &o.id == id))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| id.to_string());
        state.call("delete", &name, true)?;
        let list = state.objects.entry(kind).or_default();
        let before = list.len();
        list.retain(|o| &o.id != id);
        if list.len() == before {
            return Err(RemoteError::NotFound(format!("{kind} {id}")));
        }
        for module in &mut state.modules {
            module.items.retain(|i| i.content_id.as_ref() != Some(id));
        }
        Ok(())
    }

    fn list_modules(&self, _course: &str) -> Result<Vec<RemoteModule>, RemoteError> {
        let mut state = self.state();
        state.call("list_modules", "modules", false)?;
        Ok(state.modules.clone())
    }

    fn create_module(&self, _course: &str, name: &str, position: u32) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.call("create_module", name, true)?;
        let id = state.id();
        state.modules.push(RemoteModule {
            id: id.clone(),
            name: name.to_string(),
            position,
            items: Vec::new(),
        });
        Ok(id)
    }

    fn delete_module(&self, _course: &str, module: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        let name = state
            .modules
            .iter()
            .find(|m| &m.id == module)
            .map(|m| m.name.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("module {module}")))?;
        state.call("delete_module", &name, true)?;
        state.modules.retain(|m| &m.id != module);
        Ok(())
    }

    fn add_module_item(
        &self,
        _course: &str,
        module: &RemoteId,
        item: &ModuleItemRequest,
    ) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.call("add_module_item", &item.title, true)?;
        let id = state.id();
        state.positions.insert(id.clone(), item.position);
        let State {
            modules, positions, ..
        } = &mut *state;
        let target = modules
            .iter_mut()
            .find(|m| &m.id == module)
            .ok_or_else(|| RemoteError::NotFound(format!("module {module}")))?;
        target.items.push(RemoteModuleItem {
            id: id.clone(),
            kind: item.kind.clone(),
            title: item.title.clone(),
            content_id: item.content_id.clone(),
            external_url: item.external_url.clone(),
            indent: item.indent,
        });
        target
            .items
            .sort_by_key(|i| positions.get(&i.id).copied().unwrap_or(u32::MAX));
        Ok(id)
    }

    fn remove_module_item(&self, _course: &str, module: &RemoteId, item: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call("remove_module_item", item.as_str(), true)?;
        let target = state
            .modules
            .iter_mut()
            .find(|m| &m.id == module)
            .ok_or_else(|| RemoteError::NotFound(format!("module {module}")))?;
        target.items.retain(|i| &i.id != item);
        Ok(())
    }

    fn import_question_bank(&self, _course: &str, name: &str, package: &[u8]) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.call("import_question_bank", name, true)?;
        let fresh = if state.fresh_bank_ids { Some(state.id()) } else { None };
        let wanted = normalize_name(name);
        let list = state.objects.entry(RemoteKind::QuestionBank).or_default();
        if let Some(existing) = list.iter_mut().find(|o| normalize_name(&o.name) == wanted) {
            if let Some(id) = fresh {
                existing.id = id;
            }
            existing.payload = Some(Payload::File {
                file_name: name.to_string(),
                bytes: package.to_vec(),
            });
            return Ok(existing.id.clone());
        }
        let id = state.id();
        state.objects.entry(RemoteKind::QuestionBank).or_default().push(Stored {
            id: id.clone(),
            name: name.to_string(),
            payload: Some(Payload::File {
                file_name: name.to_string(),
                bytes: package.to_vec(),
            }),
        });
        Ok(id)
    }

    fn create_rubric(&self, _course: &str, payload: &Value) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        let title = payload["title"].as_str().unwrap_or("rubric").to_string();
        state.call("create_rubric", &title, true)?;
        let id = state.id();
        state.rubrics.push((id.clone(), payload.clone()));
        Ok(id)
    }

    fn attach_rubric(&self, _course: &str, rubric: &RemoteId, assignment: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call("attach_rubric", rubric.as_str(), true)?;
        state.attachments.push((rubric.clone(), assignment.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Course fixtures
// ---------------------------------------------------------------------------

/// Course tree in a temp dir with an isolated global root.
pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub layout: CourseLayout,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = tmp.path().join("course");
        std::fs::create_dir_all(&root).expect("course dir");
        let layout = CourseLayout::new(&root).with_global_root(tmp.path().join("global"));
        Fixture { tmp, layout }
    }

    pub fn write(&self, rel: &str, text: &str) {
        let path = self.layout.root().join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, text).expect("write");
    }

    pub fn remove_dir(&self, rel: &str) {
        std::fs::remove_dir_all(self.layout.root().join(rel)).expect("remove");
    }

    pub fn path(&self, rel: &str) -> std::path::PathBuf {
        self.layout.root().join(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        Path::new(&self.path(rel)).exists()
    }

    /// A small course: two modules, two pages, an assignment with a rubric,
    /// a quiz drawing from a bank, a link and one outcome.
    pub fn standard() -> Self {
        let f = Fixture::new();
        f.write(
            "content/01-Week 1.module/01-welcome.page/index.md",
            "---\nname: Welcome\n---\nWelcome to {{var:course_title}}.\n",
        );
        f.write(
            "content/01-Week 1.module/02-essay.assignment/index.md",
            "---\nname: Essay\npoints_possible: 10\n---\nWrite an essay.\n",
        );
        f.write(
            "content/01-Week 1.module/02-essay.assignment/rubric.yaml",
            "title: Essay rubric\ncriteria:\n  - description: Thesis\n    points: 5\n    outcome_code: LO1\n    ratings:\n      - description: Full\n        points: 5\n      - description: None\n        points: 0\n  - description: Style\n    points: 5\n    ratings:\n      - description: Full\n        points: 5\n",
        );
        f.write(
            "content/01-Week 1.module/03-check.quiz/index.md",
            "---\nname: Week 1 Check\nquestion_groups:\n  - bank: week1\n    pick: 2\n---\nShort check.\n",
        );
        f.write(
            "content/01-Week 1.module/04-docs.link/index.md",
            "---\nname: Docs\nexternal_url: https://example.org/docs\n---\n",
        );
        f.write(
            "content/02-Week 2.module/01-reading.page/index.md",
            "---\nname: Reading\n---\nRead chapter two.\n",
        );
        f.write("shared/variables.yaml", "course_title: Intro to Testing\n");
        f.write(
            "outcomes/outcomes.yaml",
            "course_outcomes:\n  - code: LO1\n    title: Argue clearly\n",
        );
        f.write("quiz-banks/week1.bank.zip", "PK bank bytes v1");
        f
    }
}
