//! Prune planning: the set difference between local declarations and remote
//! objects.
//!
//! [`reconcile`] is pure. It never sees a client, so the only deletes the
//! prune stage can issue are the ones listed in the returned plan, and a key
//! present in [`LocalDeclared`] can never appear there. Both sides are
//! compared through [`normalize_name`].
//!
//! | class         | removed when                                                      |
//! |---------------|-------------------------------------------------------------------|
//! | content       | kind is prunable and no local item of that kind has the name      |
//! | module item   | the local item exists and no longer lists that module             |
//!
//! A kind with an item that failed to load is unsettled: the local side is
//! incomplete, so neither its content nor its module items are removed.
//! | empty module  | no items left, not protected, not declared locally                |

use std::collections::{BTreeMap, BTreeSet};

use lectern_core::course::Course;
use lectern_core::types::{normalize_name, ContentKind};

use crate::remote::{RemoteId, RemoteModule, RemoteModuleItem, RemoteObject};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// What the course tree declares, normalised for comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDeclared {
    names: BTreeMap<ContentKind, BTreeSet<String>>,
    memberships: BTreeMap<(ContentKind, String), BTreeSet<String>>,
    link_urls: BTreeMap<String, BTreeSet<String>>,
    modules: BTreeSet<String>,
    unsettled: BTreeSet<ContentKind>,
}

impl LocalDeclared {
    pub fn from_course(course: &Course) -> Self {
        let mut local = LocalDeclared::default();
        for item in &course.items {
            let modules: Vec<String> = item
                .module_memberships
                .iter()
                .map(|m| m.module.clone())
                .collect();
            local.declare(item.kind, &item.declared_name, &modules);
            if let (ContentKind::Link, Some(url)) = (item.kind, &item.frontmatter.external_url) {
                local
                    .link_urls
                    .entry(url.trim().to_string())
                    .or_default()
                    .extend(modules.iter().map(|m| normalize_name(m)));
            }
        }
        for name in course.declared_module_names() {
            local.modules.insert(normalize_name(&name));
        }
        for failure in &course.load_failures {
            local.unsettle(failure.kind);
        }
        local
    }

    /// Declare one item and the modules it belongs to.
    pub fn declare(&mut self, kind: ContentKind, name: &str, modules: &[String]) {
        let key = normalize_name(name);
        self.names.entry(kind).or_default().insert(key.clone());
        let entry = self.memberships.entry((kind, key)).or_default();
        for module in modules {
            let module = normalize_name(module);
            entry.insert(module.clone());
            self.modules.insert(module);
        }
    }

    /// Mark `kind` as incompletely declared; nothing of it is pruned.
    pub fn unsettle(&mut self, kind: ContentKind) {
        self.unsettled.insert(kind);
    }

    pub fn is_unsettled(&self, kind: ContentKind) -> bool {
        self.unsettled.contains(&kind)
    }

    pub fn declare_module(&mut self, name: &str) {
        self.modules.insert(normalize_name(name));
    }

    pub fn contains(&self, kind: ContentKind, name: &str) -> bool {
        self.names
            .get(&kind)
            .is_some_and(|set| set.contains(&normalize_name(name)))
    }

    /// Modules a remote module item's object should be in; `None` when the
    /// object is not declared locally (or is not a content item).
    fn desired_modules(&self, item: &RemoteModuleItem) -> Option<&BTreeSet<String>> {
        match item.kind.content_kind()? {
            ContentKind::Link => {
                let url = item.external_url.as_deref()?.trim();
                self.link_urls.get(url)
            }
            kind => self.memberships.get(&(kind, normalize_name(&item.title))),
        }
    }
}

/// What the remote course holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteActual {
    pub objects: BTreeMap<ContentKind, Vec<RemoteObject>>,
    pub modules: Vec<RemoteModule>,
}

/// What must survive regardless of local state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protections {
    /// Normalised names of modules that are never deleted.
    pub modules: BTreeSet<String>,
    /// Content kinds the prune may delete.
    pub prunable: BTreeSet<ContentKind>,
}

impl Protections {
    /// Pages and quizzes are always prunable; assignments behind the gate.
    pub fn new<I, S>(protected_modules: I, prune_assignments: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prunable = BTreeSet::from([ContentKind::Page, ContentKind::Quiz]);
        if prune_assignments {
            prunable.insert(ContentKind::Assignment);
        }
        Protections {
            modules: protected_modules
                .into_iter()
                .map(|m| normalize_name(m.as_ref()))
                .collect(),
            prunable,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub kind: ContentKind,
    pub id: RemoteId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleItemRemoval {
    pub module_id: RemoteId,
    pub module_name: String,
    pub item_id: RemoteId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDeletion {
    pub id: RemoteId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub deletions: Vec<Deletion>,
    pub module_item_removals: Vec<ModuleItemRemoval>,
    pub empty_module_deletions: Vec<ModuleDeletion>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.module_item_removals.is_empty()
            && self.empty_module_deletions.is_empty()
    }
}

/// Compute every deletion the prune stage should perform.
pub fn reconcile(
    local: &LocalDeclared,
    remote: &RemoteActual,
    protections: &Protections,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for (kind, objects) in &remote.objects {
        if !protections.prunable.contains(kind) {
            continue;
        }
        if local.is_unsettled(*kind) {
            tracing::warn!("prune: keeping remote {kind} objects, a local {kind} failed to load");
            continue;
        }
        for object in objects {
            if !local.contains(*kind, &object.name) {
                plan.deletions.push(Deletion {
                    kind: *kind,
                    id: object.id.clone(),
                    name: object.name.clone(),
                });
            }
        }
    }

    let deleted_ids: BTreeSet<&RemoteId> = plan.deletions.iter().map(|d| &d.id).collect();
    let deleted_names: BTreeSet<(ContentKind, String)> = plan
        .deletions
        .iter()
        .map(|d| (d.kind, normalize_name(&d.name)))
        .collect();
    let goes_with_content = |item: &RemoteModuleItem| {
        item.content_id.as_ref().is_some_and(|id| deleted_ids.contains(id))
            || item
                .kind
                .content_kind()
                .is_some_and(|k| deleted_names.contains(&(k, normalize_name(&item.title))))
    };

    for module in &remote.modules {
        let module_key = normalize_name(&module.name);
        let mut remaining = 0usize;
        for item in &module.items {
            if goes_with_content(item) {
                continue;
            }
            if item.kind.content_kind().is_some_and(|k| local.is_unsettled(k)) {
                remaining += 1;
                continue;
            }
            match local.desired_modules(item) {
                Some(wanted) if !wanted.contains(&module_key) => {
                    plan.module_item_removals.push(ModuleItemRemoval {
                        module_id: module.id.clone(),
                        module_name: module.name.clone(),
                        item_id: item.id.clone(),
                        title: item.title.clone(),
                    });
                }
                _ => remaining += 1,
            }
        }
        if remaining == 0
            && !protections.modules.contains(&module_key)
            && !local.modules.contains(&module_key)
        {
            plan.empty_module_deletions.push(ModuleDeletion {
                id: module.id.clone(),
                name: module.name.clone(),
            });
        }
    }

    plan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ModuleItemKind;

    fn obj(id: &str, name: &str) -> RemoteObject {
        RemoteObject {
            id: RemoteId::from(id),
            name: name.into(),
        }
    }

    fn page_item(id: &str, title: &str) -> RemoteModuleItem {
        RemoteModuleItem {
            id: RemoteId::from(id),
            kind: ModuleItemKind::Page,
            title: title.into(),
            content_id: None,
            external_url: None,
            indent: 0,
        }
    }

    fn module(id: &str, name: &str, items: Vec<RemoteModuleItem>) -> RemoteModule {
        RemoteModule {
            id: RemoteId::from(id),
            name: name.into(),
            position: 1,
            items,
        }
    }

    fn pages(local: &[&str], remote: &[(&str, &str)]) -> ReconcilePlan {
        let mut declared = LocalDeclared::default();
        for name in local {
            declared.declare(ContentKind::Page, name, &[]);
        }
        let actual = RemoteActual {
            objects: BTreeMap::from([(
                ContentKind::Page,
                remote.iter().map(|(id, n)| obj(id, n)).collect(),
            )]),
            modules: vec![],
        };
        reconcile(&declared, &actual, &Protections::new(Vec::<String>::new(), true))
    }

    #[test]
    fn deletes_exactly_the_orphan() {
        let plan = pages(&["A", "B"], &[("1", "A"), ("2", "B"), ("3", "C")]);
        assert_eq!(
            plan.deletions,
            vec![Deletion {
                kind: ContentKind::Page,
                id: RemoteId::from("3"),
                name: "C".into()
            }]
        );
    }

    #[test]
    fn nothing_to_delete_when_sets_match() {
        assert!(pages(&["A"], &[("1", "A")]).is_empty());
    }

    #[test]
    fn comparison_is_normalised() {
        let plan = pages(&["Week  One Intro"], &[("1", " week one INTRO ")]);
        assert!(plan.deletions.is_empty());
    }

    #[test]
    fn unsettled_kind_keeps_its_objects_and_module_items() {
        let mut declared = LocalDeclared::default();
        declared.declare(ContentKind::Page, "A", &["Week 1".to_string()]);
        declared.unsettle(ContentKind::Page);
        let actual = RemoteActual {
            objects: BTreeMap::from([(ContentKind::Page, vec![obj("1", "A"), obj("2", "Broken")])]),
            modules: vec![module("m1", "Stale", vec![page_item("i1", "A")])],
        };
        let plan = reconcile(&declared, &actual, &Protections::new(Vec::<String>::new(), true));
        assert!(plan.is_empty(), "{plan:?}");
    }

    #[test]
    fn assignments_need_the_gate() {
        let mut declared = LocalDeclared::default();
        declared.declare(ContentKind::Assignment, "Kept", &[]);
        let actual = RemoteActual {
            objects: BTreeMap::from([(
                ContentKind::Assignment,
                vec![obj("1", "Kept"), obj("2", "Orphan")],
            )]),
            modules: vec![],
        };
        let gated = reconcile(&declared, &actual, &Protections::new(Vec::<String>::new(), false));
        assert!(gated.deletions.is_empty());
        let open = reconcile(&declared, &actual, &Protections::new(Vec::<String>::new(), true));
        assert_eq!(open.deletions.len(), 1);
        assert_eq!(open.deletions[0].name, "Orphan");
    }

    #[test]
    fn files_are_never_pruned() {
        let actual = RemoteActual {
            objects: BTreeMap::from([(ContentKind::File, vec![obj("1", "notes.pdf")])]),
            modules: vec![],
        };
        let plan = reconcile(
            &LocalDeclared::default(),
            &actual,
            &Protections::new(Vec::<String>::new(), true),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn module_item_removed_when_membership_dropped() {
        let mut declared = LocalDeclared::default();
        declared.declare(ContentKind::Page, "Intro", &["Week 2".into()]);
        declared.declare_module("Week 1");
        let actual = RemoteActual {
            objects: BTreeMap::from([(ContentKind::Page, vec![obj("10", "Intro")])]),
            modules: vec![
                module("m1", "Week 1", vec![page_item("i1", "Intro")]),
                module("m2", "Week 2", vec![page_item("i2", "Intro")]),
            ],
        };
        let plan = reconcile(&declared, &actual, &Protections::default());
        assert!(plan.deletions.is_empty(), "content itself is never deleted here");
        assert_eq!(plan.module_item_removals.len(), 1);
        assert_eq!(plan.module_item_removals[0].module_name, "Week 1");
        assert!(plan.empty_module_deletions.is_empty(), "Week 1 is declared locally");
    }

    #[test]
    fn undeclared_module_items_are_left_alone() {
        let actual = RemoteActual {
            objects: BTreeMap::new(),
            modules: vec![module("m1", "Extras", vec![page_item("i1", "Hand made")])],
        };
        let plan = reconcile(&LocalDeclared::default(), &actual, &Protections::default());
        assert!(plan.module_item_removals.is_empty());
        assert!(plan.empty_module_deletions.is_empty());
    }

    #[test]
    fn protected_empty_module_survives() {
        let actual = RemoteActual {
            objects: BTreeMap::new(),
            modules: vec![module("m1", "Resources", vec![]), module("m2", "Old", vec![])],
        };
        let protections = Protections::new(["resources"], true);
        let plan = reconcile(&LocalDeclared::default(), &actual, &protections);
        assert_eq!(
            plan.empty_module_deletions,
            vec![ModuleDeletion {
                id: RemoteId::from("m2"),
                name: "Old".into()
            }]
        );
    }

    #[test]
    fn module_emptied_by_content_deletion_is_removed_in_the_same_plan() {
        let actual = RemoteActual {
            objects: BTreeMap::from([(ContentKind::Page, vec![obj("10", "Gone")])]),
            modules: vec![module("m1", "Stale", vec![page_item("i1", "Gone")])],
        };
        let plan = reconcile(
            &LocalDeclared::default(),
            &actual,
            &Protections::new(Vec::<String>::new(), true),
        );
        assert_eq!(plan.deletions.len(), 1);
        assert!(plan.module_item_removals.is_empty());
        assert_eq!(plan.empty_module_deletions.len(), 1);
    }
}
