//! Canvas REST implementation of [`LmsClient`].
//!
//! Two agents share one bearer token: the standard agent (connect/read
//! timeouts) for JSON calls, and the upload agent (longer timeout, no
//! redirect following) for file and question-bank uploads. The client never
//! retries; the pipeline's retry policy decides that from the mapped
//! [`RemoteError`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use ureq::{Agent, AgentBuilder, Response};

use lectern_core::config::{Credentials, HttpSettings};
use lectern_core::types::normalize_name;
use lectern_sync::payload::fingerprint_bytes;
use lectern_sync::{
    LmsClient, ModuleItemKind, ModuleItemRequest, Payload, RemoteError, RemoteId, RemoteKind,
    RemoteModule, RemoteModuleItem, RemoteObject,
};

const PER_PAGE: &str = "100";
const MIGRATION_POLLS: u32 = 30;
const MIGRATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ERROR_BODY_LIMIT: usize = 300;

pub struct CanvasClient {
    base: String,
    token: String,
    agent: Agent,
    uploads: Agent,
    /// Root outcome group per course.
    outcome_roots: Mutex<BTreeMap<String, String>>,
}

impl CanvasClient {
    pub fn new(credentials: &Credentials, http: &HttpSettings) -> Self {
        let user_agent = format!("lectern/{}", env!("CARGO_PKG_VERSION"));
        let agent = AgentBuilder::new()
            .timeout_connect(http.connect_timeout)
            .timeout_read(http.read_timeout)
            .timeout_write(http.read_timeout)
            .user_agent(&user_agent)
            .build();
        let uploads = AgentBuilder::new()
            .timeout_connect(http.connect_timeout)
            .timeout_read(http.upload_timeout)
            .timeout_write(http.upload_timeout)
            .redirects(0)
            .user_agent(&user_agent)
            .build();
        CanvasClient {
            base: credentials.api_url.trim_end_matches('/').to_string(),
            token: credentials.api_key.clone(),
            agent,
            uploads,
            outcome_roots: Mutex::new(BTreeMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/api/v1/{}", self.base, path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json")
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = self.url(path);
        let response = self.request("GET", &url).call().map_err(|e| map_error(&url, e))?;
        decode(&url, response)
    }

    /// Every page of a list endpoint, following `Link: rel="next"`.
    fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, RemoteError> {
        let mut out = Vec::new();
        let mut url = self.url(path);
        let mut first = true;
        loop {
            let mut request = self.request("GET", &url);
            if first {
                request = request.query("per_page", PER_PAGE);
            }
            let response = request.call().map_err(|e| map_error(&url, e))?;
            let next = next_link(response.header("Link"));
            let page: Vec<T> = decode(&url, response)?;
            out.extend(page);
            match next {
                Some(next) => url = next,
                None => return Ok(out),
            }
            first = false;
        }
    }

    fn send<T: DeserializeOwned>(&self, method: &str, path: &str, body: &Value) -> Result<T, RemoteError> {
        let url = self.url(path);
        let response = self
            .request(method, &url)
            .send_json(body)
            .map_err(|e| map_error(&url, e))?;
        decode(&url, response)
    }

    fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.url(path);
        self.request("DELETE", &url)
            .call()
            .map_err(|e| map_error(&url, e))?;
        Ok(())
    }

    /// Multipart upload to a pre-signed URL; returns the created id when the
    /// remote reports one.
    fn upload(
        &self,
        upload_url: &str,
        params: &BTreeMap<String, Value>,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Option<RemoteId>, RemoteError> {
        let boundary = format!("lectern-{}", &fingerprint_bytes(bytes)[..24]);
        let body = multipart_body(&boundary, params, file_name, bytes);
        let response = self
            .uploads
            .post(upload_url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|e| map_error(upload_url, e))?;

        if (300..400).contains(&response.status()) {
            let Some(location) = response.header("Location").map(str::to_string) else {
                return Ok(None);
            };
            let confirmed: IdOnly = self.get(&location)?;
            return Ok(confirmed.id.map(RemoteId::from));
        }
        let text = response.into_string().unwrap_or_default();
        Ok(serde_json::from_str::<IdOnly>(&text)
            .ok()
            .and_then(|r| r.id)
            .map(RemoteId::from))
    }

    // -----------------------------------------------------------------------
    // Content objects
    // -----------------------------------------------------------------------

    fn find_by_name(
        &self,
        course: &str,
        kind: RemoteKind,
        name: &str,
    ) -> Result<Option<RemoteId>, RemoteError> {
        let wanted = normalize_name(name);
        Ok(self
            .list(course, kind)?
            .into_iter()
            .find(|o| normalize_name(&o.name) == wanted)
            .map(|o| o.id))
    }

    fn upsert_content(
        &self,
        course: &str,
        kind: RemoteKind,
        name: &str,
        known: Option<&RemoteId>,
        fields: &Value,
    ) -> Result<RemoteId, RemoteError> {
        let (collection, wrapper) = match kind {
            RemoteKind::Page => ("pages", "wiki_page"),
            RemoteKind::Assignment => ("assignments", "assignment"),
            RemoteKind::Quiz => ("quizzes", "quiz"),
            other => return Err(RemoteError::Unsupported(format!("upsert of {other}"))),
        };
        let mut object = fields.as_object().cloned().unwrap_or_default();
        let groups = object.remove("question_groups");
        let mut wrapped = Map::new();
        wrapped.insert(wrapper.to_string(), Value::Object(object));
        let body = Value::Object(wrapped);

        let target = match known {
            Some(id) => Some(id.clone()),
            None => self.find_by_name(course, kind, name)?,
        };
        let record: Listed = match &target {
            Some(id) => self.send("PUT", &format!("courses/{course}/{collection}/{id}"), &body)?,
            None => self.send("POST", &format!("courses/{course}/{collection}"), &body)?,
        };
        let id = record
            .remote_id(kind)
            .ok_or_else(|| RemoteError::Transport(format!("{kind} '{name}': response without id")))?;

        if kind == RemoteKind::Quiz {
            self.replace_quiz_groups(course, &id, groups.as_ref())?;
        }
        Ok(id)
    }

    /// Drop the quiz's question groups and recreate them from `groups`.
    fn replace_quiz_groups(
        &self,
        course: &str,
        quiz: &RemoteId,
        groups: Option<&Value>,
    ) -> Result<(), RemoteError> {
        let questions: Vec<QuizQuestion> =
            self.get_all(&format!("courses/{course}/quizzes/{quiz}/questions"))?;
        let existing: BTreeSet<String> = questions
            .into_iter()
            .filter_map(|q| q.quiz_group_id.map(|id| RemoteId::from(id).0))
            .collect();
        for group in existing {
            match self.remove(&format!("courses/{course}/quizzes/{quiz}/groups/{group}")) {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for group in groups.and_then(Value::as_array).into_iter().flatten() {
            let body = json!({
                "quiz_groups": [{
                    "name": group.get("bank").cloned().unwrap_or(Value::Null),
                    "pick_count": group.get("pick_count").cloned().unwrap_or(json!(1)),
                    "question_points": group.get("question_points").cloned().unwrap_or(Value::Null),
                    "assessment_question_bank_id": numeric(group.get("bank_id")),
                }]
            });
            let _: Value = self.send("POST", &format!("courses/{course}/quizzes/{quiz}/groups"), &body)?;
        }
        Ok(())
    }

    fn upload_file(
        &self,
        course: &str,
        known: Option<&RemoteId>,
        payload: &Payload,
    ) -> Result<RemoteId, RemoteError> {
        let Payload::File { file_name, bytes } = payload else {
            return Err(RemoteError::Unsupported("file upload needs a binary payload".into()));
        };
        if let Some(id) = known {
            // A stale id must surface as NotFound before uploading.
            let _: Value = self.get(&format!("files/{id}"))?;
        }
        let ticket: UploadTicket = self.send(
            "POST",
            &format!("courses/{course}/files"),
            &json!({ "name": file_name, "size": bytes.len(), "on_duplicate": "overwrite" }),
        )?;
        match self.upload(&ticket.upload_url, &ticket.upload_params, file_name, bytes)? {
            Some(id) => Ok(id),
            None => self
                .find_by_name(course, RemoteKind::File, file_name)?
                .ok_or_else(|| RemoteError::Job(format!("upload of '{file_name}' left no file"))),
        }
    }

    fn outcome_root(&self, course: &str) -> Result<String, RemoteError> {
        let mut roots = self
            .outcome_roots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(root) = roots.get(course) {
            return Ok(root.clone());
        }
        let group: IdOnly = self.get(&format!("courses/{course}/root_outcome_group"))?;
        let root = group
            .id
            .map(|id| RemoteId::from(id).0)
            .ok_or_else(|| RemoteError::Transport("root outcome group without id".into()))?;
        roots.insert(course.to_string(), root.clone());
        Ok(root)
    }

    fn upsert_outcome(
        &self,
        course: &str,
        name: &str,
        known: Option<&RemoteId>,
        fields: &Value,
    ) -> Result<RemoteId, RemoteError> {
        let target = match known {
            Some(id) => Some(id.clone()),
            None => self.find_by_name(course, RemoteKind::Outcome, name)?,
        };
        if let Some(id) = target {
            let _: Value = self.send("PUT", &format!("outcomes/{id}"), fields)?;
            return Ok(id);
        }
        let root = self.outcome_root(course)?;
        let link: OutcomeLink = self.send(
            "POST",
            &format!("courses/{course}/outcome_groups/{root}/outcomes"),
            fields,
        )?;
        link.outcome
            .id
            .map(RemoteId::from)
            .ok_or_else(|| RemoteError::Transport(format!("outcome '{name}': response without id")))
    }

    fn module_items(&self, course: &str, module: &RemoteId) -> Result<Vec<ModuleItemRecord>, RemoteError> {
        self.get_all(&format!("courses/{course}/modules/{module}/items"))
    }
}

impl LmsClient for CanvasClient {
    fn list(&self, course: &str, kind: RemoteKind) -> Result<Vec<RemoteObject>, RemoteError> {
        if kind == RemoteKind::Outcome {
            let links: Vec<OutcomeLink> =
                self.get_all(&format!("courses/{course}/outcome_group_links?outcome_style=full"))?;
            return Ok(links
                .into_iter()
                .filter_map(|l| {
                    Some(RemoteObject {
                        id: RemoteId::from(l.outcome.id?),
                        name: l.outcome.title.unwrap_or_default(),
                    })
                })
                .collect());
        }
        let collection = match kind {
            RemoteKind::Page => "pages",
            RemoteKind::Assignment => "assignments",
            RemoteKind::Quiz => "quizzes",
            RemoteKind::File => "files",
            RemoteKind::QuestionBank => "question_banks",
            RemoteKind::Rubric => "rubrics",
            RemoteKind::Outcome => "outcome_group_links",
        };
        let records: Vec<Listed> = self.get_all(&format!("courses/{course}/{collection}"))?;
        Ok(records
            .into_iter()
            .filter_map(|r| {
                let id = r.remote_id(kind)?;
                Some(RemoteObject {
                    id,
                    name: r.name(kind),
                })
            })
            .collect())
    }

    fn create_or_update(
        &self,
        course: &str,
        kind: RemoteKind,
        name: &str,
        known: Option<&RemoteId>,
        payload: &Payload,
    ) -> Result<RemoteId, RemoteError> {
        match (kind, payload) {
            (RemoteKind::File, _) => self.upload_file(course, known, payload),
            (RemoteKind::Outcome, Payload::Json(fields)) => {
                self.upsert_outcome(course, name, known, fields)
            }
            (RemoteKind::Page | RemoteKind::Assignment | RemoteKind::Quiz, Payload::Json(fields)) => {
                self.upsert_content(course, kind, name, known, fields)
            }
            (other, _) => Err(RemoteError::Unsupported(format!(
                "create or update of {other} '{name}'"
            ))),
        }
    }

    fn delete(&self, course: &str, kind: RemoteKind, id: &RemoteId) -> Result<(), RemoteError> {
        let path = match kind {
            RemoteKind::Page => format!("courses/{course}/pages/{id}"),
            RemoteKind::Assignment => format!("courses/{course}/assignments/{id}"),
            RemoteKind::Quiz => format!("courses/{course}/quizzes/{id}"),
            RemoteKind::File => format!("files/{id}"),
            RemoteKind::Rubric => format!("courses/{course}/rubrics/{id}"),
            RemoteKind::Outcome => {
                let root = self.outcome_root(course)?;
                format!("courses/{course}/outcome_groups/{root}/outcomes/{id}")
            }
            RemoteKind::QuestionBank => {
                return Err(RemoteError::Unsupported("deleting question banks".into()))
            }
        };
        self.remove(&path)
    }

    fn list_modules(&self, course: &str) -> Result<Vec<RemoteModule>, RemoteError> {
        let records: Vec<ModuleRecord> =
            self.get_all(&format!("courses/{course}/modules?include[]=items"))?;
        let mut modules = Vec::with_capacity(records.len());
        for record in records {
            let id = RemoteId::from(record.id);
            // Large modules come back without inline items.
            let items = match record.items {
                Some(items) => items,
                None => self.module_items(course, &id)?,
            };
            modules.push(RemoteModule {
                id,
                name: record.name,
                position: record.position,
                items: items.into_iter().map(ModuleItemRecord::into_remote).collect(),
            });
        }
        modules.sort_by_key(|m| m.position);
        Ok(modules)
    }

    fn create_module(&self, course: &str, name: &str, position: u32) -> Result<RemoteId, RemoteError> {
        let created: IdOnly = self.send(
            "POST",
            &format!("courses/{course}/modules"),
            &json!({ "module": { "name": name, "position": position } }),
        )?;
        created
            .id
            .map(RemoteId::from)
            .ok_or_else(|| RemoteError::Transport(format!("module '{name}': response without id")))
    }

    fn delete_module(&self, course: &str, module: &RemoteId) -> Result<(), RemoteError> {
        self.remove(&format!("courses/{course}/modules/{module}"))
    }

    fn add_module_item(
        &self,
        course: &str,
        module: &RemoteId,
        item: &ModuleItemRequest,
    ) -> Result<RemoteId, RemoteError> {
        let created: IdOnly = self.send(
            "POST",
            &format!("courses/{course}/modules/{module}/items"),
            &module_item_body(item),
        )?;
        created
            .id
            .map(RemoteId::from)
            .ok_or_else(|| RemoteError::Transport(format!("module item '{}': response without id", item.title)))
    }

    fn remove_module_item(
        &self,
        course: &str,
        module: &RemoteId,
        item: &RemoteId,
    ) -> Result<(), RemoteError> {
        self.remove(&format!("courses/{course}/modules/{module}/items/{item}"))
    }

    fn import_question_bank(
        &self,
        course: &str,
        name: &str,
        package: &[u8],
    ) -> Result<RemoteId, RemoteError> {
        let archive = format!("{name}.zip");
        let migration: Migration = self.send(
            "POST",
            &format!("courses/{course}/content_migrations"),
            &json!({
                "migration_type": "qti_converter",
                "settings": { "question_bank_name": name },
                "pre_attachment": { "name": archive, "size": package.len() },
            }),
        )?;
        let slot = migration
            .pre_attachment
            .ok_or_else(|| RemoteError::Job(format!("bank '{name}': migration has no upload slot")))?;
        self.upload(&slot.upload_url, &slot.upload_params, &archive, package)?;

        if let Some(progress_url) = &migration.progress_url {
            let mut finished = false;
            for attempt in 1..=MIGRATION_POLLS {
                std::thread::sleep(MIGRATION_POLL_INTERVAL);
                let progress: Progress = match self.get(progress_url) {
                    Ok(progress) => progress,
                    Err(e) if e.is_transient() => continue,
                    Err(e) => return Err(e),
                };
                tracing::debug!(
                    "bank '{name}': migration {} ({}%, poll {attempt})",
                    progress.workflow_state,
                    progress.completion.unwrap_or(0.0)
                );
                match progress.workflow_state.as_str() {
                    "completed" => {
                        finished = true;
                        break;
                    }
                    "failed" => {
                        return Err(RemoteError::Job(format!(
                            "bank '{name}': import failed{}",
                            progress.message.map(|m| format!(": {m}")).unwrap_or_default()
                        )))
                    }
                    _ => {}
                }
            }
            if !finished {
                tracing::warn!("bank '{name}': migration still running; checking for the bank anyway");
            }
        }

        self.find_by_name(course, RemoteKind::QuestionBank, name)?
            .ok_or_else(|| RemoteError::Job(format!("bank '{name}' not found after import")))
    }

    fn create_rubric(&self, course: &str, payload: &Value) -> Result<RemoteId, RemoteError> {
        let created: RubricCreated = self.send("POST", &format!("courses/{course}/rubrics"), &rubric_body(course, payload))?;
        created
            .rubric
            .and_then(|r| r.id)
            .map(RemoteId::from)
            .ok_or_else(|| RemoteError::Transport("rubric: response without id".into()))
    }

    fn attach_rubric(
        &self,
        course: &str,
        rubric: &RemoteId,
        assignment: &RemoteId,
    ) -> Result<(), RemoteError> {
        let _: Value = self.send(
            "POST",
            &format!("courses/{course}/rubric_associations"),
            &json!({
                "rubric_association": {
                    "rubric_id": numeric(Some(&json!(rubric))),
                    "association_id": numeric(Some(&json!(assignment))),
                    "association_type": "Assignment",
                    "use_for_grading": true,
                    "purpose": "grading",
                }
            }),
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Canvas ids arrive as numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl From<RawId> for RemoteId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => RemoteId(n.to_string()),
            RawId::Text(s) => RemoteId(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Option<RawId>,
}

/// Union of the list shapes of pages, assignments, quizzes, files, banks
/// and rubrics.
#[derive(Debug, Deserialize)]
struct Listed {
    #[serde(default)]
    id: Option<RawId>,
    /// Page slug; pages are addressed by it.
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

impl Listed {
    fn remote_id(&self, kind: RemoteKind) -> Option<RemoteId> {
        match kind {
            RemoteKind::Page => self.url.clone().map(RemoteId),
            _ => self.id.clone().map(RemoteId::from),
        }
    }

    fn name(self, kind: RemoteKind) -> String {
        let name = match kind {
            RemoteKind::Assignment => self.name.or(self.title),
            RemoteKind::File => self.display_name.or(self.filename),
            _ => self.title.or(self.name),
        };
        name.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct OutcomeLink {
    outcome: OutcomeRecord,
}

#[derive(Debug, Deserialize)]
struct OutcomeRecord {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModuleRecord {
    id: RawId,
    name: String,
    #[serde(default)]
    position: u32,
    #[serde(default)]
    items: Option<Vec<ModuleItemRecord>>,
}

#[derive(Debug, Deserialize)]
struct ModuleItemRecord {
    id: RawId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content_id: Option<RawId>,
    #[serde(default)]
    page_url: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
    #[serde(default)]
    indent: u32,
}

impl ModuleItemRecord {
    fn into_remote(self) -> RemoteModuleItem {
        let kind = match self.kind.as_str() {
            "Page" => ModuleItemKind::Page,
            "Assignment" => ModuleItemKind::Assignment,
            "Quiz" => ModuleItemKind::Quiz,
            "File" => ModuleItemKind::File,
            "ExternalUrl" => ModuleItemKind::ExternalUrl,
            "SubHeader" => ModuleItemKind::SubHeader,
            other => ModuleItemKind::Other(other.to_string()),
        };
        let content_id = match kind {
            ModuleItemKind::Page => self.page_url.map(RemoteId),
            _ => self.content_id.map(RemoteId::from),
        };
        RemoteModuleItem {
            id: RemoteId::from(self.id),
            kind,
            title: self.title,
            content_id,
            external_url: self.external_url,
            indent: self.indent,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuizQuestion {
    #[serde(default)]
    quiz_group_id: Option<RawId>,
}

#[derive(Debug, Deserialize)]
struct UploadTicket {
    upload_url: String,
    #[serde(default)]
    upload_params: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Migration {
    #[serde(default)]
    progress_url: Option<String>,
    #[serde(default)]
    pre_attachment: Option<UploadTicket>,
}

#[derive(Debug, Deserialize)]
struct Progress {
    workflow_state: String,
    #[serde(default)]
    completion: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RubricCreated {
    #[serde(default)]
    rubric: Option<IdOnly>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, RemoteError> {
    response
        .into_json::<T>()
        .map_err(|e| RemoteError::Transport(format!("{url}: unreadable response: {e}")))
}

fn map_error(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let retry_after = response.header("Retry-After").map(str::to_string);
            let body = response.into_string().unwrap_or_default();
            status_error(url, status, retry_after.as_deref(), &body)
        }
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") || message.contains("timeout") {
                RemoteError::Timeout(format!("{url}: {message}"))
            } else {
                RemoteError::Transport(format!("{url}: {message}"))
            }
        }
    }
}

/// Map an HTTP error status onto the pipeline's error classes.
fn status_error(url: &str, status: u16, retry_after: Option<&str>, body: &str) -> RemoteError {
    let message: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        404 => RemoteError::NotFound(url.to_string()),
        429 => RemoteError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        },
        403 if body.to_ascii_lowercase().contains("rate limit") => RemoteError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        },
        500..=599 => RemoteError::Server { status, message },
        _ => RemoteError::Rejected { status, message },
    }
}

fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// The `rel="next"` target of a `Link` header.
fn next_link(header: Option<&str>) -> Option<String> {
    header?.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

/// Numeric ids go over the wire as numbers.
fn numeric(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => s.parse::<u64>().map(Value::from).unwrap_or_else(|_| json!(s)),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

fn module_item_body(item: &ModuleItemRequest) -> Value {
    let kind = match &item.kind {
        ModuleItemKind::Page => "Page",
        ModuleItemKind::Assignment => "Assignment",
        ModuleItemKind::Quiz => "Quiz",
        ModuleItemKind::File => "File",
        ModuleItemKind::ExternalUrl => "ExternalUrl",
        ModuleItemKind::SubHeader => "SubHeader",
        ModuleItemKind::Other(name) => name.as_str(),
    };
    let mut fields = Map::new();
    fields.insert("type".into(), json!(kind));
    fields.insert("title".into(), json!(item.title));
    fields.insert("position".into(), json!(item.position));
    fields.insert("indent".into(), json!(item.indent));
    match item.kind {
        ModuleItemKind::Page => {
            fields.insert("page_url".into(), json!(item.content_id));
        }
        ModuleItemKind::ExternalUrl => {
            fields.insert("external_url".into(), json!(item.external_url));
            fields.insert("new_tab".into(), json!(item.new_tab));
        }
        _ => {
            let id = item.content_id.as_ref().map(|id| json!(id));
            fields.insert("content_id".into(), numeric(id.as_ref()));
        }
    }
    json!({ "module_item": fields })
}

/// Canvas wants criteria and ratings as index-keyed objects.
fn indexed(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Object(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), indexed(v)))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), indexed(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn rubric_body(course: &str, payload: &Value) -> Value {
    json!({
        "rubric": {
            "title": payload.get("title").cloned().unwrap_or(Value::Null),
            "free_form_criterion_comments": payload
                .get("free_form_criterion_comments")
                .cloned()
                .unwrap_or(json!(false)),
            "criteria": indexed(payload.get("criteria").unwrap_or(&json!([]))),
        },
        "rubric_association": {
            "association_id": numeric(Some(&json!(course))),
            "association_type": "Course",
            "purpose": "bookmark",
        },
    })
}

fn multipart_body(
    boundary: &str,
    params: &BTreeMap<String, Value>,
    file_name: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    for (key, value) in params {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{key}\"\r\n\r\n{text}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            file_name.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
