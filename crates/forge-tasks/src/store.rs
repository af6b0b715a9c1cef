use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, TaskError};
use crate::markdown;
use crate::task::{CreateTask, Status, Task, TaskFilter, TaskPatch};

const TASKS_SUBDIR: &str = "forge/tasks";
const ARCHIVE_SUBDIR: &str = "forge/archive";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub prefix: Option<String>,
    pub project_name: Option<String>,
    pub force: bool,
}

/// Tasks that parsed, plus per-file errors for those that did not.
#[derive(Debug, Default)]
pub struct TaskListing {
    pub tasks: Vec<Task>,
    pub malformed: Vec<TaskError>,
}

/// File-backed task store rooted at a project directory. Every mutation is
/// one whole-file write under `forge/tasks/`; there is no in-process cache.
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_SUBDIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_SUBDIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.tasks_dir().join(CONFIG_FILE)
    }

    /// Creates the tasks directory and writes the config file. Never touches
    /// existing task files, so a forced re-init only rewrites config.
    pub fn init(&self, options: InitOptions) -> Result<StoreConfig> {
        let config_path = self.config_path();
        if config_path.exists() && !options.force {
            return Err(TaskError::AlreadyInitialized(config_path));
        }
        let prefix = options.prefix.unwrap_or_else(|| "TASK".to_string());
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(TaskError::InvalidValue(format!(
                "prefix must be uppercase alphabetic: {prefix}"
            )));
        }
        let config = StoreConfig {
            prefix,
            project_name: options.project_name,
            ..StoreConfig::default()
        };
        fs::create_dir_all(self.tasks_dir())?;
        config.save(&config_path)?;
        debug!(path = %config_path.display(), "initialized task store");
        Ok(config)
    }

    pub fn config(&self) -> Result<StoreConfig> {
        StoreConfig::load(&self.config_path())
    }

    pub fn create_task(&self, input: CreateTask) -> Result<Task> {
        let config = self.config()?;
        if input.title.trim().is_empty() {
            return Err(TaskError::InvalidValue("title must not be empty".into()));
        }
        let number = self.next_number(&config)?;
        let now = now_millis();
        let labels = if input.labels.is_empty() {
            config.default_labels.clone()
        } else {
            input.labels
        };
        let mut task = Task {
            id: config.format_id(number),
            title: input.title.trim().to_string(),
            status: Status::ToDo,
            priority: input.priority.or(config.default_priority),
            assignee: input.assignee,
            labels: dedupe(labels),
            dependencies: dedupe(
                input
                    .dependencies
                    .into_iter()
                    .map(|dep| canonicalize_dep(&config, &dep))
                    .collect(),
            ),
            due_date: input.due_date,
            created_at: now,
            updated_at: now,
            description: input.description,
            implementation_plan: None,
            implementation_notes: None,
            acceptance_criteria: Vec::new(),
            extra: Default::default(),
        };
        for text in input.acceptance_criteria {
            task.add_ac(text);
        }
        if task.dependencies.iter().any(|dep| dep == &task.id) {
            return Err(TaskError::CyclicDependency(task.id));
        }
        let path = self.tasks_dir().join(file_name(&task.id, &task.title));
        fs::write(&path, markdown::render_task(&task))?;
        debug!(id = %task.id, path = %path.display(), "created task");
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        let config = self.config()?;
        let (_, task) = self.find(&config, id)?;
        Ok(task)
    }

    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let config = self.config()?;
        let (path, mut task) = self.find(&config, id)?;

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(TaskError::InvalidValue("title must not be empty".into()));
            }
            task.title = title.trim().to_string();
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = Some(priority);
        }
        if let Some(assignee) = &patch.assignee {
            task.assignee = Some(assignee.clone());
        }
        if let Some(labels) = &patch.labels {
            task.labels = dedupe(labels.clone());
        }
        for label in &patch.add_labels {
            if !task.labels.contains(label) {
                task.labels.push(label.clone());
            }
        }
        task.labels.retain(|l| !patch.remove_labels.contains(l));
        if let Some(dependencies) = &patch.dependencies {
            task.dependencies = dedupe(
                dependencies
                    .iter()
                    .map(|dep| canonicalize_dep(&config, dep))
                    .collect(),
            );
        }
        for dep in &patch.add_dependencies {
            let dep = canonicalize_dep(&config, dep);
            if !task.dependencies.contains(&dep) {
                task.dependencies.push(dep);
            }
        }
        if let Some(due) = patch.due_date {
            task.due_date = Some(due);
        }
        if let Some(description) = &patch.description {
            task.description = Some(description.clone());
        }
        if let Some(plan) = &patch.implementation_plan {
            task.implementation_plan = Some(plan.clone());
        }
        if let Some(notes) = &patch.append_notes {
            task.implementation_notes = Some(match &task.implementation_notes {
                Some(existing) => format!("{existing}\n\n{notes}"),
                None => notes.clone(),
            });
        }

        if patch.touches_dependencies() {
            self.check_acyclic(&config, &task)?;
        }

        self.write_back(path, &mut task)
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        let config = self.config()?;
        let (path, task) = self.find(&config, id)?;
        fs::remove_file(&path)?;
        debug!(id = %task.id, "deleted task");
        Ok(())
    }

    /// Moves the task file under `forge/archive/`; archived tasks no longer
    /// exist as far as the store is concerned.
    pub fn archive_task(&self, id: &str) -> Result<PathBuf> {
        let config = self.config()?;
        let (path, task) = self.find(&config, id)?;
        fs::create_dir_all(self.archive_dir())?;
        let target = self.archive_dir().join(file_name(&task.id, &task.title));
        fs::rename(&path, &target)?;
        debug!(id = %task.id, target = %target.display(), "archived task");
        Ok(target)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskListing> {
        let config = self.config()?;
        let mut listing = self.scan(&config)?;
        let by_number: HashMap<u64, Status> = listing
            .tasks
            .iter()
            .filter_map(|t| config.parse_id(&t.id).map(|n| (n, t.status)))
            .collect();
        listing.tasks.retain(|task| {
            if let Some(status) = filter.status {
                if task.status != status {
                    return false;
                }
            }
            if let Some(priority) = filter.priority {
                if task.priority != Some(priority) {
                    return false;
                }
            }
            if let Some(assignee) = &filter.assignee {
                if task.assignee.as_deref() != Some(assignee.as_str()) {
                    return false;
                }
            }
            if let Some(label) = &filter.label {
                if !task.labels.contains(label) {
                    return false;
                }
            }
            if filter.ready {
                let blocked = task.dependencies.iter().any(|dep| {
                    config
                        .parse_id(dep)
                        .and_then(|n| by_number.get(&n))
                        .is_some_and(|status| status.blocks_dependents())
                });
                if blocked {
                    return false;
                }
            }
            true
        });
        Ok(listing)
    }

    /// Case-insensitive substring search over title, description, plan, and
    /// notes, with the same filters and ordering as `list_tasks`.
    pub fn search(&self, query: &str, filter: &TaskFilter) -> Result<TaskListing> {
        let needle = query.to_lowercase();
        let mut listing = self.list_tasks(filter)?;
        listing.tasks.retain(|task| {
            let mut haystacks = vec![task.title.as_str()];
            haystacks.extend(task.description.as_deref());
            haystacks.extend(task.implementation_plan.as_deref());
            haystacks.extend(task.implementation_notes.as_deref());
            haystacks
                .iter()
                .any(|h| h.to_lowercase().contains(&needle))
        });
        Ok(listing)
    }

    pub fn add_ac(&self, id: &str, text: &str) -> Result<Task> {
        let config = self.config()?;
        let (path, mut task) = self.find(&config, id)?;
        task.add_ac(text);
        self.write_back(path, &mut task)
    }

    pub fn remove_ac(&self, id: &str, index: usize) -> Result<Task> {
        let config = self.config()?;
        let (path, mut task) = self.find(&config, id)?;
        task.remove_ac(index)?;
        self.write_back(path, &mut task)
    }

    pub fn check_ac(&self, id: &str, index: usize) -> Result<Task> {
        self.set_ac(id, index, true)
    }

    pub fn uncheck_ac(&self, id: &str, index: usize) -> Result<Task> {
        self.set_ac(id, index, false)
    }

    fn set_ac(&self, id: &str, index: usize, checked: bool) -> Result<Task> {
        let config = self.config()?;
        let (path, mut task) = self.find(&config, id)?;
        task.set_ac_checked(index, checked)?;
        self.write_back(path, &mut task)
    }

    /// Parses every `.md` file in the tasks directory, ordered by numeric ID
    /// suffix. Files that fail to parse are reported, never dropped silently.
    fn scan(&self, config: &StoreConfig) -> Result<TaskListing> {
        let dir = self.tasks_dir();
        let mut listing = TaskListing::default();
        let mut seen = HashSet::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        entries.sort();
        for path in entries {
            match self.read_one(config, &path) {
                Ok(task) => {
                    let number = config.parse_id(&task.id);
                    if let Some(number) = number {
                        if !seen.insert(number) {
                            listing.malformed.push(TaskError::MalformedTask {
                                path,
                                reason: format!("duplicate task id {}", task.id),
                            });
                            continue;
                        }
                    }
                    listing.tasks.push(task);
                }
                Err(err) => listing.malformed.push(err),
            }
        }
        listing.tasks.sort_by_key(Task::number);
        Ok(listing)
    }

    fn read_one(&self, config: &StoreConfig, path: &Path) -> Result<Task> {
        let raw = fs::read_to_string(path)?;
        let task = markdown::parse_task(&raw).map_err(|reason| TaskError::MalformedTask {
            path: path.to_path_buf(),
            reason,
        })?;
        let from_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(id_segment)
            .and_then(|id| config.parse_id(id));
        if from_name != config.parse_id(&task.id) {
            return Err(TaskError::MalformedTask {
                path: path.to_path_buf(),
                reason: format!("frontmatter id {} does not match filename", task.id),
            });
        }
        Ok(task)
    }

    fn find(&self, config: &StoreConfig, id: &str) -> Result<(PathBuf, Task)> {
        let number = config
            .parse_id(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        for entry in fs::read_dir(self.tasks_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(id_segment)
                .and_then(|candidate| config.parse_id(candidate))
                == Some(number);
            if matches {
                let task = self.read_one(config, &path)?;
                return Ok((path, task));
            }
        }
        Err(TaskError::NotFound(config.format_id(number)))
    }

    /// Next ID is one past the highest numeric suffix ever used under this
    /// prefix; holes left by deletions are not reused below the maximum.
    fn next_number(&self, config: &StoreConfig) -> Result<u64> {
        let mut max = 0;
        for entry in fs::read_dir(self.tasks_dir())? {
            let path = entry?.path();
            let number = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(id_segment)
                .and_then(|candidate| config.parse_id(candidate));
            if let Some(number) = number {
                max = max.max(number);
            }
        }
        Ok(max + 1)
    }

    /// DFS over the dependency edges from `updated`; if the task can reach
    /// itself the new dependency list is rejected.
    fn check_acyclic(&self, config: &StoreConfig, updated: &Task) -> Result<()> {
        let listing = self.scan(config)?;
        let self_number = config
            .parse_id(&updated.id)
            .ok_or_else(|| TaskError::InvalidId(updated.id.clone()))?;
        let mut edges: HashMap<u64, Vec<u64>> = listing
            .tasks
            .iter()
            .filter_map(|task| {
                config.parse_id(&task.id).map(|n| {
                    let deps = task
                        .dependencies
                        .iter()
                        .filter_map(|dep| config.parse_id(dep))
                        .collect();
                    (n, deps)
                })
            })
            .collect();
        edges.insert(
            self_number,
            updated
                .dependencies
                .iter()
                .filter_map(|dep| config.parse_id(dep))
                .collect(),
        );

        let mut stack: Vec<u64> = edges.get(&self_number).cloned().unwrap_or_default();
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == self_number {
                return Err(TaskError::CyclicDependency(updated.id.clone()));
            }
            if visited.insert(current) {
                if let Some(next) = edges.get(&current) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        Ok(())
    }

    fn write_back(&self, old_path: PathBuf, task: &mut Task) -> Result<Task> {
        touch(task);
        let target = self.tasks_dir().join(file_name(&task.id, &task.title));
        fs::write(&target, markdown::render_task(task))?;
        if target != old_path {
            fs::remove_file(&old_path)?;
            debug!(id = %task.id, from = %old_path.display(), to = %target.display(), "renamed task file");
        }
        Ok(task.clone())
    }
}

/// Timestamps are persisted at millisecond precision; keep the in-memory
/// values identical to what a re-read would produce.
fn now_millis() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000_000))
}

/// `updated_at` must advance on every mutation, even when two mutations land
/// within the same millisecond.
fn touch(task: &mut Task) {
    let now = now_millis();
    task.updated_at = if now > task.updated_at {
        now
    } else {
        task.updated_at + Duration::milliseconds(1)
    };
}

/// The `{ID}` portion of a `{ID} - {title}` file stem.
fn id_segment(stem: &str) -> &str {
    stem.split(" - ").next().unwrap_or(stem).trim()
}

pub(crate) fn file_name(id: &str, title: &str) -> String {
    format!("{id} - {}.md", sanitize_title(title))
}

/// Filesystem-safe rendition of a title: reserved punctuation and control
/// bytes removed, whitespace collapsed, trimmed.
pub(crate) fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "untitled".to_string()
    } else {
        collapsed
    }
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

fn canonicalize_dep(config: &StoreConfig, dep: &str) -> String {
    config
        .parse_id(dep)
        .map(|n| config.format_id(n))
        .unwrap_or_else(|| dep.trim().to_string())
}
