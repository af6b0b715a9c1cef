use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use forge_tasks::{
    CreateTask, InitOptions, Priority, Status, Task, TaskFilter, TaskListing, TaskPatch, TaskStore,
};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "forge-tasks")]
#[command(about = "File-backed task store for Forkhestra agents")]
struct Cli {
    /// Project root containing the forge/ directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Emit key=value lines instead of human-readable output.
    #[arg(long, global = true, conflicts_with = "json")]
    plain: bool,

    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the tasks directory and config file.
    Init {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long = "name")]
        project_name: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Create a task.
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "due")]
        due_date: Option<String>,
        #[arg(long = "depends-on")]
        dependencies: Vec<String>,
        #[arg(long = "ac")]
        acceptance_criteria: Vec<String>,
    },
    /// List tasks, optionally filtered.
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show one task.
    View { id: String },
    /// Update fields on a task.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long = "label")]
        add_labels: Vec<String>,
        #[arg(long = "remove-label")]
        remove_labels: Vec<String>,
        #[arg(long = "depends-on")]
        add_dependencies: Vec<String>,
        #[arg(long = "due")]
        due_date: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        plan: Option<String>,
        /// Appended to the implementation notes section.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove a task file.
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Move a task file into forge/archive/.
    Archive { id: String },
    /// Substring search over titles and body sections.
    Search {
        query: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Acceptance-criteria operations.
    Ac {
        #[command(subcommand)]
        op: AcCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AcCommand {
    Add { id: String, text: String },
    Remove { id: String, index: usize },
    Check { id: String, index: usize },
    Uncheck { id: String, index: usize },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    label: Option<String>,
    /// Only tasks with no undelivered dependency.
    #[arg(long)]
    ready: bool,
}

impl FilterArgs {
    fn into_filter(self) -> anyhow::Result<TaskFilter> {
        Ok(TaskFilter {
            status: self.status.as_deref().map(Status::parse).transpose()?,
            priority: self.priority.as_deref().map(Priority::parse).transpose()?,
            assignee: self.assignee,
            label: self.label,
            ready: self.ready,
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum OutputMode {
    Human,
    Plain,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else if cli.plain {
        OutputMode::Plain
    } else {
        OutputMode::Human
    };
    let store = TaskStore::new(&cli.root);

    match cli.command {
        Command::Init {
            prefix,
            project_name,
            force,
        } => {
            let config = store.init(InitOptions {
                prefix,
                project_name,
                force,
            })?;
            match mode {
                OutputMode::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                _ => println!(
                    "initialized task store at {} (prefix {})",
                    store.tasks_dir().display(),
                    config.prefix
                ),
            }
        }
        Command::Create {
            title,
            description,
            priority,
            assignee,
            labels,
            due_date,
            dependencies,
            acceptance_criteria,
        } => {
            let task = store.create_task(CreateTask {
                title,
                description,
                priority: priority.as_deref().map(Priority::parse).transpose()?,
                assignee,
                labels,
                dependencies,
                due_date: due_date.as_deref().map(parse_due).transpose()?,
                acceptance_criteria,
            })?;
            print_task(&task, mode)?;
        }
        Command::List { filter } => {
            let listing = store.list_tasks(&filter.into_filter()?)?;
            print_listing(&listing, mode, None)?;
        }
        Command::View { id } => {
            let task = store.get_task(&id)?;
            print_task(&task, mode)?;
        }
        Command::Edit {
            id,
            title,
            status,
            priority,
            assignee,
            add_labels,
            remove_labels,
            add_dependencies,
            due_date,
            description,
            plan,
            notes,
        } => {
            let patch = TaskPatch {
                title,
                status: status.as_deref().map(Status::parse).transpose()?,
                priority: priority.as_deref().map(Priority::parse).transpose()?,
                assignee,
                labels: None,
                add_labels,
                remove_labels,
                dependencies: None,
                add_dependencies,
                due_date: due_date.as_deref().map(parse_due).transpose()?,
                description,
                implementation_plan: plan,
                append_notes: notes,
            };
            if patch.is_empty() {
                bail!("no field updates given");
            }
            let task = store.update_task(&id, patch)?;
            print_task(&task, mode)?;
        }
        Command::Delete { id, force } => {
            if !force {
                bail!("refusing to delete {id} without --force");
            }
            store.delete_task(&id)?;
            if mode == OutputMode::Human {
                println!("deleted {id}");
            }
        }
        Command::Archive { id } => {
            let target = store.archive_task(&id)?;
            if mode == OutputMode::Human {
                println!("archived to {}", target.display());
            }
        }
        Command::Search {
            query,
            filter,
            limit,
        } => {
            let mut listing = store.search(&query, &filter.into_filter()?)?;
            if let Some(limit) = limit {
                listing.tasks.truncate(limit);
            }
            print_listing(&listing, mode, Some(query.as_str()))?;
        }
        Command::Ac { op } => {
            let task = match op {
                AcCommand::Add { id, text } => store.add_ac(&id, &text)?,
                AcCommand::Remove { id, index } => store.remove_ac(&id, index)?,
                AcCommand::Check { id, index } => store.check_ac(&id, index)?,
                AcCommand::Uncheck { id, index } => store.uncheck_ac(&id, index)?,
            };
            print_task(&task, mode)?;
        }
    }
    Ok(())
}

fn parse_due(raw: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&chrono::Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid due date: {raw}"))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("invalid due date")?
        .and_utc())
}

fn print_listing(listing: &TaskListing, mode: OutputMode, query: Option<&str>) -> anyhow::Result<()> {
    for malformed in &listing.malformed {
        warn!("{malformed}");
    }
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&listing.tasks)?),
        OutputMode::Plain => {
            for task in &listing.tasks {
                print_plain(task);
                println!();
            }
        }
        OutputMode::Human => {
            if listing.tasks.is_empty() {
                match query {
                    Some(query) => println!("no tasks matching '{query}'"),
                    None => println!("no tasks"),
                }
                return Ok(());
            }
            let width = listing
                .tasks
                .iter()
                .map(|t| t.id.len())
                .max()
                .unwrap_or(0);
            for task in &listing.tasks {
                let checked = task
                    .acceptance_criteria
                    .iter()
                    .filter(|c| c.checked)
                    .count();
                let progress = if task.acceptance_criteria.is_empty() {
                    String::new()
                } else {
                    format!(" [{checked}/{}]", task.acceptance_criteria.len())
                };
                println!(
                    "{:width$}  {:11}  {:6}  {}{progress}",
                    task.id,
                    task.status.as_str(),
                    task.priority.map(Priority::as_str).unwrap_or("-"),
                    task.title,
                );
            }
        }
    }
    Ok(())
}

fn print_task(task: &Task, mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(task)?),
        OutputMode::Plain => print_plain(task),
        OutputMode::Human => {
            println!("{}  {}", task.id, task.title);
            println!("status: {}", task.status.as_str());
            if let Some(priority) = task.priority {
                println!("priority: {}", priority.as_str());
            }
            if let Some(assignee) = &task.assignee {
                println!("assignee: {assignee}");
            }
            if !task.labels.is_empty() {
                println!("labels: {}", task.labels.join(", "));
            }
            if !task.dependencies.is_empty() {
                println!("dependencies: {}", task.dependencies.join(", "));
            }
            if let Some(due) = task.due_date {
                println!("due: {}", due.format("%Y-%m-%d"));
            }
            if let Some(description) = &task.description {
                println!("\nDescription:\n{description}");
            }
            if let Some(plan) = &task.implementation_plan {
                println!("\nImplementation Plan:\n{plan}");
            }
            if !task.acceptance_criteria.is_empty() {
                println!("\nAcceptance Criteria:");
                for criterion in &task.acceptance_criteria {
                    let mark = if criterion.checked { 'x' } else { ' ' };
                    println!("  [{mark}] #{} {}", criterion.index, criterion.text);
                }
            }
            if let Some(notes) = &task.implementation_notes {
                println!("\nImplementation Notes:\n{notes}");
            }
        }
    }
    Ok(())
}

fn print_plain(task: &Task) {
    println!("id={}", task.id);
    println!("title={}", task.title);
    println!("status={}", task.status.as_str());
    if let Some(priority) = task.priority {
        println!("priority={}", priority.as_str());
    }
    if let Some(assignee) = &task.assignee {
        println!("assignee={assignee}");
    }
    println!("labels={}", task.labels.join(","));
    println!("dependencies={}", task.dependencies.join(","));
    if let Some(due) = task.due_date {
        println!("due_date={}", due.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
    }
    println!(
        "created_at={}",
        task.created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    );
    println!(
        "updated_at={}",
        task.updated_at
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    );
    for criterion in &task.acceptance_criteria {
        let mark = if criterion.checked { "[x]" } else { "[ ]" };
        println!("ac.{}={mark} {}", criterion.index, criterion.text);
    }
}
