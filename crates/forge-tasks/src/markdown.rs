//! Textual codec for task files: YAML frontmatter plus the markdown body
//! with its acceptance-criteria fence.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::task::{AcceptanceCriterion, Priority, Status, Task};

pub const AC_BEGIN: &str = "<!-- AC:BEGIN -->";
pub const AC_END: &str = "<!-- AC:END -->";

const DESCRIPTION_HEADING: &str = "## Description";
const PLAN_HEADING: &str = "## Implementation Plan";
const NOTES_HEADING: &str = "## Implementation Notes";

const KNOWN_FIELDS: [&str; 10] = [
    "id",
    "title",
    "status",
    "priority",
    "assignee",
    "labels",
    "dependencies",
    "due_date",
    "created_at",
    "updated_at",
];

fn ac_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^- \[([ x])\] #(\d+)(?: (.*))?$").expect("ac regex"))
}

pub fn parse_task(content: &str) -> Result<Task, String> {
    let (mut frontmatter, body) = split_frontmatter(content)?;

    let id = take_string(&mut frontmatter, "id")?.ok_or("missing frontmatter field: id")?;
    let title =
        take_string(&mut frontmatter, "title")?.ok_or("missing frontmatter field: title")?;
    if title.trim().is_empty() {
        return Err("title must not be empty".to_string());
    }
    let status = take_string(&mut frontmatter, "status")?
        .ok_or_else(|| "missing frontmatter field: status".to_string())
        .and_then(|s| Status::parse(&s).map_err(|e| e.to_string()))?;
    let priority = take_string(&mut frontmatter, "priority")?
        .map(|p| Priority::parse(&p).map_err(|e| e.to_string()))
        .transpose()?;
    let assignee = take_string(&mut frontmatter, "assignee")?;
    let labels = take_string_list(&mut frontmatter, "labels")?;
    let dependencies = take_string_list(&mut frontmatter, "dependencies")?;
    let due_date = take_string(&mut frontmatter, "due_date")?
        .map(|raw| parse_timestamp(&raw).map_err(|e| format!("due_date: {e}")))
        .transpose()?;
    let created_at = take_string(&mut frontmatter, "created_at")?
        .ok_or_else(|| "missing frontmatter field: created_at".to_string())
        .and_then(|raw| parse_timestamp(&raw).map_err(|e| format!("created_at: {e}")))?;
    let updated_at = take_string(&mut frontmatter, "updated_at")?
        .ok_or_else(|| "missing frontmatter field: updated_at".to_string())
        .and_then(|raw| parse_timestamp(&raw).map_err(|e| format!("updated_at: {e}")))?;

    let parsed_body = parse_body(&body)?;

    Ok(Task {
        id,
        title,
        status,
        priority,
        assignee,
        labels,
        dependencies,
        due_date,
        created_at,
        updated_at,
        description: parsed_body.description,
        implementation_plan: parsed_body.plan,
        implementation_notes: parsed_body.notes,
        acceptance_criteria: parsed_body.acceptance,
        extra: frontmatter,
    })
}

pub fn render_task(task: &Task) -> String {
    let mut mapping = Mapping::new();
    mapping.insert(yaml_str("id"), yaml_str(&task.id));
    mapping.insert(yaml_str("title"), yaml_str(&task.title));
    mapping.insert(yaml_str("status"), yaml_str(task.status.as_str()));
    if let Some(priority) = task.priority {
        mapping.insert(yaml_str("priority"), yaml_str(priority.as_str()));
    }
    if let Some(assignee) = &task.assignee {
        mapping.insert(yaml_str("assignee"), yaml_str(assignee));
    }
    mapping.insert(yaml_str("labels"), yaml_string_list(&task.labels));
    mapping.insert(
        yaml_str("dependencies"),
        yaml_string_list(&task.dependencies),
    );
    if let Some(due) = task.due_date {
        mapping.insert(yaml_str("due_date"), yaml_str(&format_timestamp(due)));
    }
    mapping.insert(
        yaml_str("created_at"),
        yaml_str(&format_timestamp(task.created_at)),
    );
    mapping.insert(
        yaml_str("updated_at"),
        yaml_str(&format_timestamp(task.updated_at)),
    );
    for (key, value) in &task.extra {
        if !mapping.contains_key(key) {
            mapping.insert(key.clone(), value.clone());
        }
    }

    let yaml = serde_yaml::to_string(&Value::Mapping(mapping)).unwrap_or_default();
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n");

    if let Some(description) = &task.description {
        push_section(&mut out, DESCRIPTION_HEADING, description);
    }
    if let Some(plan) = &task.implementation_plan {
        push_section(&mut out, PLAN_HEADING, plan);
    }
    out.push('\n');
    out.push_str(AC_BEGIN);
    out.push('\n');
    for criterion in &task.acceptance_criteria {
        let mark = if criterion.checked { 'x' } else { ' ' };
        out.push_str(&format!(
            "- [{mark}] #{} {}\n",
            criterion.index, criterion.text
        ));
    }
    out.push_str(AC_END);
    out.push('\n');
    if let Some(notes) = &task.implementation_notes {
        push_section(&mut out, NOTES_HEADING, notes);
    }
    out
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(format!("not an ISO-8601 timestamp: {raw}"))
}

fn push_section(out: &mut String, heading: &str, text: &str) {
    out.push('\n');
    out.push_str(heading);
    out.push_str("\n\n");
    out.push_str(text.trim_end());
    out.push('\n');
}

fn yaml_str(value: &str) -> Value {
    Value::String(value.to_string())
}

fn yaml_string_list(values: &[String]) -> Value {
    Value::Sequence(values.iter().map(|v| yaml_str(v)).collect())
}

fn split_frontmatter(content: &str) -> Result<(Mapping, String), String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut start = None;
    let mut end = None;
    for (i, line) in lines.iter().enumerate() {
        if line.trim() == "---" {
            if start.is_none() {
                start = Some(i);
            } else {
                end = Some(i);
                break;
            }
        }
    }
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err("missing frontmatter".to_string()),
    };
    let yaml = lines[start + 1..end].join("\n");
    let value: Value =
        serde_yaml::from_str(&yaml).map_err(|e| format!("invalid frontmatter: {e}"))?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        _ => return Err("frontmatter must be a mapping".to_string()),
    };
    let body = if end + 1 < lines.len() {
        lines[end + 1..].join("\n")
    } else {
        String::new()
    };
    Ok((mapping, body))
}

fn take_string(mapping: &mut Mapping, key: &str) -> Result<Option<String>, String> {
    debug_assert!(KNOWN_FIELDS.contains(&key));
    match mapping.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(format!("field {key} has unexpected type: {other:?}")),
    }
}

fn take_string_list(mapping: &mut Mapping, key: &str) -> Result<Vec<String>, String> {
    match mapping.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(format!("field {key} contains a non-string entry: {other:?}")),
            })
            .collect(),
        Some(Value::String(single)) => Ok(vec![single]),
        Some(other) => Err(format!("field {key} has unexpected type: {other:?}")),
    }
}

struct ParsedBody {
    description: Option<String>,
    plan: Option<String>,
    notes: Option<String>,
    acceptance: Vec<AcceptanceCriterion>,
}

fn parse_body(body: &str) -> Result<ParsedBody, String> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Description,
        Plan,
        Notes,
        Fence,
    }

    let mut section = Section::None;
    let mut description = Vec::new();
    let mut plan = Vec::new();
    let mut notes = Vec::new();
    let mut acceptance = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim_end();
        match trimmed {
            DESCRIPTION_HEADING => section = Section::Description,
            PLAN_HEADING => section = Section::Plan,
            NOTES_HEADING => section = Section::Notes,
            AC_BEGIN => section = Section::Fence,
            AC_END if section == Section::Fence => section = Section::None,
            _ => match section {
                Section::Description => description.push(trimmed),
                Section::Plan => plan.push(trimmed),
                Section::Notes => notes.push(trimmed),
                Section::Fence => {
                    if trimmed.is_empty() {
                        continue;
                    }
                    let captures = ac_line_regex()
                        .captures(trimmed)
                        .ok_or_else(|| format!("invalid acceptance criterion line: {trimmed}"))?;
                    let index: usize = captures[2]
                        .parse()
                        .map_err(|_| format!("invalid acceptance criterion index: {trimmed}"))?;
                    if index != acceptance.len() + 1 {
                        return Err(format!(
                            "acceptance criterion #{index} out of sequence (expected #{})",
                            acceptance.len() + 1
                        ));
                    }
                    acceptance.push(AcceptanceCriterion {
                        index,
                        checked: &captures[1] == "x",
                        text: captures
                            .get(3)
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default(),
                    });
                }
                Section::None => {}
            },
        }
    }

    Ok(ParsedBody {
        description: collect_section(description),
        plan: collect_section(plan),
        notes: collect_section(notes),
        acceptance,
    })
}

fn collect_section(lines: Vec<&str>) -> Option<String> {
    let text = lines.join("\n");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task() -> Task {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        Task {
            id: "TASK-3".to_string(),
            title: "Implement caching layer".to_string(),
            status: Status::InProgress,
            priority: Some(Priority::High),
            assignee: Some("mira".to_string()),
            labels: vec!["performance".to_string(), "backend".to_string()],
            dependencies: vec!["TASK-1".to_string()],
            due_date: None,
            created_at: created,
            updated_at: created,
            description: Some("Cache hot reads.".to_string()),
            implementation_plan: Some("Wrap the repository.".to_string()),
            implementation_notes: None,
            acceptance_criteria: vec![
                AcceptanceCriterion {
                    index: 1,
                    checked: false,
                    text: "Cache GET requests for 5 minutes".to_string(),
                },
                AcceptanceCriterion {
                    index: 2,
                    checked: true,
                    text: "Invalidate on write".to_string(),
                },
            ],
            extra: Mapping::new(),
        }
    }

    #[test]
    fn render_parse_round_trip() {
        let task = sample_task();
        let text = render_task(&task);
        let parsed = parse_task(&text).expect("parse");
        assert_eq!(parsed, task);
    }

    #[test]
    fn unknown_frontmatter_fields_survive() {
        let task = sample_task();
        let mut text = render_task(&task);
        text = text.replace(
            "updated_at:",
            "sprint: q2-refresh\nupdated_at:",
        );
        let parsed = parse_task(&text).expect("parse");
        assert_eq!(
            parsed.extra.get(Value::String("sprint".into())),
            Some(&Value::String("q2-refresh".into()))
        );
        let rewritten = render_task(&parsed);
        assert!(rewritten.contains("sprint: q2-refresh"));
    }

    #[test]
    fn missing_fence_means_no_criteria() {
        let text = "---\nid: TASK-1\ntitle: No fence\nstatus: To Do\nlabels: []\ndependencies: []\ncreated_at: 2026-03-01T09:30:00.000Z\nupdated_at: 2026-03-01T09:30:00.000Z\n---\n\n## Description\n\nBody only.\n";
        let parsed = parse_task(text).expect("parse");
        assert!(parsed.acceptance_criteria.is_empty());
        assert_eq!(parsed.description.as_deref(), Some("Body only."));
    }

    #[test]
    fn gapped_ac_indices_are_rejected() {
        let text = "---\nid: TASK-1\ntitle: Gap\nstatus: To Do\ncreated_at: 2026-03-01T09:30:00.000Z\nupdated_at: 2026-03-01T09:30:00.000Z\n---\n\n<!-- AC:BEGIN -->\n- [ ] #1 first\n- [ ] #3 third\n<!-- AC:END -->\n";
        let err = parse_task(text).expect_err("gap must fail");
        assert!(err.contains("#3"));
    }

    #[test]
    fn timestamps_keep_millisecond_precision() {
        let instant = Utc.timestamp_millis_opt(1_772_534_400_123).unwrap();
        let rendered = format_timestamp(instant);
        assert!(rendered.ends_with("Z"));
        assert_eq!(parse_timestamp(&rendered).expect("parse"), instant);
    }

    #[test]
    fn date_only_due_dates_are_accepted() {
        let parsed = parse_timestamp("2026-04-01").expect("parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
    }
}
