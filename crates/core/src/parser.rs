use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Duration, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use ulid::Ulid;

use crate::capture::{CaptureError, CaptureInput};
use crate::model::{NewTask, Priority, References, Tag, TaskStatus, WhenType};
use crate::recurrence::{parse_weekday, RecurrenceRule};

/// Capture text split into a title and the values its tokens carried.
/// Names are not resolved against stored references yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCapture {
    pub title: String,
    pub notes: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub when: Option<(WhenType, Option<NaiveDate>)>,
    pub due_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub recurrence: Option<RecurrenceRule>,
}

/// A task ready to insert plus the tags that have to be created first.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub task: NewTask,
    pub new_tags: Vec<Tag>,
}

#[derive(Debug, Default)]
struct InlineTokens {
    title_words: Vec<String>,
    project: Option<String>,
    assignee: Option<String>,
    tags: Vec<String>,
    when: Option<(WhenType, Option<NaiveDate>)>,
    due_date: Option<NaiveDate>,
    deadline: Option<NaiveDate>,
    priority: Option<Priority>,
    recurrence: Option<RecurrenceRule>,
}

pub fn parse_capture(input: &CaptureInput, today: NaiveDate) -> Result<ParsedCapture> {
    input.require_text()?;
    let raw_text = input.text.join(" ");
    let inline = parse_inline_tokens(&raw_text, today)?;

    let mut tags = merge_lists(inline.tags, normalize_labels(&input.tags));
    tags.sort();
    tags.dedup();

    let when = match &input.when {
        Some(spec) => Some(parse_when(spec, today)?),
        None => inline.when,
    };
    let due_date = match &input.due {
        Some(spec) => Some(parse_date_spec(spec, today)?),
        None => inline.due_date,
    };
    let deadline = match &input.deadline {
        Some(spec) => Some(parse_date_spec(spec, today)?),
        None => inline.deadline,
    };
    let recurrence = match &input.every {
        Some(spec) => Some(spec.parse::<RecurrenceRule>()?),
        None => inline.recurrence,
    };

    let title = inline.title_words.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(anyhow!("Task title cannot be empty after parsing tokens"));
    }

    Ok(ParsedCapture {
        title,
        notes: input.notes.clone(),
        status: input.status,
        priority: input.priority.or(inline.priority),
        when,
        due_date,
        deadline,
        project: input
            .project
            .as_ref()
            .map(|s| clean_title(s.trim_start_matches('+')))
            .or(inline.project),
        area: input.area.as_ref().map(|s| clean_title(s)),
        assignee: input
            .assignee
            .as_ref()
            .map(|s| clean_title(s.trim_start_matches('@')))
            .or(inline.assignee),
        tags,
        recurrence,
    })
}

/// Resolve names against stored references. Unknown tags are created,
/// unknown projects, areas and users are errors.
pub fn prepare_new_task(
    parsed: ParsedCapture,
    references: &References,
    default_when: WhenType,
) -> Result<PreparedTask> {
    let project = match &parsed.project {
        Some(name) => Some(
            references
                .project_by_name(name)
                .or_else(|| references.project(name))
                .ok_or_else(|| CaptureError::UnknownProject(name.clone()))?,
        ),
        None => None,
    };

    let area_id = match &parsed.area {
        Some(name) => Some(
            references
                .area_by_name(name)
                .or_else(|| references.area(name))
                .ok_or_else(|| CaptureError::UnknownArea(name.clone()))?
                .id
                .clone(),
        ),
        None => project.and_then(|project| project.area_id.clone()),
    };

    let assignee_id = match &parsed.assignee {
        Some(handle) => Some(
            references
                .user_by_handle(handle)
                .ok_or_else(|| CaptureError::UnknownUser(handle.clone()))?
                .id
                .clone(),
        ),
        None => None,
    };

    let mut new_tags = Vec::new();
    let mut tag_ids = Vec::with_capacity(parsed.tags.len());
    for name in &parsed.tags {
        let id = match references.tag_by_name(name) {
            Some(tag) => tag.id.clone(),
            None => {
                let tag = Tag {
                    id: Ulid::new().to_string(),
                    name: name.clone(),
                };
                let id = tag.id.clone();
                new_tags.push(tag);
                id
            }
        };
        tag_ids.push(id);
    }

    let (when_type, when_date) = match parsed.when {
        Some(when) => when,
        None => match default_when {
            // Scheduling needs a date; borrow one from the due date or deadline.
            WhenType::Scheduled => match parsed.due_date.or(parsed.deadline) {
                Some(date) => (WhenType::Scheduled, Some(date)),
                None => (WhenType::Inbox, None),
            },
            other => (other, None),
        },
    };

    let mut task = NewTask::titled(parsed.title, when_type);
    task.notes = parsed.notes;
    task.status = parsed.status.unwrap_or(TaskStatus::Todo);
    task.priority = parsed.priority.unwrap_or_default();
    task.when_date = when_date;
    task.due_date = parsed.due_date;
    task.deadline = parsed.deadline;
    task.assignee_id = assignee_id;
    task.project_id = project.map(|project| project.id.clone());
    task.area_id = area_id;
    task.tag_ids = tag_ids;
    task.recurrence = parsed.recurrence;

    Ok(PreparedTask { task, new_tags })
}

fn parse_inline_tokens(text: &str, today: NaiveDate) -> Result<InlineTokens> {
    let mut result = InlineTokens::default();

    for raw_piece in text.split_whitespace() {
        let (piece, trailing) = strip_trailing_punctuation(raw_piece);
        let lower = piece.to_ascii_lowercase();

        let consumed = if piece.starts_with('@') && piece.len() > 1 {
            result.assignee = Some(clean_title(piece.trim_start_matches('@')));
            true
        } else if piece.starts_with('+') && piece.len() > 1 && !is_relative_date(&piece) {
            result.project = Some(clean_title(piece.trim_start_matches('+')));
            true
        } else if piece.starts_with('#') && piece.len() > 1 {
            result.tags.push(normalize_label(piece.trim_start_matches('#')));
            true
        } else if let Some(spec) = lower.strip_prefix("due:") {
            result.due_date = Some(parse_date_spec(spec, today)?);
            true
        } else if let Some(spec) = lower.strip_prefix("deadline:") {
            result.deadline = Some(parse_date_spec(spec, today)?);
            true
        } else if let Some(spec) = lower.strip_prefix("when:") {
            result.when = Some(parse_when(spec, today)?);
            true
        } else if let Some(spec) = lower.strip_prefix("p:") {
            result.priority = Some(spec.parse::<Priority>()?);
            true
        } else if let Some(spec) = lower.strip_prefix("every:") {
            result.recurrence = Some(spec.parse::<RecurrenceRule>()?);
            true
        } else {
            false
        };

        if consumed {
            if let Some(rest) = trailing {
                push_trailing(&mut result.title_words, rest);
            }
        } else {
            result.title_words.push(raw_piece.to_string());
        }
    }

    Ok(result)
}

/// `inbox`, `today`, `anytime`, `someday`, or a date, which schedules the task.
pub fn parse_when(spec: &str, today: NaiveDate) -> Result<(WhenType, Option<NaiveDate>)> {
    match spec.trim().to_ascii_lowercase().as_str() {
        "inbox" => Ok((WhenType::Inbox, None)),
        "today" => Ok((WhenType::Today, None)),
        "anytime" => Ok((WhenType::Anytime, None)),
        "someday" => Ok((WhenType::Someday, None)),
        other => {
            let date = parse_date_spec(other, today)
                .with_context(|| format!("Invalid when '{spec}'"))?;
            if date == today {
                Ok((WhenType::Today, None))
            } else {
                Ok((WhenType::Scheduled, Some(date)))
            }
        }
    }
}

pub fn normalize_labels(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| normalize_label(v))
        .filter(|v| !v.is_empty())
        .collect()
}

fn normalize_label(value: &str) -> String {
    value.trim().trim_start_matches('#').to_lowercase()
}

fn merge_lists(mut primary: Vec<String>, secondary: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = primary.iter().cloned().collect();
    for value in secondary {
        if seen.insert(value.clone()) {
            primary.push(value);
        }
    }
    primary
}

fn strip_trailing_punctuation(input: &str) -> (String, Option<String>) {
    static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:punct:]]+$").expect("valid regex"));
    if let Some(mat) = PUNCT_RE.find(input) {
        let token = input[..mat.start()].to_string();
        let trailing = input[mat.start()..].to_string();
        (token, Some(trailing))
    } else {
        (input.to_string(), None)
    }
}

fn clean_title(value: &str) -> String {
    value
        .trim_matches(|c: char| c == ',' || c == ';' || c == '.')
        .trim()
        .to_string()
}

fn push_trailing(words: &mut Vec<String>, trailing: String) {
    if let Some(last) = words.last_mut() {
        last.push_str(&trailing);
    } else {
        words.push(trailing);
    }
}

static RELATIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+(\d+)([dwm])$").expect("valid regex"));

fn is_relative_date(piece: &str) -> bool {
    RELATIVE_RE.is_match(&piece.to_ascii_lowercase())
}

/// Resolve a date relative to `today`.
pub fn parse_date_spec(spec: &str, today: NaiveDate) -> Result<NaiveDate> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Date specification cannot be empty"));
    }

    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(today + Duration::days(1)),
        "yesterday" => return Ok(today - Duration::days(1)),
        _ => {}
    }

    if let Some(caps) = RELATIVE_RE.captures(&lower) {
        let value: u32 = caps[1].parse().context("Invalid relative offset")?;
        let date = match &caps[2] {
            "d" => today.checked_add_signed(Duration::days(value.into())),
            "w" => today.checked_add_signed(Duration::weeks(value.into())),
            _ => today.checked_add_months(Months::new(value)),
        };
        return date.ok_or_else(|| anyhow!("Relative date '{}' is out of range", spec));
    }

    if let Some(weekday) = parse_weekday(&lower) {
        let mut days_ahead = (weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        if days_ahead == 0 {
            days_ahead = 7;
        }
        return Ok(today + Duration::days(days_ahead));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }

    Err(anyhow!(
        "Unrecognized date specification '{}'. Try YYYY-MM-DD, today, tomorrow, +3d, mon",
        spec
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::date;
    use crate::model::{Area, Project, User};
    use crate::permissions::Role;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn input(text: &str) -> CaptureInput {
        CaptureInput::from_text(text)
    }

    fn references() -> References {
        References {
            users: vec![User {
                id: "u1".into(),
                name: "alice".into(),
                role: Role::Member,
            }],
            areas: vec![Area {
                id: "a-work".into(),
                name: "Work".into(),
            }],
            projects: vec![Project {
                id: "p-site".into(),
                name: "Website".into(),
                area_id: Some("a-work".into()),
            }],
            tags: vec![Tag {
                id: "t-q4".into(),
                name: "q4".into(),
            }],
        }
    }

    // 2024-01-10 is a Wednesday.
    #[rstest]
    #[case("today", "2024-01-10")]
    #[case("tomorrow", "2024-01-11")]
    #[case("+3d", "2024-01-13")]
    #[case("+2w", "2024-01-24")]
    #[case("+1m", "2024-02-10")]
    #[case("fri", "2024-01-12")]
    #[case("wednesday", "2024-01-17")]
    #[case("2025-12-24", "2025-12-24")]
    fn resolves_date_specs(#[case] spec: &str, #[case] expected: &str) {
        assert_eq!(parse_date_spec(spec, date("2024-01-10")).unwrap(), date(expected));
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_date_spec("soonish", date("2024-01-10")).is_err());
        assert!(parse_date_spec("", date("2024-01-10")).is_err());
    }

    #[test]
    fn parses_inline_tokens() {
        let parsed = parse_capture(
            &input("Email Alice, #Q4 +Website @alice due:tomorrow p:high every:2w"),
            date("2024-01-10"),
        )
        .unwrap();

        assert_eq!(parsed.title, "Email Alice,");
        assert_eq!(parsed.tags, vec!["q4"]);
        assert_eq!(parsed.project.as_deref(), Some("Website"));
        assert_eq!(parsed.assignee.as_deref(), Some("alice"));
        assert_eq!(parsed.due_date, Some(date("2024-01-11")));
        assert_eq!(parsed.priority, Some(Priority::High));
        assert_eq!(parsed.recurrence.map(|r| r.to_string()), Some("2w".into()));
    }

    #[test]
    fn when_token_with_date_schedules() {
        let parsed = parse_capture(&input("Dentist when:fri"), date("2024-01-10")).unwrap();
        assert_eq!(
            parsed.when,
            Some((WhenType::Scheduled, Some(date("2024-01-12"))))
        );
        let parsed = parse_capture(&input("Dentist when:someday"), date("2024-01-10")).unwrap();
        assert_eq!(parsed.when, Some((WhenType::Someday, None)));
    }

    #[test]
    fn explicit_fields_override_tokens() {
        let mut add = input("Plan offsite due:tomorrow");
        add.due = Some("2024-02-01".into());
        add.tags = vec!["#Team".into()];
        let parsed = parse_capture(&add, date("2024-01-10")).unwrap();
        assert_eq!(parsed.due_date, Some(date("2024-02-01")));
        assert_eq!(parsed.tags, vec!["team"]);
    }

    #[test]
    fn title_of_only_tokens_is_rejected() {
        assert!(parse_capture(&input("#a +b"), date("2024-01-10")).is_err());
        assert!(parse_capture(&CaptureInput::default(), date("2024-01-10")).is_err());
    }

    #[test]
    fn prepare_resolves_references_and_creates_tags() {
        let parsed = parse_capture(
            &input("Ship release #q4 #launch +website @Alice"),
            date("2024-01-10"),
        )
        .unwrap();
        let prepared = prepare_new_task(parsed, &references(), WhenType::Today).unwrap();

        assert_eq!(prepared.task.project_id.as_deref(), Some("p-site"));
        assert_eq!(prepared.task.area_id.as_deref(), Some("a-work"));
        assert_eq!(prepared.task.assignee_id.as_deref(), Some("u1"));
        assert_eq!(prepared.task.when_type, WhenType::Today);
        assert_eq!(prepared.new_tags.len(), 1);
        assert_eq!(prepared.new_tags[0].name, "launch");
        assert!(prepared.task.tag_ids.contains(&"t-q4".to_string()));
        assert!(prepared.task.tag_ids.contains(&prepared.new_tags[0].id));
    }

    #[test]
    fn unknown_project_is_an_error() {
        let parsed = parse_capture(&input("Task +nowhere"), date("2024-01-10")).unwrap();
        let err = prepare_new_task(parsed, &references(), WhenType::Inbox).unwrap_err();
        assert_eq!(err.to_string(), "Unknown project 'nowhere'");
    }

    #[test]
    fn upcoming_without_date_falls_back_to_inbox() {
        let parsed = parse_capture(&input("Someday maybe"), date("2024-01-10")).unwrap();
        let prepared = prepare_new_task(parsed, &references(), WhenType::Scheduled).unwrap();
        assert_eq!(prepared.task.when_type, WhenType::Inbox);

        let parsed = parse_capture(&input("Pay rent due:+3d"), date("2024-01-10")).unwrap();
        let prepared = prepare_new_task(parsed, &references(), WhenType::Scheduled).unwrap();
        assert_eq!(prepared.task.when_type, WhenType::Scheduled);
        assert_eq!(prepared.task.when_date, Some(date("2024-01-13")));
    }
}
