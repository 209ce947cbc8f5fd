//! Best-effort recovery of `[{"task": .., "estimatedTime": ..}]` arrays from
//! model output. Nothing here fails: unusable output means no tasks.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde_json::{Map, Value};

use crate::duration::{parse_estimate, DEFAULT_ESTIMATE_MINUTES};

const TITLE_KEYS: [&str; 3] = ["task", "title", "name"];
const TIME_KEYS: [&str; 5] = [
    "estimatedTime",
    "estimated_time",
    "estimatedMinutes",
    "time",
    "duration",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTask {
    pub title: String,
    /// The estimate as the model wrote it.
    pub estimated_time: String,
    pub estimated_minutes: u32,
}

fn fenced_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").expect("valid pattern"))
}

fn fenced_any_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*[ \t]*\r?\n?(.*?)```").expect("valid pattern"))
}

/// Top-level `[...]` spans in order of appearance, skipping brackets that
/// sit inside JSON string literals.
fn bracketed_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '[' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Candidate JSON texts, most trusted first: fenced ```json blocks, other
/// fenced blocks, then bare bracketed spans.
fn candidates(text: &str) -> Vec<&str> {
    let mut out: Vec<&str> = fenced_json_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    out.extend(
        fenced_any_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
            .filter(|body| body.starts_with('[')),
    );
    out.extend(bracketed_spans(text));
    out
}

fn first_string<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn to_task(value: &Value) -> Option<ExtractedTask> {
    let obj = value.as_object()?;
    let title = first_string(obj, &TITLE_KEYS)?.to_string();
    let time = TIME_KEYS.iter().find_map(|k| obj.get(*k));

    let (estimated_time, estimated_minutes) = match time {
        Some(Value::String(s)) => (s.clone(), parse_estimate(s)),
        Some(Value::Number(n)) => {
            let minutes = n.as_f64().map(f64::round).unwrap_or(0.0);
            let minutes = if minutes >= 1.0 && minutes <= f64::from(u32::MAX) {
                minutes as u32
            } else {
                DEFAULT_ESTIMATE_MINUTES
            };
            (n.to_string(), minutes)
        }
        _ => (String::new(), DEFAULT_ESTIMATE_MINUTES),
    };

    Some(ExtractedTask {
        title,
        estimated_time,
        estimated_minutes,
    })
}

/// Pulls the first parseable JSON array out of `text` and keeps the
/// elements that name a task. Malformed output yields an empty list.
pub fn extract_tasks(text: &str) -> Vec<ExtractedTask> {
    for candidate in candidates(text) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Array(items)) => {
                return items.iter().filter_map(to_task).collect();
            }
            Ok(_) => continue,
            Err(e) => debug!("Skipping unparseable task block: {}", e),
        }
    }
    Vec::new()
}

fn sounds_low(message: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)sad|depressed|not in a good mood|tired|down").expect("valid pattern")
    })
    .is_match(message)
}

/// Markdown table of the extracted tasks followed by break advice that
/// depends on how the user sounds.
pub fn render_summary(tasks: &[ExtractedTask], user_message: &str) -> String {
    let mut out = String::from("Your tasks and times:\n");
    if !tasks.is_empty() {
        out.push_str("| Task | Time | Status |\n| --- | --- | --- |\n");
        for task in tasks {
            out.push_str(&format!(
                "| {} | {} min | Pending |\n",
                task.title.replace('|', "/"),
                task.estimated_minutes
            ));
        }
    }
    out.push('\n');
    if sounds_low(user_message) {
        out.push_str(
            "I noticed you might not be feeling great. How about taking a short walk or quick nap before starting your tasks?",
        );
    } else {
        out.push_str("Remember to take regular short breaks for better focus!");
    }
    out.push_str("\n\nI'm cheering for you! Let's make today awesome together!");
    out
}
