use crate::synth::GeneratedScript;
use regex::Regex;
use serde::Deserialize;

pub const MAX_TITLE_CHARS: usize = 50;

#[derive(Deserialize)]
struct ScriptPayload {
    #[serde(default = "default_true")]
    feasible: bool,
    #[serde(default)]
    script: String,
    #[serde(default)]
    data_columns: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Parses the script-synthesis reply. `None` means "cannot generate": unparseable output,
/// an explicit `"feasible": false`, or an empty script.
pub fn parse_script_payload(text: &str) -> Option<GeneratedScript> {
    if let Some(payload) = json_object(text).and_then(|s| serde_json::from_str::<ScriptPayload>(&s).ok()) {
        if !payload.feasible || payload.script.trim().is_empty() {
            return None;
        }
        return Some(GeneratedScript {
            script: payload.script.trim().to_string(),
            data_columns: normalize_columns(payload.data_columns),
        });
    }

    // older models ignore the JSON instruction and answer with a fenced script
    // followed by a "Required data columns: a, b" line
    let script = extract_code_block(text)?;
    let columns = required_columns_line(text).unwrap_or_default();
    Some(GeneratedScript {
        script,
        data_columns: normalize_columns(columns),
    })
}

/// Returns the body of the first fenced code block, preferring ```python fences.
pub fn extract_code_block(text: &str) -> Option<String> {
    let python = Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)```").ok()?;
    let any = Regex::new(r"(?s)```[a-zA-Z0-9_-]*[ \t]*\r?\n(.*?)```").ok()?;
    let body = python
        .captures(text)
        .or_else(|| any.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())?;
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

pub fn clean_report(text: &str) -> Option<String> {
    let t = text.trim();
    let re = Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*)\r?\n```$").ok()?;
    let body = match re.captures(t).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => t,
    };
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

pub fn clean_title(text: &str) -> Option<String> {
    let t = text
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if t.is_empty() || t.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(t.chars().take(MAX_TITLE_CHARS).collect())
}

fn json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn required_columns_line(text: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?i)required data columns:\s*\[?([^\]\n]*)\]?").ok()?;
    let caps = re.captures(text)?;
    let list = caps.get(1)?.as_str();
    Some(list.split(',').map(|s| s.to_string()).collect())
}

fn normalize_columns(cols: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in cols {
        let c = c
            .trim()
            .trim_matches(|ch| ch == '"' || ch == '\'' || ch == '`')
            .trim()
            .to_string();
        if !c.is_empty() && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}
