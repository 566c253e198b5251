//! Placeholder Resolver (C5, §4.5): substitutes `{{stepId.field.path}}`
//! references in a not-yet-executing step's arguments using prior steps'
//! results.
//!
//! Grammar: `{{stepId(\.ident|\[index\])*}}` (§9's suggested shape). A
//! lookup walks to the prior step whose `stepId` matches, takes its
//! `result.data`, and navigates the remaining dotted/bracketed path.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use ov_domain::run::Step;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)((?:\.[A-Za-z0-9_]+|\[[0-9]+\])*)\s*\}\}").unwrap()
    })
}

fn path_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.([A-Za-z0-9_]+)|\[([0-9]+)\]").unwrap())
}

enum Segment {
    Field(String),
    Index(usize),
}

fn parse_segments(tail: &str) -> Vec<Segment> {
    path_segment_re()
        .captures_iter(tail)
        .map(|c| match c.get(1) {
            Some(field) => Segment::Field(field.as_str().to_string()),
            None => Segment::Index(c.get(2).unwrap().as_str().parse().unwrap_or(0)),
        })
        .collect()
}

fn navigate<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments {
        cur = match (seg, cur) {
            (Segment::Field(f), Value::Object(map)) => map.get(f)?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn lookup(step_id: &str, tail: &str, steps: &[Step]) -> Option<Value> {
    let step = steps.iter().find(|s| s.step_id == step_id)?;
    let data = step.result.as_ref()?.data.as_ref()?;
    if tail.is_empty() {
        return Some(data.clone());
    }
    navigate(data, &parse_segments(tail)).cloned()
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolves every placeholder found in a string leaf. A string that is
/// *exactly* one placeholder resolves to the raw (possibly non-string)
/// value; a string containing one or more placeholders among other text has
/// each occurrence substituted textually. Unresolved templates are left
/// literal and recorded as the first resolution warning seen.
fn resolve_string(s: &str, steps: &[Step], warning: &mut Option<String>) -> Value {
    let re = placeholder_re();

    if let Some(caps) = re.captures(s) {
        if caps.get(0).unwrap().as_str() == s {
            let step_id = &caps[1];
            let tail = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            return match lookup(step_id, tail, steps) {
                Some(v) => v,
                None => {
                    record_warning(warning, s);
                    Value::String(s.to_string())
                }
            };
        }
    }

    if !re.is_match(s) {
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let m = caps.get(0).unwrap();
        out.push_str(&s[last..m.start()]);
        let step_id = &caps[1];
        let tail = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        match lookup(step_id, tail, steps) {
            Some(v) => out.push_str(&value_to_string(&v)),
            None => {
                record_warning(warning, m.as_str());
                out.push_str(m.as_str());
            }
        }
        last = m.end();
    }
    out.push_str(&s[last..]);
    Value::String(out)
}

fn record_warning(warning: &mut Option<String>, template: &str) {
    if warning.is_none() {
        *warning = Some(format!("could not resolve placeholder {template}"));
    }
}

fn walk(value: &Value, steps: &[Step], warning: &mut Option<String>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, steps, warning),
        Value::Array(items) => Value::Array(items.iter().map(|v| walk(v, steps, warning)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), walk(v, steps, warning)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolves every placeholder in `args` against `steps`' recorded results.
/// Non-string arguments pass through unmodified. Returns the resolved
/// arguments and, if any template failed to resolve, a single warning
/// message (§4.5: "annotate the step with a resolution_warning").
pub fn resolve_placeholders(args: &Value, steps: &[Step]) -> (Value, Option<String>) {
    let mut warning = None;
    let resolved = walk(args, steps, &mut warning);
    (resolved, warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ov_domain::run::StepResult;
    use ov_domain::tool::ToolCall;

    fn completed_step(step_id: &str, data: Value) -> Step {
        let mut step = Step::new(
            step_id,
            ToolCall {
                id: "call_1".into(),
                name: "fetch_emails".into(),
                arguments: serde_json::json!({}),
                session_id: "s1".into(),
                user_id: "u1".into(),
            },
            "fetch",
        );
        step.status = ov_domain::run::StepStatus::Completed;
        step.result = Some(StepResult::success(data));
        step
    }

    #[test]
    fn whole_value_template_returns_raw_value() {
        let steps = vec![completed_step("step1", serde_json::json!({"data": [{"from": "alice@x.com"}]}))];
        let (resolved, warn) = resolve_placeholders(&serde_json::json!("{{step1.data[0].from}}"), &steps);
        assert_eq!(resolved, serde_json::json!("alice@x.com"));
        assert!(warn.is_none());
    }

    #[test]
    fn embedded_template_is_substituted_textually() {
        let steps = vec![completed_step("step1", serde_json::json!({"data": [{"subject": "hello"}]}))];
        let (resolved, warn) = resolve_placeholders(&serde_json::json!("Re: {{step1.data[0].subject}}"), &steps);
        assert_eq!(resolved, serde_json::json!("Re: hello"));
        assert!(warn.is_none());
    }

    #[test]
    fn unresolved_path_is_left_literal_with_warning() {
        let steps = vec![completed_step("step1", serde_json::json!({"data": []}))];
        let (resolved, warn) = resolve_placeholders(&serde_json::json!("{{step1.data[0].from}}"), &steps);
        assert_eq!(resolved, serde_json::json!("{{step1.data[0].from}}"));
        assert!(warn.is_some());
    }

    #[test]
    fn unknown_step_id_is_left_literal_with_warning() {
        let (resolved, warn) = resolve_placeholders(&serde_json::json!("{{missing.field}}"), &[]);
        assert_eq!(resolved, serde_json::json!("{{missing.field}}"));
        assert!(warn.is_some());
    }

    #[test]
    fn non_string_arguments_pass_through_unmodified() {
        let (resolved, warn) = resolve_placeholders(&serde_json::json!({"limit": 3, "flag": true}), &[]);
        assert_eq!(resolved, serde_json::json!({"limit": 3, "flag": true}));
        assert!(warn.is_none());
    }

    #[test]
    fn resolution_is_idempotent_on_literal_strings() {
        let (first, _) = resolve_placeholders(&serde_json::json!("got it"), &[]);
        let (second, _) = resolve_placeholders(&first, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn nested_object_and_array_arguments_are_walked() {
        let steps = vec![completed_step("step1", serde_json::json!({"data": [{"id": "e1"}]}))];
        let args = serde_json::json!({
            "to": ["{{step1.data[0].id}}"],
            "meta": {"ref": "{{step1.data[0].id}}"},
        });
        let (resolved, _) = resolve_placeholders(&args, &steps);
        assert_eq!(resolved["to"][0], serde_json::json!("e1"));
        assert_eq!(resolved["meta"]["ref"], serde_json::json!("e1"));
    }
}
