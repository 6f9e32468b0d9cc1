use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::PlanError;
use crate::model::ExecutionContext;

/// Resolve every `${…}` reference in a parameter set against the execution
/// context. References to step results are forward-only: a step may only
/// see results of steps with a strictly smaller order. Unresolvable
/// references are preserved verbatim, never fabricated.
pub fn resolve_parameters(
    parameters: &Map<String, Value>,
    cx: &ExecutionContext,
    current_order: u32,
    cancel: &CancellationToken,
) -> Result<Map<String, Value>, PlanError> {
    let mut out = Map::with_capacity(parameters.len());
    for (key, value) in parameters {
        if cancel.is_cancelled() {
            return Err(PlanError::canceled());
        }
        out.insert(key.clone(), resolve_value(value, cx, current_order));
    }
    Ok(out)
}

fn resolve_value(value: &Value, cx: &ExecutionContext, current_order: u32) -> Value {
    match value {
        Value::String(s) => resolve_string(s, cx, current_order),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, cx, current_order))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, cx, current_order)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, cx: &ExecutionContext, current_order: u32) -> Value {
    // A string that is exactly one reference keeps the resolved value's type.
    if let Some(expr) = single_reference(s) {
        return match lookup(expr, cx, current_order) {
            Some(value) => value,
            None => {
                tracing::warn!(target: "aperture::resolver", reference = s, "unresolved reference");
                Value::String(s.to_string())
            }
        };
    }

    if !s.contains("${") {
        return Value::String(s.to_string());
    }

    // Splice each resolved reference into the surrounding text.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let expr = &tail[..end];
                match lookup(expr, cx, current_order) {
                    Some(value) => out.push_str(&render(value)),
                    None => {
                        tracing::warn!(
                            target: "aperture::resolver",
                            reference = &rest[start..start + end + 3],
                            "unresolved reference"
                        );
                        out.push_str(&rest[start..start + end + 3]);
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                // Unterminated reference; keep the remainder as-is.
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

fn single_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains('}') {
        return None;
    }
    Some(inner)
}

fn lookup(expr: &str, cx: &ExecutionContext, current_order: u32) -> Option<Value> {
    let mut segments = expr.split('.');
    let head = segments.next()?.trim();

    // Built-ins are scalar strings; navigating below them never resolves.
    if head.eq_ignore_ascii_case("userid") {
        return segments
            .next()
            .is_none()
            .then(|| Value::String(cx.user_id.clone()));
    }
    if head.eq_ignore_ascii_case("intent") {
        return segments
            .next()
            .is_none()
            .then(|| Value::String(cx.intent.clone()));
    }

    let mut node: &Value = if let Some(n) = step_number(head) {
        if n >= current_order {
            tracing::warn!(
                target: "aperture::resolver",
                reference = expr,
                step = n,
                current = current_order,
                "reference to a step that has not run yet"
            );
            return None;
        }
        cx.result_for(n)?.value.as_ref()?
    } else {
        cx.variables.get(head)?
    };

    for segment in segments {
        node = navigate(node, segment.trim())?;
    }
    Some(node.clone())
}

fn step_number(head: &str) -> Option<u32> {
    let lowered = head.to_ascii_lowercase();
    lowered
        .strip_prefix("step")?
        .parse::<u32>()
        .ok()
        .filter(|n| *n >= 1)
}

fn navigate<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(segment) {
                return Some(found);
            }
            map.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(segment))
                .map(|(_, v)| v)
        }
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
