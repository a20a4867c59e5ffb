//! `<<< EXPR >>>` template substitution (spec §4.3).
//!
//! Grounded on `pyrace.thread.Thread._eval_recursive`
//! (`examples/original_source/pyrace/thread.py`): walk a request's url,
//! headers, query parameters, cookies, and body, recursing into
//! maps/sequences, substituting any `<<< EXPR >>>` marker found in a
//! string leaf. Rust has no `eval`, so `EXPR` is resolved by an injected
//! [`TemplateFn`] rather than interpreted as Python source (spec.md Design
//! Note §9's redesigned plugin-interface approach).

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::context::WorkerContext;
use crate::error::RaceError;
use crate::multimap::OrderedMultimap;
use crate::work::{Body, RequestSpec};

/// Matches `<<< EXPR >>>`, tolerating surrounding whitespace and newlines
/// inside `EXPR` (`(?s)` makes `.` match newlines, matching the Python
/// original's `re.DOTALL`).
static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<<<\s*(.*?)\s*>>>").expect("static regex is valid"));

/// Which parts of a [`RequestSpec`] the evaluator should scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFields {
    pub url: bool,
    pub headers: bool,
    pub query: bool,
    pub cookies: bool,
    pub body: bool,
}

impl Default for TargetFields {
    fn default() -> Self {
        Self {
            url: true,
            headers: true,
            query: true,
            cookies: true,
            body: true,
        }
    }
}

/// A pluggable expression evaluator: given the raw text between `<<<` and
/// `>>>` and the worker's context, returns the string to splice in.
pub type TemplateFn = Arc<dyn Fn(&str, &WorkerContext) -> Result<String, RaceError> + Send + Sync>;

/// Template-evaluation configuration (spec §4.3's `{enable, pattern,
/// action, target_fields}`). `pattern` and `action` collapse into the
/// injected [`TemplateFn`] here: the marker syntax itself is fixed
/// (`<<< ... >>>`), but what `EXPR` means, and hence what "action" is taken,
/// is entirely up to the function supplied.
#[derive(Clone)]
pub struct TemplateOptions {
    pub enable: bool,
    pub eval_fn: TemplateFn,
    pub target_fields: TargetFields,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            enable: false,
            eval_fn: Arc::new(default_eval),
            target_fields: TargetFields::default(),
        }
    }
}

/// Evaluates every `<<< EXPR >>>` marker in `spec`'s enabled fields,
/// returning a new `RequestSpec` with substitutions applied.
pub fn evaluate(
    spec: &RequestSpec,
    options: &TemplateOptions,
    ctx: &WorkerContext,
) -> Result<RequestSpec, RaceError> {
    if !options.enable {
        return Ok(spec.clone());
    }

    let mut out = spec.clone();
    if options.target_fields.url {
        out.url = eval_string(&spec.url, options, ctx)?;
    }
    if options.target_fields.headers {
        out.headers = eval_multimap(&spec.headers, options, ctx)?;
    }
    if options.target_fields.query {
        out.query = eval_multimap(&spec.query, options, ctx)?;
    }
    if options.target_fields.cookies {
        out.cookies = eval_multimap(&spec.cookies, options, ctx)?;
    }
    if options.target_fields.body {
        out.body = match &spec.body {
            None => None,
            Some(Body::Bytes(bytes)) => Some(Body::Bytes(bytes.clone())),
            Some(Body::Form(form)) => Some(Body::Form(eval_multimap(form, options, ctx)?)),
            Some(Body::Json(value)) => Some(Body::Json(eval_json(value, options, ctx)?)),
        };
    }
    Ok(out)
}

fn eval_multimap(
    map: &OrderedMultimap<String, String>,
    options: &TemplateOptions,
    ctx: &WorkerContext,
) -> Result<OrderedMultimap<String, String>, RaceError> {
    let mut out = OrderedMultimap::new();
    for (key, value) in map.iter() {
        out.insert(key.clone(), eval_string(value, options, ctx)?);
    }
    Ok(out)
}

fn eval_json(
    value: &JsonValue,
    options: &TemplateOptions,
    ctx: &WorkerContext,
) -> Result<JsonValue, RaceError> {
    match value {
        JsonValue::String(s) => Ok(JsonValue::String(eval_string(s, options, ctx)?)),
        JsonValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_json(item, options, ctx)?);
            }
            Ok(JsonValue::Array(out))
        }
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                // Keys are preserved verbatim; only values recurse, matching
                // `_eval_recursive`'s dict handling.
                out.insert(key.clone(), eval_json(val, options, ctx)?);
            }
            Ok(JsonValue::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Replaces every marker found in `text`, left to right. A string may
/// contain more than one marker; each is evaluated independently.
fn eval_string(
    text: &str,
    options: &TemplateOptions,
    ctx: &WorkerContext,
) -> Result<String, RaceError> {
    if !MARKER.is_match(text) {
        return Ok(text.to_string());
    }

    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in MARKER.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let expr = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        result.push_str(&text[last_end..whole.start()]);
        result.push_str(&(options.eval_fn)(expr, ctx)?);
        last_end = whole.end();
    }
    result.push_str(&text[last_end..]);
    Ok(result)
}

/// The default closed expression language (spec §4.3): `self.*`, `time.*`,
/// `random.*`, `hash.*`, `encode.*`, `json.get(path)`. Anything else is a
/// [`RaceError::TemplateEvaluation`].
fn default_eval(expr: &str, ctx: &WorkerContext) -> Result<String, RaceError> {
    let expr = expr.trim();
    let fail = |reason: &str| RaceError::TemplateEvaluation {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };

    if expr == "self.worker_index" {
        return Ok(ctx.worker_index.to_string());
    }
    if expr == "time.unix()" {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| fail(&e.to_string()))?;
        return Ok(now.as_secs().to_string());
    }
    if expr == "time.unix_ms()" {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| fail(&e.to_string()))?;
        return Ok(now.as_millis().to_string());
    }
    if expr == "random.float()" {
        use rand::Rng;
        return Ok(rand::thread_rng().gen_range(0.0f64..1.0).to_string());
    }
    if let Some(args) = call_args(expr, "random.int") {
        let (a, b) = parse_two_ints(&args).ok_or_else(|| fail("expected random.int(a, b)"))?;
        use rand::Rng;
        return Ok(rand::thread_rng().gen_range(a..=b).to_string());
    }
    if let Some(args) = call_args(expr, "random.hex") {
        let n: usize = args.trim().parse().map_err(|_| fail("expected random.hex(n)"))?;
        use rand::Rng;
        let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().gen()).collect();
        return Ok(hex::encode(bytes));
    }
    if let Some(args) = call_args(expr, "hash.sha256") {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(strip_quotes(&args).as_bytes());
        return Ok(hex::encode(hasher.finalize()));
    }
    if let Some(args) = call_args(expr, "encode.base64") {
        use base64::Engine;
        return Ok(base64::engine::general_purpose::STANDARD.encode(strip_quotes(&args)));
    }
    if let Some(args) = call_args(expr, "encode.hex") {
        return Ok(hex::encode(strip_quotes(&args)));
    }
    if let Some(args) = call_args(expr, "json.get") {
        let path = strip_quotes(&args);
        let last_response = ctx
            .shared
            .lock()
            .unwrap()
            .get("__last_response_json")
            .cloned();
        let Some(value) = last_response else {
            return Err(fail("no response recorded yet for json.get"));
        };
        return json_get(&value, &path).ok_or_else(|| fail(&format!("no value at path {path:?}")));
    }

    Err(fail("unrecognized expression"))
}

fn call_args<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}(");
    if expr.starts_with(&prefix) && expr.ends_with(')') {
        Some(&expr[prefix.len()..expr.len() - 1])
    } else {
        None
    }
}

fn parse_two_ints(args: &str) -> Option<(i64, i64)> {
    let mut parts = args.splitn(2, ',');
    let a = parts.next()?.trim().parse().ok()?;
    let b = parts.next()?.trim().parse().ok()?;
    Some((a, b))
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Dotted-path lookup into a JSON value, e.g. `"a.b.0.c"`.
fn json_get(value: &JsonValue, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(match current {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::Latch;
    use crate::resolver::{ConnectMode, SystemResolver};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn test_ctx(worker_index: usize) -> WorkerContext {
        WorkerContext::new(
            worker_index,
            Arc::new(Mutex::new(HashMap::new())),
            Arc::new(Latch::new()),
            Arc::new(Latch::new()),
            ConnectMode::Same,
            Arc::new(SystemResolver::new()),
        )
    }

    #[test]
    fn substitutes_self_worker_index() {
        let ctx = test_ctx(7);
        let options = TemplateOptions {
            enable: true,
            ..Default::default()
        };
        let mut spec = RequestSpec::get("https://example.test/<<< self.worker_index >>>");
        spec.headers.insert("X-Worker".to_string(), "<<<self.worker_index>>>".to_string());

        let out = evaluate(&spec, &options, &ctx).unwrap();
        assert_eq!(out.url, "https://example.test/7");
        assert_eq!(out.headers.get(&"X-Worker".to_string()), Some(&"7".to_string()));
    }

    #[test]
    fn disabled_evaluation_returns_the_spec_unchanged() {
        let ctx = test_ctx(0);
        let options = TemplateOptions::default();
        let spec = RequestSpec::get("https://example.test/<<< self.worker_index >>>");
        let out = evaluate(&spec, &options, &ctx).unwrap();
        assert_eq!(out.url, spec.url);
    }

    #[test]
    fn unrecognized_expression_is_a_template_error() {
        let ctx = test_ctx(0);
        let options = TemplateOptions {
            enable: true,
            ..Default::default()
        };
        let spec = RequestSpec::get("https://example.test/<<< nonsense.call() >>>");
        let err = evaluate(&spec, &options, &ctx).unwrap_err();
        assert!(matches!(err, RaceError::TemplateEvaluation { .. }));
    }

    #[test]
    fn encode_base64_round_trips_a_literal() {
        let ctx = test_ctx(0);
        let options = TemplateOptions {
            enable: true,
            ..Default::default()
        };
        let spec = RequestSpec::get(r#"https://example.test/<<< encode.base64("hi") >>>"#);
        let out = evaluate(&spec, &options, &ctx).unwrap();
        assert_eq!(out.url, "https://example.test/aGk=");
    }

    #[test]
    fn custom_eval_fn_overrides_the_default_language() {
        let ctx = test_ctx(0);
        let options = TemplateOptions {
            enable: true,
            eval_fn: Arc::new(|expr, _ctx| Ok(format!("custom:{expr}"))),
            ..Default::default()
        };
        let spec = RequestSpec::get("https://example.test/<<< anything >>>");
        let out = evaluate(&spec, &options, &ctx).unwrap();
        assert_eq!(out.url, "https://example.test/custom:anything");
    }

    #[test]
    fn json_body_values_recurse_and_preserve_keys() {
        let ctx = test_ctx(3);
        let options = TemplateOptions {
            enable: true,
            ..Default::default()
        };
        let mut spec = RequestSpec::get("https://example.test/");
        spec.body = Some(Body::Json(serde_json::json!({
            "id": "<<<self.worker_index>>>",
            "nested": { "value": "<<<self.worker_index>>>" }
        })));
        let out = evaluate(&spec, &options, &ctx).unwrap();
        let Some(Body::Json(value)) = out.body else {
            panic!("expected json body");
        };
        assert_eq!(value["id"], "3");
        assert_eq!(value["nested"]["value"], "3");
    }
}
