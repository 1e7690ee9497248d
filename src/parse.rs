use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::detect::DetectionError;
use crate::models::DiseaseAnalysisResult;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

const RAW_PREVIEW_LEN: usize = 200;

// ── Public API ───────────────────────────────────────────────────────────────

/// Normalize a model reply into a validated analysis record.
///
/// The reply is expected to be a JSON object, but models wrap it in markdown
/// code fences or surround it with prose often enough that a plain parse is
/// not sufficient: after stripping fences we try a direct parse, then fall
/// back to extracting the outermost `{ ... }` span from the raw content.
pub fn parse_response(content: &str) -> Result<DiseaseAnalysisResult, DetectionError> {
    let cleaned = strip_code_fences(content);

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        if value.is_object() {
            tracing::info!("model reply parsed as JSON");
            return Ok(normalize(&value));
        }
    }

    tracing::warn!("model reply is not plain JSON, extracting embedded object");
    if let Some(m) = JSON_OBJECT_RE.find(content) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            if value.is_object() {
                tracing::info!("embedded JSON extracted and parsed");
                return Ok(normalize(&value));
            }
        }
    }

    tracing::error!("could not parse model reply as JSON: {}", content);
    Err(DetectionError::UnparseableReply(truncate(content)))
}

// ── Code fence stripping ─────────────────────────────────────────────────────

fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.starts_with("```json") {
        trimmed.replace("```json", "").replace("```", "").trim().to_string()
    } else if trimmed.starts_with("```") {
        trimmed.replace("```", "").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Field normalization ──────────────────────────────────────────────────────

fn normalize(value: &Value) -> DiseaseAnalysisResult {
    DiseaseAnalysisResult {
        disease_detected: value
            .get("disease_detected")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        disease_name: value
            .get("disease_name")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        disease_type: string_or(value, "disease_type", "unknown"),
        severity: string_or(value, "severity", "unknown"),
        confidence: confidence_value(value.get("confidence")),
        symptoms: string_list(value, "symptoms"),
        possible_causes: string_list(value, "possible_causes"),
        treatment: string_list(value, "treatment"),
        analysis_timestamp: chrono::Local::now().to_rfc3339(),
    }
}

fn string_or(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Confidence arrives as a number most of the time, but some replies quote it.
fn confidence_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn truncate(content: &str) -> String {
    let mut end = RAW_PREVIEW_LEN.min(content.len());
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}
