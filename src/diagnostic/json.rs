use crate::ast::SourceMap;
use super::Diagnostic;

/// One JSON object per diagnostic, without a trailing newline.
pub fn render(d: &Diagnostic) -> String {
    let source_map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<serde_json::Value> = d.labels.iter().map(|l| {
        let mut obj = serde_json::json!({
            "start": l.span.start,
            "end": l.span.end,
            "message": l.message,
            "primary": l.is_primary,
        });
        let line_col = match (&source_map, d.location) {
            (Some(map), _) => Some(map.lookup(l.span.start)),
            (None, Some(pos)) if l.is_primary => Some((pos.line as usize, pos.column as usize)),
            _ => None,
        };
        if let Some((line, col)) = line_col {
            obj["line"] = serde_json::Value::from(line);
            obj["col"] = serde_json::Value::from(col);
        }
        obj
    }).collect();

    let mut obj = serde_json::json!({
        "severity": "error",
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}
