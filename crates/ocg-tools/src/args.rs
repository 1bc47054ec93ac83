use serde_json::{Map, Value};

/// Parse a JSON arguments string as produced by the model. Malformed input
/// yields an empty map; a bare array is wrapped under `args`.
pub fn parse_args(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Array(arr)) => {
            let mut map = Map::new();
            map.insert("args".into(), Value::Array(arr));
            map
        }
        _ => Map::new(),
    }
}

pub fn get_string(args: &Map<String, Value>, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn get_i64(args: &Map<String, Value>, key: &str) -> i64 {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

pub fn get_f64(args: &Map<String, Value>, key: &str) -> f64 {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn get_bool(args: &Map<String, Value>, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Truncate long text at a byte budget, on a char boundary.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < max_len)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(max_len);
    format!("{}...\n(content truncated)", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_malformed_and_array_input() {
        assert!(parse_args("not json").is_empty());
        let map = parse_args("[1, 2]");
        assert_eq!(map["args"], serde_json::json!([1, 2]));
    }

    #[test]
    fn coercions_accept_strings() {
        let args = parse_args(r#"{"n":"42","f":"0.5","b":true}"#);
        assert_eq!(get_i64(&args, "n"), 42);
        assert_eq!(get_f64(&args, "f"), 0.5);
        assert!(get_bool(&args, "b"));
        assert_eq!(get_i64(&args, "missing"), 0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 4);
        assert!(t.starts_with("hé"));
        assert!(t.ends_with("(content truncated)"));
        assert_eq!(truncate("short", 100), "short");
    }
}
