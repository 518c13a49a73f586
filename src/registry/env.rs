use std::collections::BTreeMap;

/// Flatten an environment map into the registry's `K=V,K2=V2` form.
/// Commas and backslashes inside values are escaped with `\`.
pub fn flatten_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{}={}", k, escape(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a flattened env string back into a map. Segments without a key
/// are skipped.
pub fn parse_env(flat: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for segment in split_unescaped(flat) {
        if let Some((k, v)) = segment.split_once('=') {
            if !k.is_empty() {
                out.insert(k.to_string(), unescape(v));
            }
        }
    }
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

/// Split on commas that are not preceded by an escaping backslash. The
/// pieces keep their escapes.
fn split_unescaped(flat: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in flat.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                parts.push(&flat[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&flat[start..]);
    parts
}
