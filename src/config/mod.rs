use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

/// Parse an environment-config file into flat `KEY=value` overrides.
///
/// Nested tables are flattened into upper-snake keys joined by `_`
/// (`[db] url = "x"` becomes `DB_URL=x`), arrays are comma-joined and other
/// scalars are stringified. Any read or parse failure is logged and yields
/// an empty map.
pub fn parse_config_file(path: &Path) -> BTreeMap<String, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            return BTreeMap::new();
        }
    };
    match parse_config_str(&content) {
        Ok(map) => {
            debug!(path = %path.display(), keys = map.len(), "loaded config overrides");
            map
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file");
            BTreeMap::new()
        }
    }
}

pub fn parse_config_str(content: &str) -> Result<BTreeMap<String, String>, toml::de::Error> {
    let table: toml::Table = content.parse()?;
    let mut out = BTreeMap::new();
    flatten_table("", &table, &mut out);
    Ok(out)
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            env_key(key)
        } else {
            format!("{}_{}", prefix, env_key(key))
        };
        match value {
            toml::Value::Table(inner) => flatten_table(&full, inner, out),
            other => {
                out.insert(full, scalar_to_string(other));
            }
        }
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        toml::Value::Table(t) => toml::to_string(t).unwrap_or_default(),
    }
}
