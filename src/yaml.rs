//! YAML parser for authored advanced-config arrays.
//!
//! Endpoint tooling and tests author step configs as YAML documents (JSON
//! works too, being a YAML subset). Parsing stays loose on purpose: the
//! document must be a sequence, but each entry is handed to the plan
//! builder as-is, which is where all per-field defaulting happens.

use crate::plan::build_plan;
use crate::step::NormalizedStep;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// Parse an advanced-config document into a normalized step plan.
///
/// # Example
///
/// ```rust
/// let yaml = r#"
/// - name: notify-crm
///   target_endpoint: /acme/crm/leads
///   method: POST
///   body:
///     id: "{{1.response.body.id}}"
/// "#;
///
/// let plan = nextcalls::parse_yaml(yaml).unwrap();
/// assert_eq!(plan.len(), 1);
/// assert_eq!(plan[0].name, "notify-crm");
/// ```
pub fn parse_yaml(yaml: &str) -> Result<Vec<NormalizedStep>> {
    let raw: Value =
        serde_yaml::from_str(yaml).context("Failed to parse advanced-config YAML")?;

    if !raw.is_array() {
        anyhow::bail!("Advanced config must be a sequence of steps");
    }

    Ok(build_plan(&raw))
}

/// Load and parse an advanced-config document from a file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<NormalizedStep>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_yaml(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_multi_step_config() {
        let yaml = r#"
- name: create-lead
  target_endpoint: /acme/crm/leads
  method: POST
  body:
    name: "{{root.request.body.name}}"
  delay_ms: 100
- name: webhook
  target_endpoint: https://hooks.example.com/notify
  method: POST
  condition:
    path: status
    op: eq
    value: 201
  log:
    persist: false
"#;

        let plan = parse_yaml(yaml).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "create-lead");
        assert_eq!(plan[0].delay_ms, 100);
        assert_eq!(plan[0].payload["name"], json!("{{root.request.body.name}}"));
        assert!(plan[1].target.is_external());
        assert!(!plan[1].log.persist);
    }

    #[test]
    fn test_json_is_accepted() {
        let plan = parse_yaml(r#"[{"target_endpoint": "/a/b/c", "method": "put"}]"#).unwrap();
        assert_eq!(plan[0].target.method, "PUT");
    }

    #[test]
    fn test_non_sequence_document_fails() {
        let result = parse_yaml("name: not-a-sequence");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be a sequence"));
    }

    #[test]
    fn test_invalid_yaml_fails_with_context() {
        let result = parse_yaml(": : :");
        assert!(result.is_err());
    }
}
