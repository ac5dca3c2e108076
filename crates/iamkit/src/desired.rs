//! Desired state loader.
//!
//! Parses a declarative mapping (JSON or TOML) into a [`DesiredState`]. A
//! single bad entry is default-filled and reported as a diagnostic; only a
//! top level that is not a mapping fails the load.

use crate::error::{Error, Result};
use crate::types::{
    DesiredState, Diagnostic, EntityKey, EntityKind, Flag, GroupSpec, IdentitySpec,
};
use serde_json::{Map, Value};
use std::path::Path;

/// On-disk format of a desired-state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// Pick the format from a file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// A loaded desired state plus everything that was default-filled.
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    pub desired: DesiredState,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse desired state from text.
pub fn load_str(text: &str, format: Format) -> Result<LoadedState> {
    let value: Value = match format {
        Format::Json => serde_json::from_str(text)
            .map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?,
        Format::Toml => {
            toml::from_str(text).map_err(|e| Error::malformed(format!("invalid TOML: {e}")))?
        }
    };
    load_value(&value)
}

/// Parse desired state from an already-decoded document.
pub fn load_value(value: &Value) -> Result<LoadedState> {
    let Value::Object(root) = value else {
        return Err(Error::malformed(format!(
            "top level must be a mapping, found {}",
            type_name(value)
        )));
    };

    let mut loaded = LoadedState::default();

    if let Some(groups) = section(root, &["groups"], EntityKind::Group, &mut loaded.diagnostics) {
        for (name, entry) in groups {
            let spec = load_group(&name, &entry, &mut loaded.diagnostics);
            loaded.desired.groups.insert(name, spec);
        }
    }

    if let Some(identities) = section(
        root,
        &["users", "identities"],
        EntityKind::Identity,
        &mut loaded.diagnostics,
    ) {
        for (name, entry) in identities {
            let spec = load_identity(&name, &entry, &mut loaded.diagnostics);
            loaded.desired.identities.insert(name, spec);
        }
    }

    for diagnostic in &loaded.diagnostics {
        log::warn!("{diagnostic}");
    }
    Ok(loaded)
}

/// Load desired state from a file, picking the format from its extension.
pub fn load_file(path: &Path) -> Result<LoadedState> {
    let text = std::fs::read_to_string(path)?;
    log::debug!("loading desired state from {}", path.display());
    load_str(&text, Format::from_path(path))
}

/// Write desired state to a file in the format its extension names.
pub fn write_file(desired: &DesiredState, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(desired, Format::from_path(path))?)?;
    log::debug!("wrote desired state to {}", path.display());
    Ok(())
}

/// Render desired state back to text in the given format.
pub fn render(desired: &DesiredState, format: Format) -> Result<String> {
    match format {
        Format::Json => Ok(serde_json::to_string_pretty(desired)? + "\n"),
        Format::Toml => toml::to_string_pretty(desired)
            .map_err(|e| Error::Other(format!("failed to render TOML: {e}"))),
    }
}

/// Fetch a top-level section as a mapping. A section given as a JSON string
/// (stack configuration embeds it that way) is decoded first. A section of
/// the wrong shape is ignored with a diagnostic against `kind/*`.
fn section(
    root: &Map<String, Value>,
    keys: &[&str],
    kind: EntityKind,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Vec<(String, Value)>> {
    let (key, value) = keys
        .iter()
        .find_map(|k| root.get(*k).map(|v| (*k, v)))?;
    let mut ignore = |message: String| {
        diagnostics.push(Diagnostic::new(
            EntityKey {
                kind,
                name: "*".to_string(),
            },
            format!("{message}; section ignored"),
        ));
        None
    };

    let decoded;
    let value = match value {
        Value::Null => return None,
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                decoded = value;
                &decoded
            }
            Err(e) => return ignore(format!("'{key}' is not valid JSON: {e}")),
        },
        other => other,
    };

    match value {
        Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => ignore(format!("'{key}' must be a mapping, found {}", type_name(other))),
    }
}

fn load_identity(name: &str, entry: &Value, diagnostics: &mut Vec<Diagnostic>) -> IdentitySpec {
    let key = EntityKey::identity(name);
    let Value::Object(fields) = entry else {
        diagnostics.push(Diagnostic::new(
            key,
            format!(
                "entry is {} instead of a mapping; using no groups, no key, no console access",
                type_name(entry)
            ),
        ));
        return IdentitySpec::default();
    };

    let mut spec = IdentitySpec::default();
    if let Some(path) = string_field(fields, "path", &key, diagnostics) {
        spec.path = path;
    }
    spec.groups = string_list(fields.get("groups"), "groups", &key, diagnostics);
    spec.create_key = flag_field(fields, "create_key", &key, diagnostics);
    spec.has_console_access = flag_field(fields, "has_console_access", &key, diagnostics);
    spec
}

fn load_group(name: &str, entry: &Value, diagnostics: &mut Vec<Diagnostic>) -> GroupSpec {
    let key = EntityKey::group(name);
    let Value::Object(fields) = entry else {
        diagnostics.push(Diagnostic::new(
            key,
            format!("entry is {} instead of a mapping; using an empty group", type_name(entry)),
        ));
        return GroupSpec::default();
    };

    let mut spec = GroupSpec::default();
    if let Some(path) = string_field(fields, "path", &key, diagnostics) {
        spec.path = path;
    }

    let managed = fields
        .get("managed_policy_arns")
        .or_else(|| fields.get("managed_policies"));
    spec.managed_policies = string_list(managed, "managed_policy_arns", &key, diagnostics);

    if let Some(customer) = fields.get("customer_managed_policies") {
        for arn in customer_policy_arns(customer, &key, diagnostics) {
            if !spec.managed_policies.contains(&arn) {
                spec.managed_policies.push(arn);
            }
        }
    }

    match fields.get("inline_policies") {
        None | Some(Value::Null) => {}
        Some(Value::Object(policies)) => {
            for (policy_name, document) in policies {
                spec.inline_policies
                    .insert(policy_name.clone(), decode_document(document));
            }
        }
        Some(other) => diagnostics.push(Diagnostic::new(
            key,
            format!("inline_policies is {} instead of a mapping; ignored", type_name(other)),
        )),
    }
    spec
}

/// Inline documents may be embedded as JSON text. Undecodable text is kept
/// as-is for the reconciler to report.
fn decode_document(document: &Value) -> Value {
    match document {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| document.clone()),
        other => other.clone(),
    }
}

fn customer_policy_arns(
    value: &Value,
    key: &EntityKey,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<String> {
    let Value::Array(items) = value else {
        diagnostics.push(Diagnostic::new(
            key.clone(),
            "customer_managed_policies must be a list; ignored",
        ));
        return Vec::new();
    };

    let mut arns = Vec::new();
    for item in items {
        let arn = match item {
            Value::String(arn) => Some(arn.as_str()),
            Value::Object(fields) => fields.get("policy_arn").and_then(Value::as_str),
            _ => None,
        };
        match arn {
            Some(arn) => arns.push(arn.to_string()),
            None => diagnostics.push(Diagnostic::new(
                key.clone(),
                format!("customer managed policy entry {item} has no policy_arn; ignored"),
            )),
        }
    }
    arns
}

fn string_field(
    fields: &Map<String, Value>,
    field: &str,
    key: &EntityKey,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<String> {
    match fields.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            diagnostics.push(Diagnostic::new(
                key.clone(),
                format!("{field} is {} instead of a string; using default", type_name(other)),
            ));
            None
        }
    }
}

/// A list of strings, deduplicated in order. A bare string is a one-item list.
fn string_list(
    value: Option<&Value>,
    field: &str,
    key: &EntityKey,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<String> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::String(_)) => vec![single],
        Some(other) => {
            diagnostics.push(Diagnostic::new(
                key.clone(),
                format!("{field} is {} instead of a list; ignored", type_name(other)),
            ));
            return Vec::new();
        }
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        match item.as_str() {
            Some(s) if !out.iter().any(|o| o == s) => out.push(s.to_string()),
            Some(_) => {}
            None => diagnostics.push(Diagnostic::new(
                key.clone(),
                format!("{field} contains {} {item}; ignored", type_name(item)),
            )),
        }
    }
    out
}

fn flag_field(
    fields: &Map<String, Value>,
    field: &str,
    key: &EntityKey,
    diagnostics: &mut Vec<Diagnostic>,
) -> Flag {
    let parsed = match fields.get(field) {
        None | Some(Value::Null) => return Flag::No,
        Some(Value::Bool(b)) => Some(Flag::from(*b)),
        Some(Value::String(s)) => Flag::parse(s),
        Some(_) => None,
    };

    parsed.unwrap_or_else(|| {
        diagnostics.push(Diagnostic::new(
            key.clone(),
            format!("{field} is not yes/no; treating as no"),
        ));
        Flag::No
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_full_document() {
        let doc = json!({
            "groups": {
                "Ops": {
                    "path": "/ops/",
                    "managed_policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"],
                    "inline_policies": { "s3": { "Version": "2012-10-17", "Statement": [] } }
                }
            },
            "users": {
                "alice": {
                    "groups": ["Ops"],
                    "create_key": "yes",
                    "has_console_access": "no",
                    "path": "/staff/"
                }
            }
        });

        let loaded = load_value(&doc).unwrap();
        assert!(loaded.diagnostics.is_empty());

        let ops = &loaded.desired.groups["Ops"];
        assert_eq!(ops.path, "/ops/");
        assert_eq!(ops.managed_policies.len(), 1);
        assert!(ops.inline_policies["s3"].is_object());

        let alice = &loaded.desired.identities["alice"];
        assert_eq!(alice.groups, vec!["Ops".to_string()]);
        assert_eq!(alice.create_key, Flag::Yes);
        assert_eq!(alice.has_console_access, Flag::No);
        assert_eq!(alice.path, "/staff/");
    }

    #[test]
    fn test_bare_string_identity_gets_defaults() {
        let doc = json!({ "users": { "dave": "admin" } });
        let loaded = load_value(&doc).unwrap();

        assert_eq!(loaded.desired.identities["dave"], IdentitySpec::default());
        assert_eq!(loaded.diagnostics.len(), 1);
        assert_eq!(loaded.diagnostics[0].entity, EntityKey::identity("dave"));
    }

    #[test]
    fn test_missing_fields_default() {
        let loaded = load_value(&json!({ "users": { "erin": {} } })).unwrap();
        let erin = &loaded.desired.identities["erin"];
        assert_eq!(erin.path, "/");
        assert!(erin.groups.is_empty());
        assert_eq!(erin.create_key, Flag::No);
    }

    #[test]
    fn test_top_level_not_a_mapping_is_malformed() {
        let err = load_value(&json!(["alice", "bob"])).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Malformed);

        let err = load_str("not json at all", Format::Json).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Malformed);
    }

    #[test]
    fn test_malformed_section_keeps_the_rest() {
        let loaded = load_value(&json!({ "groups": { "Ops": {} }, "users": ["alice"] })).unwrap();
        assert!(loaded.desired.groups.contains_key("Ops"));
        assert!(loaded.desired.identities.is_empty());
        assert_eq!(loaded.diagnostics.len(), 1);
        assert_eq!(loaded.diagnostics[0].entity.kind, EntityKind::Identity);
        assert!(loaded.diagnostics[0].message.contains("found a list"));

        let loaded = load_value(&json!({ "groups": 7, "users": "{not json" })).unwrap();
        assert!(loaded.desired.is_empty());
        assert_eq!(loaded.diagnostics.len(), 2);
        assert!(loaded.diagnostics[1].message.contains("not valid JSON"));
    }

    #[test]
    fn test_users_section_as_json_string() {
        let doc = json!({ "users": "{\"frank\": {\"groups\": [\"Dev\"]}}" });
        let loaded = load_value(&doc).unwrap();
        assert_eq!(loaded.desired.identities["frank"].groups, vec!["Dev".to_string()]);
    }

    #[test]
    fn test_identities_alias() {
        let loaded = load_value(&json!({ "identities": { "gina": {} } })).unwrap();
        assert!(loaded.desired.identities.contains_key("gina"));
    }

    #[test]
    fn test_flags_accept_bools_and_reject_garbage() {
        let doc = json!({
            "users": {
                "hal": { "create_key": true, "has_console_access": "perhaps" }
            }
        });
        let loaded = load_value(&doc).unwrap();
        let hal = &loaded.desired.identities["hal"];
        assert_eq!(hal.create_key, Flag::Yes);
        assert_eq!(hal.has_console_access, Flag::No);
        assert_eq!(loaded.diagnostics.len(), 1);
    }

    #[test]
    fn test_customer_managed_policies_folded_in() {
        let doc = json!({
            "groups": {
                "Dev": {
                    "managed_policies": ["arn:aws:iam::aws:policy/ReadOnlyAccess"],
                    "customer_managed_policies": [
                        { "policy_name": "Deploy", "policy_arn": "arn:aws:iam::123456789012:policy/Deploy" }
                    ]
                }
            }
        });
        let loaded = load_value(&doc).unwrap();
        assert_eq!(
            loaded.desired.groups["Dev"].managed_policies,
            vec![
                "arn:aws:iam::aws:policy/ReadOnlyAccess".to_string(),
                "arn:aws:iam::123456789012:policy/Deploy".to_string(),
            ]
        );
    }

    #[test]
    fn test_inline_document_as_string() {
        let doc = json!({
            "groups": { "Dev": { "inline_policies": { "p": "{\"Version\":\"2012-10-17\"}" } } }
        });
        let loaded = load_value(&doc).unwrap();
        assert_eq!(
            loaded.desired.groups["Dev"].inline_policies["p"],
            json!({ "Version": "2012-10-17" })
        );
    }

    #[test]
    fn test_insertion_order_preserved() {
        let text = r#"{"users": {"zed": {}, "amy": {}, "mo": {}}}"#;
        let loaded = load_str(text, Format::Json).unwrap();
        let names: Vec<_> = loaded.desired.identities.keys().cloned().collect();
        assert_eq!(names, vec!["zed", "amy", "mo"]);
    }

    #[test]
    fn test_load_toml() {
        let text = r#"
[groups.Ops]
managed_policy_arns = ["arn:aws:iam::aws:policy/ReadOnlyAccess"]

[users.alice]
groups = ["Ops"]
create_key = "yes"
"#;
        let loaded = load_str(text, Format::Toml).unwrap();
        assert!(loaded.desired.groups.contains_key("Ops"));
        assert_eq!(loaded.desired.identities["alice"].create_key, Flag::Yes);
    }

    #[test]
    fn test_render_then_load_keeps_state() {
        let doc = json!({
            "groups": { "Ops": { "path": "/ops/" } },
            "users": { "alice": { "groups": ["Ops"], "has_console_access": "yes" } }
        });
        let loaded = load_value(&doc).unwrap();
        let text = render(&loaded.desired, Format::Json).unwrap();
        let reloaded = load_str(&text, Format::Json).unwrap();
        assert_eq!(reloaded.desired, loaded.desired);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("desired.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("desired.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("desired")), Format::Json);
    }

    #[test]
    fn test_file_round_trip_keeps_format_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("desired.toml");

        let mut desired = DesiredState::default();
        desired.groups.insert("Ops".into(), GroupSpec::default());
        desired.groups.insert("Dev".into(), GroupSpec::default());
        write_file(&desired, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("path = \"/\""));

        let loaded = load_file(&path).unwrap();
        let names: Vec<_> = loaded.desired.groups.keys().cloned().collect();
        assert_eq!(names, vec!["Ops", "Dev"]);
        assert!(loaded.diagnostics.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
