//! Real IAM backend using `aws` CLI commands.
//!
//! Every call runs `aws <service> <command> --output json`; the CLI handles
//! authentication, region resolution and pagination.

use crate::backend::Authority;
use crate::error::{Error, Result};
use crate::secret::Secret;
use crate::types::{
    CallerIdentity, Credential, CredentialStatus, GroupRecord, IdentityRecord,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

/// Backend that executes real `aws` commands.
pub struct AwsCliBackend {
    /// Path to the aws executable
    aws_path: PathBuf,
    /// Named profile passed as `--profile`
    profile: Option<String>,
    /// Region passed as `--region`
    region: Option<String>,
}

impl AwsCliBackend {
    /// Create a new AwsCliBackend.
    ///
    /// Returns an error if the AWS CLI is not installed.
    pub fn new() -> Result<Self> {
        let aws_path = which::which("aws").map_err(|_| Error::AwsCliNotFound)?;
        Ok(Self {
            aws_path,
            profile: None,
            region: None,
        })
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    fn command(&self, service: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.aws_path);
        cmd.arg(service).args(args).args(["--output", "json"]);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }
        cmd.env("AWS_PAGER", "");
        cmd
    }

    /// Run an aws command and return raw output.
    fn run_aws(&self, service: &str, args: &[&str], stdin: Option<&str>) -> Result<Output> {
        let mut cmd = self.command(service, args);
        let spawn_err = |e: std::io::Error| Error::CommandFailed {
            message: format!("failed to execute aws: {e}"),
            stderr: String::new(),
        };

        let Some(input) = stdin else {
            return cmd.output().map_err(spawn_err);
        };

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())?;
        }
        Ok(child.wait_with_output()?)
    }

    /// Run an aws command, check for success and parse its JSON output.
    ///
    /// Commands that print nothing on success yield `Value::Null`.
    fn run_aws_checked(
        &self,
        service: &str,
        args: &[&str],
        entity: Option<&str>,
        stdin: Option<&str>,
    ) -> Result<Value> {
        let output = self.run_aws(service, args, stdin)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_aws_output(&stderr, entity));
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn iam(&self, args: &[&str], entity: Option<&str>) -> Result<Value> {
        self.run_aws_checked("iam", args, entity, None)
    }
}

impl Authority for AwsCliBackend {
    fn caller_identity(&self) -> Result<CallerIdentity> {
        let json = self
            .run_aws_checked("sts", &["get-caller-identity"], None, None)
            .map_err(|e| Error::Connectivity {
                message: e.to_string(),
            })?;
        Ok(parse_caller_identity(&json))
    }

    fn list_groups(&self) -> Result<Vec<GroupRecord>> {
        let json = self.iam(&["list-groups"], None)?;
        Ok(parse_group_records(&json))
    }

    fn list_identities(&self) -> Result<Vec<IdentityRecord>> {
        let json = self.iam(&["list-users"], None)?;
        Ok(parse_identity_records(&json))
    }

    fn list_attached_group_policies(&self, group: &str) -> Result<Vec<String>> {
        let json = self.iam(
            &["list-attached-group-policies", "--group-name", group],
            Some(group),
        )?;
        Ok(string_field_list(&json["AttachedPolicies"], "PolicyArn"))
    }

    fn list_group_policy_names(&self, group: &str) -> Result<Vec<String>> {
        let json = self.iam(&["list-group-policies", "--group-name", group], Some(group))?;
        Ok(string_list(&json["PolicyNames"]))
    }

    fn get_group_policy(&self, group: &str, policy_name: &str) -> Result<Value> {
        let json = self.iam(
            &[
                "get-group-policy",
                "--group-name",
                group,
                "--policy-name",
                policy_name,
            ],
            Some(group),
        )?;
        Ok(normalize_policy_document(&json["PolicyDocument"]))
    }

    fn list_groups_for_identity(&self, identity: &str) -> Result<Vec<String>> {
        let json = self.iam(&["list-groups-for-user", "--user-name", identity], Some(identity))?;
        Ok(string_field_list(&json["Groups"], "GroupName"))
    }

    fn has_login_profile(&self, identity: &str) -> Result<bool> {
        match self.iam(&["get-login-profile", "--user-name", identity], Some(identity)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_access_keys(&self, identity: &str) -> Result<Vec<Credential>> {
        let json = self.iam(&["list-access-keys", "--user-name", identity], Some(identity))?;
        Ok(parse_access_keys(&json))
    }

    fn create_group(&self, group: &str, path: &str) -> Result<()> {
        self.iam(&["create-group", "--group-name", group, "--path", path], Some(group))?;
        Ok(())
    }

    fn create_identity(&self, identity: &str, path: &str) -> Result<()> {
        self.iam(&["create-user", "--user-name", identity, "--path", path], Some(identity))?;
        Ok(())
    }

    fn attach_group_policy(&self, group: &str, policy_arn: &str) -> Result<()> {
        self.iam(
            &[
                "attach-group-policy",
                "--group-name",
                group,
                "--policy-arn",
                policy_arn,
            ],
            Some(group),
        )?;
        Ok(())
    }

    fn put_group_policy(&self, group: &str, policy_name: &str, document: &Value) -> Result<()> {
        let document = serde_json::to_string(document)?;
        self.iam(
            &[
                "put-group-policy",
                "--group-name",
                group,
                "--policy-name",
                policy_name,
                "--policy-document",
                &document,
            ],
            Some(group),
        )?;
        Ok(())
    }

    fn add_identity_to_group(&self, identity: &str, group: &str) -> Result<()> {
        self.iam(
            &["add-user-to-group", "--user-name", identity, "--group-name", group],
            Some(identity),
        )?;
        Ok(())
    }

    fn create_access_key(&self, identity: &str) -> Result<(String, Secret)> {
        let json = self.iam(&["create-access-key", "--user-name", identity], Some(identity))?;
        parse_created_access_key(&json).ok_or_else(|| Error::CommandFailed {
            message: format!("create-access-key for {identity} returned no key"),
            stderr: String::new(),
        })
    }

    fn create_login_profile(
        &self,
        identity: &str,
        password: &str,
        password_reset_required: bool,
    ) -> Result<()> {
        // Passed on stdin so the password never appears in argv.
        let input = json!({
            "UserName": identity,
            "Password": password,
            "PasswordResetRequired": password_reset_required,
        })
        .to_string();
        self.run_aws_checked(
            "iam",
            &["create-login-profile", "--cli-input-json", "file:///dev/stdin"],
            Some(identity),
            Some(&input),
        )?;
        Ok(())
    }

    fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()> {
        self.iam(
            &[
                "delete-access-key",
                "--user-name",
                identity,
                "--access-key-id",
                access_key_id,
            ],
            Some(identity),
        )?;
        Ok(())
    }

    fn remove_identity_from_group(&self, identity: &str, group: &str) -> Result<()> {
        self.iam(
            &["remove-user-from-group", "--user-name", identity, "--group-name", group],
            Some(identity),
        )?;
        Ok(())
    }

    fn delete_identity(&self, identity: &str) -> Result<()> {
        match self.iam(&["delete-login-profile", "--user-name", identity], Some(identity)) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        for key in self.list_access_keys(identity)? {
            self.delete_access_key(identity, &key.id)?;
        }
        for group in self.list_groups_for_identity(identity)? {
            self.remove_identity_from_group(identity, &group)?;
        }

        let attached = self.iam(
            &["list-attached-user-policies", "--user-name", identity],
            Some(identity),
        )?;
        for arn in string_field_list(&attached["AttachedPolicies"], "PolicyArn") {
            self.iam(
                &["detach-user-policy", "--user-name", identity, "--policy-arn", &arn],
                Some(identity),
            )?;
        }
        let inline = self.iam(&["list-user-policies", "--user-name", identity], Some(identity))?;
        for policy_name in string_list(&inline["PolicyNames"]) {
            self.iam(
                &["delete-user-policy", "--user-name", identity, "--policy-name", &policy_name],
                Some(identity),
            )?;
        }

        log::debug!("deleting identity {identity}");
        self.iam(&["delete-user", "--user-name", identity], Some(identity))?;
        Ok(())
    }
}

// =============================================================================
// Output parsing
// =============================================================================

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn string_field_list(value: &Value, field: &str) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v[field].as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_caller_identity(json: &Value) -> CallerIdentity {
    CallerIdentity {
        account: json["Account"].as_str().unwrap_or_default().to_string(),
        arn: json["Arn"].as_str().unwrap_or_default().to_string(),
    }
}

fn parse_group_records(json: &Value) -> Vec<GroupRecord> {
    let empty = Vec::new();
    json["Groups"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|g| {
            Some(GroupRecord {
                name: g["GroupName"].as_str()?.to_string(),
                path: g["Path"].as_str().unwrap_or("/").to_string(),
                arn: g["Arn"].as_str().map(ToString::to_string),
                created_at: parse_time(&g["CreateDate"]),
            })
        })
        .collect()
}

fn parse_identity_records(json: &Value) -> Vec<IdentityRecord> {
    let empty = Vec::new();
    json["Users"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|u| {
            Some(IdentityRecord {
                name: u["UserName"].as_str()?.to_string(),
                path: u["Path"].as_str().unwrap_or("/").to_string(),
                arn: u["Arn"].as_str().map(ToString::to_string),
            })
        })
        .collect()
}

fn parse_access_keys(json: &Value) -> Vec<Credential> {
    let empty = Vec::new();
    json["AccessKeyMetadata"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|k| {
            let status = match k["Status"].as_str() {
                Some("Active") => CredentialStatus::Active,
                _ => CredentialStatus::Inactive,
            };
            Some(Credential {
                id: k["AccessKeyId"].as_str()?.to_string(),
                status,
                created_at: parse_time(&k["CreateDate"]),
            })
        })
        .collect()
}

fn parse_created_access_key(json: &Value) -> Option<(String, Secret)> {
    let key = &json["AccessKey"];
    let id = key["AccessKeyId"].as_str()?;
    let secret = key["SecretAccessKey"].as_str()?;
    Some((id.to_string(), Secret::new(secret)))
}

/// Policy documents come back as a JSON object or, from some CLI versions,
/// as a URL-encoded JSON string.
fn normalize_policy_document(value: &Value) -> Value {
    match value {
        Value::String(text) => {
            let decoded = urlencoding::decode(text).map_or_else(|_| text.clone(), Cow::into_owned);
            serde_json::from_str(&decoded).unwrap_or_else(|_| Value::String(decoded))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_records() {
        let json = json!({
            "Groups": [
                {
                    "Path": "/",
                    "GroupName": "Admins",
                    "GroupId": "AGPA1",
                    "Arn": "arn:aws:iam::123456789012:group/Admins",
                    "CreateDate": "2023-04-01T12:00:00+00:00"
                },
                { "Path": "/ops/", "GroupName": "Ops" }
            ]
        });
        let groups = parse_group_records(&json);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Admins");
        assert!(groups[0].created_at.is_some());
        assert_eq!(groups[1].path, "/ops/");
        assert!(groups[1].arn.is_none());
    }

    #[test]
    fn test_parse_identity_records_skips_nameless() {
        let json = json!({ "Users": [ { "UserName": "alice", "Path": "/" }, { "Path": "/" } ] });
        let users = parse_identity_records(&json);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "alice");
    }

    #[test]
    fn test_parse_access_keys() {
        let json = json!({
            "AccessKeyMetadata": [
                { "AccessKeyId": "AKIA1", "Status": "Active", "CreateDate": "2024-01-01T00:00:00Z" },
                { "AccessKeyId": "AKIA2", "Status": "Inactive" }
            ]
        });
        let keys = parse_access_keys(&json);
        assert_eq!(keys.len(), 2);
        assert!(keys[0].is_active());
        assert!(!keys[1].is_active());
    }

    #[test]
    fn test_parse_created_access_key() {
        let json = json!({
            "AccessKey": { "AccessKeyId": "AKIA9", "SecretAccessKey": "s3cr3t", "Status": "Active" }
        });
        let (id, secret) = parse_created_access_key(&json).unwrap();
        assert_eq!(id, "AKIA9");
        assert_eq!(secret.expose(), "s3cr3t");
        assert!(parse_created_access_key(&json!({})).is_none());
    }

    #[test]
    fn test_string_field_list() {
        let json = json!({
            "AttachedPolicies": [
                { "PolicyName": "ReadOnlyAccess", "PolicyArn": "arn:aws:iam::aws:policy/ReadOnlyAccess" }
            ]
        });
        assert_eq!(
            string_field_list(&json["AttachedPolicies"], "PolicyArn"),
            vec!["arn:aws:iam::aws:policy/ReadOnlyAccess".to_string()]
        );
        assert!(string_field_list(&Value::Null, "PolicyArn").is_empty());
    }

    #[test]
    fn test_normalize_policy_document() {
        let object = json!({ "Version": "2012-10-17" });
        assert_eq!(normalize_policy_document(&object), object);

        let encoded = Value::String("%7B%22Version%22%3A%222012-10-17%22%7D".into());
        assert_eq!(normalize_policy_document(&encoded), object);

        let plain = Value::String("{\"Version\":\"2012-10-17\"}".into());
        assert_eq!(normalize_policy_document(&plain), object);
        // not valid UTF-8 once decoded: kept as written
        let broken = Value::String("%FF%FE".into());
        assert_eq!(normalize_policy_document(&broken), broken);
    }

    #[test]
    fn test_parse_caller_identity() {
        let json = json!({ "UserId": "AIDA", "Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/ci" });
        let caller = parse_caller_identity(&json);
        assert_eq!(caller.account, "123456789012");
        assert!(caller.arn.ends_with("user/ci"));
    }
}
