//! Remote state reader.
//!
//! Builds a [`Snapshot`] from the authority: top-level listings first, then
//! a bounded parallel fan-out over groups and identities for their
//! sub-resources. A failed sub-lookup degrades only the entity it belongs
//! to; connectivity loss and failed top-level listings abort the read.

use crate::backend::Authority;
use crate::error::{Error, Result};
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::types::{GroupRecord, IdentityRecord, RemoteGroup, RemoteIdentity, Snapshot};
use rayon::prelude::*;

/// Options for reading the remote snapshot.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Worker-pool bound for per-entity lookups
    pub jobs: usize,
    /// Retry policy for throttled reads
    pub retry: RetryConfig,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Read the full remote snapshot.
pub fn read_snapshot(authority: &dyn Authority, options: &ReadOptions) -> Result<Snapshot> {
    let caller = authority.caller_identity().map_err(|e| match e {
        Error::Connectivity { .. } => e,
        other => Error::Connectivity {
            message: other.to_string(),
        },
    })?;
    log::info!("reading IAM state as {} (account {})", caller.arn, caller.account);

    let group_records = retrying(options, || authority.list_groups())?;
    let identity_records = retrying(options, || authority.list_identities())?;
    log::debug!(
        "found {} groups and {} identities",
        group_records.len(),
        identity_records.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()
        .map_err(|e| Error::Other(format!("failed to create reader pool: {e}")))?;

    let (groups, identities) = pool.install(|| {
        let groups = group_records
            .par_iter()
            .map(|record| read_group(authority, record, options))
            .collect::<Result<Vec<_>>>();
        let identities = identity_records
            .par_iter()
            .map(|record| read_identity(authority, record, options))
            .collect::<Result<Vec<_>>>();
        (groups, identities)
    });

    let mut snapshot = Snapshot::default();
    for (name, group) in groups? {
        snapshot.groups.insert(name, group);
    }
    for (name, identity) in identities? {
        snapshot.identities.insert(name, identity);
    }

    let degraded = snapshot.degraded();
    if !degraded.is_empty() {
        log::warn!("{} entities were read partially", degraded.len());
    }
    Ok(snapshot)
}

fn retrying<T>(options: &ReadOptions, op: impl FnMut() -> Result<T>) -> Result<T> {
    with_retry(&options.retry, Some(&LogCallback), op)
}

/// Absorb a sub-lookup failure into the entity's status, unless it is fatal.
fn absorb<T>(
    result: Result<T>,
    entity: &str,
    what: &str,
    failures: &mut Vec<String>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            let failure = Error::PartialRead {
                entity: entity.to_string(),
                message: format!("{what}: {e}"),
            };
            log::warn!("{failure}");
            failures.push(format!("{what}: {e}"));
            Ok(None)
        }
    }
}

fn read_group(
    authority: &dyn Authority,
    record: &GroupRecord,
    options: &ReadOptions,
) -> Result<(String, RemoteGroup)> {
    let name = record.name.as_str();
    let entity = format!("group/{name}");
    let mut failures = Vec::new();

    let mut group = RemoteGroup::new(record.path.clone());
    group.arn.clone_from(&record.arn);
    group.created_at = record.created_at;

    let attached = retrying(options, || authority.list_attached_group_policies(name));
    if let Some(policies) = absorb(attached, &entity, "list attached policies", &mut failures)? {
        group.managed_policies = policies;
    }

    let names = retrying(options, || authority.list_group_policy_names(name));
    if let Some(policy_names) = absorb(names, &entity, "list inline policies", &mut failures)? {
        for policy_name in policy_names {
            let document = retrying(options, || authority.get_group_policy(name, &policy_name));
            let what = format!("get inline policy {policy_name}");
            if let Some(document) = absorb(document, &entity, &what, &mut failures)? {
                group.inline_policies.insert(policy_name, document);
            }
        }
    }

    for failure in failures {
        group.status.record_failure(failure);
    }
    Ok((record.name.clone(), group))
}

fn read_identity(
    authority: &dyn Authority,
    record: &IdentityRecord,
    options: &ReadOptions,
) -> Result<(String, RemoteIdentity)> {
    let name = record.name.as_str();
    let entity = format!("identity/{name}");
    let mut failures = Vec::new();

    let mut identity = RemoteIdentity::new(record.path.clone());
    identity.arn.clone_from(&record.arn);

    let groups = retrying(options, || authority.list_groups_for_identity(name));
    if let Some(groups) = absorb(groups, &entity, "list groups", &mut failures)? {
        identity.groups = groups;
    }

    let login = retrying(options, || authority.has_login_profile(name));
    if let Some(has_login) = absorb(login, &entity, "get login profile", &mut failures)? {
        identity.has_login_capability = has_login;
    }

    let keys = retrying(options, || authority.list_access_keys(name));
    if let Some(credentials) = absorb(keys, &entity, "list access keys", &mut failures)? {
        identity.credentials = credentials;
    }

    for failure in failures {
        identity.status.record_failure(failure);
    }
    Ok((record.name.clone(), identity))
}
