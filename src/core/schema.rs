//! Standard attribute schemas for the server and scheduler objects

use crate::attribute::{ActionReason, AttrValue, Attribute, AttributeDef, Schema};
use crate::codec;
use crate::error::{Result, StateError};
use tracing::debug;

/// Default scheduling cycle, seconds
pub const DEFAULT_SCHED_CYCLE: i64 = 600;

/// Server attribute slots, in save order
pub fn server() -> Result<Schema> {
    Schema::new(server_defs()?)
}

/// Scheduler attribute slots, in save order
pub fn scheduler() -> Result<Schema> {
    Schema::new(scheduler_defs()?)
}

fn server_defs() -> Result<Vec<AttributeDef>> {
    Ok(vec![
        AttributeDef::new("scheduling", codec::boolean())?
            .with_default(AttrValue::Boolean(true))?,
        AttributeDef::new("max_running", codec::long())?,
        AttributeDef::new("max_jobs", codec::long())?,
        AttributeDef::new("default_queue", codec::string())?,
        AttributeDef::new("comment", codec::string())?,
        AttributeDef::new("managers", codec::acl())?.with_action(check_acl),
        AttributeDef::new("operators", codec::acl())?.with_action(check_acl),
        AttributeDef::new("acl_host_enable", codec::boolean())?
            .with_default(AttrValue::Boolean(false))?,
        AttributeDef::new("acl_hosts", codec::acl())?.with_action(check_acl),
        AttributeDef::new("acl_users", codec::acl())?.with_action(check_acl),
        AttributeDef::new("acl_roots", codec::acl())?.with_action(check_acl),
        AttributeDef::new("resources_available", codec::resource())?,
        AttributeDef::new("resources_default", codec::resource())?,
    ])
}

fn scheduler_defs() -> Result<Vec<AttributeDef>> {
    Ok(vec![
        AttributeDef::new("sched_host", codec::string())?,
        AttributeDef::new("sched_cycle_length", codec::long())?
            .with_default(AttrValue::Long(DEFAULT_SCHED_CYCLE))?,
        AttributeDef::new("scheduling", codec::boolean())?
            .with_default(AttrValue::Boolean(true))?,
        AttributeDef::new("comment", codec::string())?,
        AttributeDef::new("sched_priv", codec::string())?,
        AttributeDef::new("sched_log", codec::string())?,
    ])
}

/// Post-set check for ACL slots
///
/// Entries are `[+|-]user[@host]`; whitespace inside an entry or an empty
/// user or host part is rejected.
pub fn check_acl(attr: &mut Attribute, owner: &str, reason: ActionReason) -> Result<()> {
    let AttrValue::Acl(entries) = attr.value() else {
        return Ok(());
    };

    for entry in entries {
        let body = entry.trim_start_matches(['+', '-']);
        let (user, host) = match body.split_once('@') {
            Some((user, host)) => (user, Some(host)),
            None => (body, None),
        };
        let bad = user.is_empty()
            || user.chars().any(char::is_whitespace)
            || host.is_some_and(|h| h.is_empty() || h.chars().any(char::is_whitespace));
        if bad {
            return Err(StateError::Config(format!(
                "malformed ACL entry {:?} on {}",
                entry, owner
            )));
        }
    }

    debug!(
        "ACL on {} checked ({} entries, {:?})",
        owner,
        entries.len(),
        reason
    );
    Ok(())
}
