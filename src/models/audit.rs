//! Audit log models.
//!
//! Every lifecycle-affecting operation appends one [`AuditLogEntry`]. Entries
//! are never updated or deleted; the `audit_log` table rejects both with a
//! trigger.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle event recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    /// A key was issued.
    Create,
    /// A key was redeemed.
    Verify,
    /// A key was revoked by its creator.
    Revoke,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Verify => "VERIFY",
            AuditAction::Revoke => "REVOKE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "VERIFY" => Ok(AuditAction::Verify),
            "REVOKE" => Ok(AuditAction::Revoke),
            other => Err(format!("Unknown audit action '{other}'")),
        }
    }
}

impl TryFrom<String> for AuditAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Represents an audit log row from the database.
///
/// # Database Table
///
/// Maps to the `audit_log` table. `key_identifier` refers to a key by value
/// only; the key row may since have been revoked or swept.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,

    #[sqlx(try_from = "String")]
    pub action: AuditAction,

    pub key_identifier: String,

    /// Principal that triggered the action
    ///
    /// The creator for CREATE and REVOKE, the service itself for VERIFY
    /// (the redeemer is not a principal of the issuing system).
    pub actor_id: String,

    pub actor_name: String,

    /// Only set for VERIFY
    pub redeemer_name: Option<String>,

    /// Write time, set by the store
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,

    pub details: String,
}

/// Audit entry to be appended. The store assigns `id` and the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub key_identifier: String,
    pub actor_id: String,
    pub actor_name: String,
    pub redeemer_name: Option<String>,
    pub details: String,
}

impl NewAuditEntry {
    /// Converts into a stored entry with the given id and write time.
    pub fn into_entry(self, id: Uuid, created_at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id,
            action: self.action,
            key_identifier: self.key_identifier,
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            redeemer_name: self.redeemer_name,
            created_at,
            details: self.details,
        }
    }
}
