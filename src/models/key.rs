//! Access key data models and API request/response types.
//!
//! This module defines:
//! - `Key`: Database entity representing a single-use access key
//! - `DurationClass` / `DurationTable`: how issuance turns a class into an expiry
//! - `KeyFilter` / `KeyState`: list filters and the derived lifecycle state
//! - Request and response bodies for the key endpoints

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Represents a key record from the database.
///
/// # Database Table
///
/// Maps to the `keys` table. Each key:
/// - Is identified by an opaque, generated `identifier`
/// - Belongs to the principal that issued it (`creator_id`)
/// - Expires at a fixed instant computed once at issuance
/// - Can be consumed exactly once
///
/// # Derived State
///
/// Whether a key is active or expired is not stored. It is recomputed from
/// `consumed` and `expires_at` at read time, see [`Key::state_at`].
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Key {
    /// Opaque identifier handed to the creator and presented by the redeemer
    pub identifier: String,

    /// Stable id of the issuing principal (used for ownership checks)
    pub creator_id: String,

    /// Display name of the issuing principal at issuance time
    pub creator_name: String,

    /// Handle of the issuing principal at issuance time
    pub creator_handle: String,

    /// When the key was issued
    pub created_at: DateTime<Utc>,

    /// Absolute expiry instant
    ///
    /// The key can be redeemed only while `expires_at > now`.
    pub expires_at: DateTime<Utc>,

    /// Human-readable duration class, e.g. "7 days"
    ///
    /// Informational only. Expiry math uses `expires_at`.
    pub duration_label: String,

    /// Whether the key has been redeemed
    ///
    /// Goes from false to true exactly once and never back.
    pub consumed: bool,

    /// Name given by the redeemer, set at consumption
    pub redeemer_name: Option<String>,

    /// External id of the redeemer, set at consumption
    pub redeemer_external_id: Option<String>,

    /// When the key was consumed
    ///
    /// Non-null iff `consumed` is true (enforced by a CHECK constraint).
    pub consumed_at: Option<DateTime<Utc>>,

    /// Free text supplied by the creator at issuance
    pub notes: Option<String>,
}

impl Key {
    /// Derives the lifecycle state of this key at `now`.
    ///
    /// Consumption freezes the state: a consumed key stays `Consumed` even
    /// after its expiry passes.
    pub fn state_at(&self, now: DateTime<Utc>) -> KeyState {
        if self.consumed {
            KeyState::Consumed
        } else if self.expires_at <= now {
            KeyState::Expired
        } else {
            KeyState::Active
        }
    }

    /// Whether this key matches a list filter at `now`.
    pub fn matches(&self, filter: KeyFilter, now: DateTime<Utc>) -> bool {
        match filter {
            KeyFilter::All => true,
            KeyFilter::Active => self.state_at(now) == KeyState::Active,
            KeyFilter::Consumed => self.consumed,
            KeyFilter::Expired => self.state_at(now) == KeyState::Expired,
        }
    }
}

/// Lifecycle state of a key as seen by callers.
///
/// `Revoked` has no variant here: a revoked key is deleted and reads as not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Exists, unconsumed, unexpired
    Active,
    /// Redeemed; terminal
    Consumed,
    /// Unconsumed and past expiry; terminal
    Expired,
}

/// Filter used by list and count queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFilter {
    /// Every stored key
    #[default]
    All,
    /// Unconsumed and unexpired
    Active,
    /// Consumed, regardless of expiry
    Consumed,
    /// Unconsumed and past expiry
    Expired,
}

/// Duration classes recognised at issuance.
///
/// Each class resolves to a fixed offset from issuance time through a
/// [`DurationTable`]. `Permanent` is a long but finite offset so expiry
/// comparisons never need a null case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationClass {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    OneWeek,
    #[serde(rename = "30d")]
    OneMonth,
    #[serde(rename = "365d")]
    OneYear,
    #[serde(rename = "permanent")]
    Permanent,
}

impl DurationClass {
    /// Wire name of this class, as accepted by the issue endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            DurationClass::OneHour => "1h",
            DurationClass::OneDay => "24h",
            DurationClass::OneWeek => "7d",
            DurationClass::OneMonth => "30d",
            DurationClass::OneYear => "365d",
            DurationClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for DurationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offset and display label for one duration class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationEntry {
    pub offset: Duration,
    pub label: String,
}

/// Mapping from duration class to expiry offset.
///
/// This is configuration, not business logic: entries may be replaced with
/// [`DurationTable::with_entry`] without touching the key state machine.
#[derive(Debug, Clone)]
pub struct DurationTable {
    entries: HashMap<DurationClass, DurationEntry>,
}

impl Default for DurationTable {
    fn default() -> Self {
        let entries = [
            (DurationClass::OneHour, Duration::hours(1), "1 hour"),
            (DurationClass::OneDay, Duration::hours(24), "24 hours"),
            (DurationClass::OneWeek, Duration::days(7), "7 days"),
            (DurationClass::OneMonth, Duration::days(30), "30 days"),
            (DurationClass::OneYear, Duration::days(365), "365 days"),
            (DurationClass::Permanent, Duration::days(36_500), "Permanent"),
        ]
        .into_iter()
        .map(|(class, offset, label)| {
            (
                class,
                DurationEntry {
                    offset,
                    label: label.to_string(),
                },
            )
        })
        .collect();

        Self { entries }
    }
}

impl DurationTable {
    /// Replaces the offset and label for one class.
    pub fn with_entry(mut self, class: DurationClass, offset: Duration, label: &str) -> Self {
        self.entries.insert(
            class,
            DurationEntry {
                offset,
                label: label.to_string(),
            },
        );
        self
    }

    /// Withdraws a class; issuing with it is then rejected.
    pub fn without(mut self, class: DurationClass) -> Self {
        self.entries.remove(&class);
        self
    }

    /// Looks up the entry for a class.
    pub fn entry(&self, class: DurationClass) -> Option<&DurationEntry> {
        self.entries.get(&class)
    }

    /// Computes `(expires_at, label)` for a key issued at `issued_at`.
    ///
    /// Returns `None` if the class has no entry or the offset overflows.
    pub fn resolve(
        &self,
        class: DurationClass,
        issued_at: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, String)> {
        let entry = self.entry(class)?;
        let expires_at = issued_at.checked_add_signed(entry.offset)?;
        Some((expires_at, entry.label.clone()))
    }
}

/// A key together with its derived state, returned by status checks.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatusView {
    pub state: KeyState,
    #[serde(flatten)]
    pub key: Key,
}

/// Key counts returned by the stats endpoint.
///
/// Each count is computed independently, so under concurrent writes the
/// parts may not add up to `total` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    pub total: i64,
    pub used: i64,
    pub valid: i64,
    pub expired: i64,
}

/// Request body for issuing a new key.
///
/// # JSON Example
///
/// ```json
/// {
///   "creator_id": "318204961234567890",
///   "creator_name": "Ada",
///   "creator_handle": "ada#0001",
///   "duration": "7d",
///   "notes": "contractor onboarding"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub creator_id: String,
    pub creator_name: String,
    pub creator_handle: String,
    pub duration: DurationClass,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for redeeming a key.
#[derive(Debug, Deserialize)]
pub struct VerifyKeyRequest {
    pub identifier: String,
    pub redeemer_name: String,
    pub redeemer_external_id: String,
}

/// Why a verify call was or was not granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyReason {
    Granted,
    NotFound,
    AlreadyUsed,
    Expired,
}

/// Key metadata returned to the verifying party on a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub identifier: String,
    pub creator_id: String,
    pub creator_name: String,
    pub creator_handle: String,
    pub duration_label: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl From<&Key> for KeyMetadata {
    fn from(key: &Key) -> Self {
        Self {
            identifier: key.identifier.clone(),
            creator_id: key.creator_id.clone(),
            creator_name: key.creator_name.clone(),
            creator_handle: key.creator_handle.clone(),
            duration_label: key.duration_label.clone(),
            created_at: key.created_at,
            expires_at: key.expires_at,
            notes: key.notes.clone(),
        }
    }
}

/// Result of a verify call. Every call resolves to exactly one reason.
///
/// # JSON Example
///
/// ```json
/// {
///   "granted": false,
///   "reason": "already_used"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub granted: bool,
    pub reason: VerifyReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyMetadata>,
}

impl VerifyResponse {
    /// A refused verification carrying no key data.
    pub fn denied(reason: VerifyReason) -> Self {
        Self {
            granted: false,
            reason,
            key: None,
        }
    }

    /// A granted verification for the key that was just consumed.
    pub fn granted(key: &Key) -> Self {
        Self {
            granted: true,
            reason: VerifyReason::Granted,
            key: Some(key.into()),
        }
    }
}

/// Request body for revoking a key.
#[derive(Debug, Deserialize)]
pub struct RevokeKeyRequest {
    pub requester_id: String,
}

/// Query parameters for listing keys.
#[derive(Debug, Default, Deserialize)]
pub struct ListKeysQuery {
    #[serde(default)]
    pub filter: KeyFilter,
    pub limit: Option<i64>,
}

/// Query parameters for listing the requester's own keys.
#[derive(Debug, Deserialize)]
pub struct ListMineQuery {
    pub requester_id: String,
}
