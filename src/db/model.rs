use crate::model::{MovementKind, MovementReason, Timestamp};
use serde::{Deserialize, Serialize};

/// Local mirror of a remote inventory item. `current_stock` stays >= 0,
/// also after optimistic adjustments; the store clamps on write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub unit: String,
    pub cost_per_unit: f64,
    pub current_stock: f64,
    pub min_threshold: f64,
    pub restaurant_id: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A queued stock movement awaiting (or past) remote confirmation.
///
/// `seq` is the replay order assigned by the store. `synced` transitions
/// false -> true exactly once; rows are never deleted locally. A row whose
/// `dead` flag is set has exhausted its attempt limit and is excluded
/// from replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineTransaction {
    pub seq: i64,
    pub local_id: String,
    pub item_id: String,
    pub kind: MovementKind,
    pub quantity: f64,
    pub reason: MovementReason,
    pub note: Option<String>,
    pub user_id: String,
    pub restaurant_id: String,
    pub created_at: Timestamp,
    pub synced: bool,
    pub attempts: i64,
    pub dead: bool,
}
