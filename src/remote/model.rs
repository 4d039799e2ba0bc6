use crate::db::{CachedItem, OfflineTransaction};
use crate::model::{MovementKind, MovementReason, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory row as served by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub unit: String,
    #[serde(default)]
    pub cost_per_unit: f64,
    #[serde(default)]
    pub current_stock: f64,
    #[serde(default)]
    pub min_threshold: f64,
    pub restaurant_id: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RemoteItem {
    pub fn into_cached(self) -> CachedItem {
        CachedItem {
            id: self.id,
            name: self.name,
            category: self.category,
            unit: self.unit,
            cost_per_unit: self.cost_per_unit,
            current_stock: self.current_stock.max(0.0),
            min_threshold: self.min_threshold,
            restaurant_id: self.restaurant_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Stock movement row submitted on replay. Carries the core fields only:
/// the device-local identifier and synced flag never leave the device,
/// and the remote store assigns its own row id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovementRecord {
    pub item_id: String,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub quantity: f64,
    pub reason: MovementReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub user_id: String,
    pub restaurant_id: String,
    pub created_at: Timestamp,
}

impl StockMovementRecord {
    pub fn from_local(tx: &OfflineTransaction) -> Self {
        Self {
            item_id: tx.item_id.clone(),
            kind: tx.kind,
            quantity: tx.quantity,
            reason: tx.reason,
            notes: tx.note.clone(),
            user_id: tx.user_id.clone(),
            restaurant_id: tx.restaurant_id.clone(),
            created_at: tx.created_at,
        }
    }
}

/// The authenticated session user, resolved once at startup to scope all
/// remote reads and writes to one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub restaurant_id: String,
}
