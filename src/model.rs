use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    StockIn,
    StockOut,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::StockIn => "stock_in",
            MovementKind::StockOut => "stock_out",
        }
    }

    /// Parse a stored/wire value. Unknown strings are rejected, not coerced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock_in" => Some(MovementKind::StockIn),
            "stock_out" => Some(MovementKind::StockOut),
            _ => None,
        }
    }

    /// Signed stock delta for a movement of `quantity` in this direction.
    pub fn signed_delta(&self, quantity: f64) -> f64 {
        match self {
            MovementKind::StockIn => quantity,
            MovementKind::StockOut => -quantity,
        }
    }
}

/// Business reason attached to a stock movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Purchase,
    Sale,
    Damaged,
    Other,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Purchase => "purchase",
            MovementReason::Sale => "sale",
            MovementReason::Damaged => "damaged",
            MovementReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(MovementReason::Purchase),
            "sale" => Some(MovementReason::Sale),
            "damaged" => Some(MovementReason::Damaged),
            "other" => Some(MovementReason::Other),
            _ => None,
        }
    }
}

/// Input for recording a stock movement while offline. Identifier, synced
/// flag and creation timestamp are allocated by the sync manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockMovement {
    pub item_id: String,
    pub kind: MovementKind,
    pub quantity: f64,
    pub reason: MovementReason,
    pub note: Option<String>,
    pub user_id: String,
    pub restaurant_id: String,
}

/// Counts backing an "N movements not yet synced" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncBacklog {
    pub unsynced: u64,
    pub dead: u64,
}

/// Summary of one replay pass over the offline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: u64,
    pub synced: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

/// Timestamps are stored and exchanged as UTC.
pub type Timestamp = DateTime<Utc>;
