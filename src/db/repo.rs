use super::model::{CachedItem, OfflineTransaction};
use crate::model::{MovementKind, MovementReason, SyncBacklog};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Failures of the local persistence layer. Offline writes never fail
/// because the device is offline, only through one of these.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt {column} value in local store: {value:?}")]
    Corrupt { column: &'static str, value: String },
}

pub async fn init_pool(database_url: &str) -> Result<Pool, StorageError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability; the queue is an audit trail.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs and non-sqlite schemes
/// untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_inventory_items(pool: &Pool) -> Result<Vec<CachedItem>, StorageError> {
    let rows = sqlx::query(
        "SELECT id, name, category, unit, cost_per_unit, current_stock, min_threshold, \
                restaurant_id, created_at, updated_at \
         FROM cached_items ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// Clear the cache and insert the given set inside one transaction. A
/// failure rolls back to the prior contents; callers never observe a
/// partial replace.
#[instrument(skip_all)]
pub async fn replace_inventory_items(pool: &Pool, items: &[CachedItem]) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cached_items")
        .execute(&mut *tx)
        .await?;
    for item in items {
        sqlx::query(
            "INSERT INTO cached_items (id, name, category, unit, cost_per_unit, current_stock, \
                                       min_threshold, restaurant_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(&item.unit)
        .bind(item.cost_per_unit)
        .bind(item.current_stock.max(0.0))
        .bind(item.min_threshold)
        .bind(&item.restaurant_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Insert one queue row and return its replay sequence number.
#[instrument(skip_all)]
pub async fn append_transaction(
    pool: &Pool,
    tx: &OfflineTransaction,
) -> Result<i64, StorageError> {
    let rec = sqlx::query(
        "INSERT INTO offline_transactions (local_id, item_id, kind, quantity, reason, note, \
                                           user_id, restaurant_id, created_at, synced, attempts, dead) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0) RETURNING seq",
    )
    .bind(&tx.local_id)
    .bind(&tx.item_id)
    .bind(tx.kind.as_str())
    .bind(tx.quantity)
    .bind(tx.reason.as_str())
    .bind(&tx.note)
    .bind(&tx.user_id)
    .bind(&tx.restaurant_id)
    .bind(tx.created_at)
    .bind(tx.synced)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("seq"))
}

/// Pending rows in replay order (oldest first). Dead-lettered rows are
/// excluded.
#[instrument(skip_all)]
pub async fn get_unsynced_transactions(pool: &Pool) -> Result<Vec<OfflineTransaction>, StorageError> {
    let rows = sqlx::query(
        "SELECT seq, local_id, item_id, kind, quantity, reason, note, user_id, restaurant_id, \
                created_at, synced, attempts, dead \
         FROM offline_transactions WHERE synced = 0 AND dead = 0 ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(tx_from_row).collect()
}

/// Flip `synced` for at most one row. Unknown identifiers are a no-op,
/// not an error.
#[instrument(skip_all)]
pub async fn mark_transaction_synced(pool: &Pool, local_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE offline_transactions SET synced = 1 WHERE local_id = ?")
        .bind(local_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply a signed stock delta to a cached item, clamped at zero. The
/// read-modify-write happens inside the single UPDATE, so no other local
/// writer can interleave. Returns false when the item is not cached.
#[instrument(skip_all)]
pub async fn adjust_item_stock(pool: &Pool, item_id: &str, delta: f64) -> Result<bool, StorageError> {
    let res = sqlx::query(
        "UPDATE cached_items SET current_stock = MAX(0, current_stock + ?), updated_at = ? \
         WHERE id = ?",
    )
    .bind(delta)
    .bind(Utc::now())
    .bind(item_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Count one failed replay attempt. With a configured ceiling the row is
/// dead-lettered once `attempts` reaches it. Returns true when this call
/// moved the row to the dead list.
#[instrument(skip_all)]
pub async fn record_failed_attempt(
    pool: &Pool,
    local_id: &str,
    max_attempts: Option<u32>,
) -> Result<bool, StorageError> {
    let ceiling = max_attempts.map(i64::from).unwrap_or(0);
    let res = sqlx::query(
        "UPDATE offline_transactions \
         SET attempts = attempts + 1, \
             dead = CASE WHEN ?1 > 0 AND attempts + 1 >= ?1 THEN 1 ELSE dead END \
         WHERE local_id = ?2 AND synced = 0 AND dead = 0",
    )
    .bind(ceiling)
    .bind(local_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(false);
    }

    let dead: Option<bool> =
        sqlx::query_scalar("SELECT dead FROM offline_transactions WHERE local_id = ?")
            .bind(local_id)
            .fetch_optional(pool)
            .await?;
    Ok(dead.unwrap_or(false))
}

/// Dead-lettered rows in queue order.
#[instrument(skip_all)]
pub async fn get_dead_transactions(pool: &Pool) -> Result<Vec<OfflineTransaction>, StorageError> {
    let rows = sqlx::query(
        "SELECT seq, local_id, item_id, kind, quantity, reason, note, user_id, restaurant_id, \
                created_at, synced, attempts, dead \
         FROM offline_transactions WHERE dead = 1 ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(tx_from_row).collect()
}

#[instrument(skip_all)]
pub async fn count_backlog(pool: &Pool) -> Result<SyncBacklog, StorageError> {
    let unsynced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_transactions WHERE synced = 0 AND dead = 0")
            .fetch_one(pool)
            .await?;
    let dead: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_transactions WHERE dead = 1")
        .fetch_one(pool)
        .await?;
    Ok(SyncBacklog {
        unsynced: unsynced as u64,
        dead: dead as u64,
    })
}

#[instrument(skip_all)]
pub async fn get_transaction(
    pool: &Pool,
    local_id: &str,
) -> Result<Option<OfflineTransaction>, StorageError> {
    let row = sqlx::query(
        "SELECT seq, local_id, item_id, kind, quantity, reason, note, user_id, restaurant_id, \
                created_at, synced, attempts, dead \
         FROM offline_transactions WHERE local_id = ?",
    )
    .bind(local_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(tx_from_row).transpose()
}

fn item_from_row(row: &SqliteRow) -> Result<CachedItem, StorageError> {
    Ok(CachedItem {
        id: row.get("id"),
        name: row.get("name"),
        category: row.get("category"),
        unit: row.get("unit"),
        cost_per_unit: row.get("cost_per_unit"),
        current_stock: row.get("current_stock"),
        min_threshold: row.get("min_threshold"),
        restaurant_id: row.get("restaurant_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn tx_from_row(row: &SqliteRow) -> Result<OfflineTransaction, StorageError> {
    let kind_str: String = row.get("kind");
    let kind = MovementKind::parse(&kind_str).ok_or_else(|| StorageError::Corrupt {
        column: "kind",
        value: kind_str.clone(),
    })?;
    let reason_str: String = row.get("reason");
    let reason = MovementReason::parse(&reason_str).ok_or_else(|| StorageError::Corrupt {
        column: "reason",
        value: reason_str.clone(),
    })?;

    Ok(OfflineTransaction {
        seq: row.get("seq"),
        local_id: row.get("local_id"),
        item_id: row.get("item_id"),
        kind,
        quantity: row.get("quantity"),
        reason,
        note: row.get("note"),
        user_id: row.get("user_id"),
        restaurant_id: row.get("restaurant_id"),
        created_at: row.get("created_at"),
        synced: row.get("synced"),
        attempts: row.get("attempts"),
        dead: row.get("dead"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn item(id: &str, stock: f64) -> CachedItem {
        let now = Utc::now();
        CachedItem {
            id: id.to_string(),
            name: format!("item {id}"),
            category: "produce".into(),
            unit: "kg".into(),
            cost_per_unit: 2.5,
            current_stock: stock,
            min_threshold: 1.0,
            restaurant_id: "rest-1".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn movement(local_id: &str, item_id: &str, kind: MovementKind, qty: f64) -> OfflineTransaction {
        OfflineTransaction {
            seq: 0,
            local_id: local_id.to_string(),
            item_id: item_id.to_string(),
            kind,
            quantity: qty,
            reason: MovementReason::Purchase,
            note: None,
            user_id: "user-1".into(),
            restaurant_id: "rest-1".into(),
            created_at: Utc::now(),
            synced: false,
            attempts: 0,
            dead: false,
        }
    }

    #[tokio::test]
    async fn replace_is_all_or_nothing() {
        let pool = setup_pool().await;
        replace_inventory_items(&pool, &[item("a", 5.0), item("b", 3.0)])
            .await
            .unwrap();
        assert_eq!(get_inventory_items(&pool).await.unwrap().len(), 2);

        // Replacing discards everything previously cached.
        replace_inventory_items(&pool, &[item("c", 9.0)]).await.unwrap();
        let items = get_inventory_items(&pool).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "c");

        replace_inventory_items(&pool, &[]).await.unwrap();
        assert!(get_inventory_items(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjust_clamps_at_zero_and_adds_exactly() {
        let pool = setup_pool().await;
        replace_inventory_items(&pool, &[item("a", 10.0)]).await.unwrap();

        assert!(adjust_item_stock(&pool, "a", -15.0).await.unwrap());
        let items = get_inventory_items(&pool).await.unwrap();
        assert_eq!(items[0].current_stock, 0.0);

        assert!(adjust_item_stock(&pool, "a", 7.5).await.unwrap());
        let items = get_inventory_items(&pool).await.unwrap();
        assert_eq!(items[0].current_stock, 7.5);

        // Unknown items are tolerated as a no-op.
        assert!(!adjust_item_stock(&pool, "ghost", 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn queue_preserves_insertion_order() {
        let pool = setup_pool().await;
        for id in ["t1", "t2", "t3"] {
            append_transaction(&pool, &movement(id, "a", MovementKind::StockOut, 1.0))
                .await
                .unwrap();
        }

        let pending = get_unsynced_transactions(&pool).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|t| t.local_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn mark_synced_removes_from_pending_and_tolerates_unknown() {
        let pool = setup_pool().await;
        append_transaction(&pool, &movement("t1", "a", MovementKind::StockIn, 2.0))
            .await
            .unwrap();

        mark_transaction_synced(&pool, "t1").await.unwrap();
        assert!(get_unsynced_transactions(&pool).await.unwrap().is_empty());
        let stored = get_transaction(&pool, "t1").await.unwrap().unwrap();
        assert!(stored.synced);

        // Unknown id: no error, no effect.
        mark_transaction_synced(&pool, "missing").await.unwrap();
    }

    #[tokio::test]
    async fn failed_attempts_dead_letter_at_ceiling() {
        let pool = setup_pool().await;
        append_transaction(&pool, &movement("t1", "a", MovementKind::StockOut, 1.0))
            .await
            .unwrap();

        assert!(!record_failed_attempt(&pool, "t1", Some(3)).await.unwrap());
        assert!(!record_failed_attempt(&pool, "t1", Some(3)).await.unwrap());
        assert!(record_failed_attempt(&pool, "t1", Some(3)).await.unwrap());

        assert!(get_unsynced_transactions(&pool).await.unwrap().is_empty());
        let dead = get_dead_transactions(&pool).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);

        let backlog = count_backlog(&pool).await.unwrap();
        assert_eq!(backlog.unsynced, 0);
        assert_eq!(backlog.dead, 1);
    }

    #[tokio::test]
    async fn unbounded_policy_never_dead_letters() {
        let pool = setup_pool().await;
        append_transaction(&pool, &movement("t1", "a", MovementKind::StockOut, 1.0))
            .await
            .unwrap();

        for _ in 0..20 {
            assert!(!record_failed_attempt(&pool, "t1", None).await.unwrap());
        }
        let pending = get_unsynced_transactions(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 20);
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(
            prepare_sqlite_url("sqlite::memory:"),
            "sqlite::memory:".to_string()
        );
        assert_eq!(
            prepare_sqlite_url("postgres://host/db"),
            "postgres://host/db".to_string()
        );
        let td = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/nested/cache.db", td.path().display());
        let rebuilt = prepare_sqlite_url(&url);
        assert_eq!(rebuilt, url);
        assert!(td.path().join("nested").exists());
    }
}
