//! Singleton fingerprint row

use super::{FINGERPRINT_ROW, META_PARTITION};
use crate::fingerprint::SnapshotFingerprint;
use otw_common::time::{now, to_storage};
use otw_common::Result;
use sqlx::SqlitePool;

/// Last persisted snapshot fingerprint, if any
pub async fn load_fingerprint(pool: &SqlitePool) -> Result<Option<SnapshotFingerprint>> {
    let hash: Option<String> = sqlx::query_scalar(
        "SELECT hash FROM snapshot_meta WHERE partition_key = ? AND row_key = ?",
    )
    .bind(META_PARTITION)
    .bind(FINGERPRINT_ROW)
    .fetch_optional(pool)
    .await?;

    Ok(hash.map(SnapshotFingerprint::from_hex))
}

/// Overwrite the persisted fingerprint
pub async fn save_fingerprint(pool: &SqlitePool, fingerprint: &SnapshotFingerprint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO snapshot_meta (partition_key, row_key, hash, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(partition_key, row_key) DO UPDATE SET
            hash = excluded.hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(META_PARTITION)
    .bind(FINGERPRINT_ROW)
    .bind(fingerprint.as_str())
    .bind(to_storage(&now()))
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn test_fingerprint_absent_then_overwritten() {
        let pool = connect_in_memory().await.unwrap();
        assert!(load_fingerprint(&pool).await.unwrap().is_none());

        save_fingerprint(&pool, &SnapshotFingerprint::from_hex("aa")).await.unwrap();
        save_fingerprint(&pool, &SnapshotFingerprint::from_hex("bb")).await.unwrap();

        let stored = load_fingerprint(&pool).await.unwrap().unwrap();
        assert_eq!(stored.as_str(), "bb");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_meta")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
