//! # Catalog Repository
//!
//! Devices and device groups pulled from the backend.
//!
//! ## Semantics
//! - Upserts are keyed by the unique identity (`device.hash`,
//!   `device_group.exonum_id`) and are last-write-wins.
//! - Identity comparison is case-insensitive on both lookups and upserts
//!   (the columns use `COLLATE NOCASE`).
//! - Nothing is ever deleted: a device missing from a refresh stays in the
//!   whitelist.

use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use blegate_core::{Device, DeviceGroup};

const DEVICE_COLUMNS: &str = "id, hash, manufacturer, created_at, updated_at, exonum_id, \
     device_group_id, owner_key";

const GROUP_COLUMNS: &str = "id, exonum_id, name, group_type, uplink_lifetime, \
     downlink_lifetime, services, created_at, updated_at, owner_key";

/// Repository for the device whitelist.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Inserts or replaces a device, keyed by hash.
    pub async fn upsert_device(&self, device: &Device) -> DbResult<()> {
        upsert_device_on(&self.pool, device).await
    }

    /// Upserts a batch of devices in one SQL transaction.
    ///
    /// Either every device is written or none is.
    pub async fn upsert_devices(&self, devices: &[Device]) -> DbResult<()> {
        if devices.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for device in devices {
            upsert_device_on(&mut *tx, device).await?;
        }
        tx.commit().await?;

        debug!(count = devices.len(), "Upserted devices");
        Ok(())
    }

    /// Looks up a device by hash, ignoring case.
    pub async fn get_device_by_hash(&self, hash: &str) -> DbResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM device WHERE LOWER(hash) = LOWER(?1)");

        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(device)
    }

    /// Returns every whitelisted device.
    pub async fn list_devices(&self) -> DbResult<Vec<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM device ORDER BY id");

        let devices = sqlx::query_as::<_, Device>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(devices)
    }

    // =========================================================================
    // Device Groups
    // =========================================================================

    /// Inserts or replaces a device group, keyed by exonum id.
    pub async fn upsert_device_group(&self, group: &DeviceGroup) -> DbResult<()> {
        upsert_group_on(&self.pool, group).await
    }

    /// Upserts a batch of device groups in one SQL transaction.
    pub async fn upsert_device_groups(&self, groups: &[DeviceGroup]) -> DbResult<()> {
        if groups.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for group in groups {
            upsert_group_on(&mut *tx, group).await?;
        }
        tx.commit().await?;

        debug!(count = groups.len(), "Upserted device groups");
        Ok(())
    }

    /// Looks up a device group by exonum id, ignoring case.
    pub async fn get_device_group_by_id(&self, exonum_id: &str) -> DbResult<Option<DeviceGroup>> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM device_group WHERE LOWER(exonum_id) = LOWER(?1)"
        );

        let group = sqlx::query_as::<_, DeviceGroup>(&sql)
            .bind(exonum_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(group)
    }

    /// Returns every known device group.
    pub async fn list_device_groups(&self) -> DbResult<Vec<DeviceGroup>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM device_group ORDER BY id");

        let groups = sqlx::query_as::<_, DeviceGroup>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(groups)
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================

async fn upsert_device_on<'e, E>(executor: E, device: &Device) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO device (
            hash, manufacturer, created_at, updated_at,
            exonum_id, device_group_id, owner_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(hash) DO UPDATE SET
            hash = excluded.hash,
            manufacturer = excluded.manufacturer,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            exonum_id = excluded.exonum_id,
            device_group_id = excluded.device_group_id,
            owner_key = excluded.owner_key
        "#,
    )
    .bind(device.hash.as_str())
    .bind(device.manufacturer.as_str())
    .bind(device.created_at)
    .bind(device.updated_at)
    .bind(device.exonum_id.as_str())
    .bind(device.device_group_id.as_str())
    .bind(device.owner_key.as_str())
    .execute(executor)
    .await?;

    Ok(())
}

async fn upsert_group_on<'e, E>(executor: E, group: &DeviceGroup) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO device_group (
            exonum_id, name, group_type, uplink_lifetime, downlink_lifetime,
            services, created_at, updated_at, owner_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(exonum_id) DO UPDATE SET
            exonum_id = excluded.exonum_id,
            name = excluded.name,
            group_type = excluded.group_type,
            uplink_lifetime = excluded.uplink_lifetime,
            downlink_lifetime = excluded.downlink_lifetime,
            services = excluded.services,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            owner_key = excluded.owner_key
        "#,
    )
    .bind(group.exonum_id.as_str())
    .bind(group.name.as_str())
    .bind(group.group_type)
    .bind(group.uplink_lifetime)
    .bind(group.downlink_lifetime)
    .bind(group.services.as_str())
    .bind(group.created_at)
    .bind(group.updated_at)
    .bind(group.owner_key.as_str())
    .execute(executor)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn device(hash: &str, manufacturer: &str, group: &str) -> Device {
        Device {
            id: 0,
            hash: hash.to_string(),
            manufacturer: manufacturer.to_string(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
            exonum_id: format!("ex-{hash}"),
            device_group_id: group.to_string(),
            owner_key: "owner".to_string(),
        }
    }

    fn group(exonum_id: &str, name: &str) -> DeviceGroup {
        DeviceGroup {
            id: 0,
            exonum_id: exonum_id.to_string(),
            name: name.to_string(),
            group_type: 1,
            uplink_lifetime: 10,
            downlink_lifetime: 20,
            services: r#"[{"name":"Device-Info","characteristics":[]}]"#.to_string(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            owner_key: String::new(),
        }
    }

    async fn repo() -> CatalogRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().catalog()
    }

    #[tokio::test]
    async fn test_device_lookup_is_case_insensitive() {
        let repo = repo().await;
        repo.upsert_device(&device("AB:CD", "acme", "grp-1"))
            .await
            .unwrap();

        let upper = repo.get_device_by_hash("AB:CD").await.unwrap().unwrap();
        let lower = repo.get_device_by_hash("ab:cd").await.unwrap().unwrap();
        assert_eq!(upper, lower);
        assert!(repo.get_device_by_hash("ab:ce").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_upsert_is_idempotent_last_write_wins() {
        let repo = repo().await;
        repo.upsert_device(&device("AB:CD", "acme", "grp-1"))
            .await
            .unwrap();
        repo.upsert_device(&device("ab:cd", "globex", "grp-2"))
            .await
            .unwrap();

        let all = repo.list_devices().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].manufacturer, "globex");
        assert_eq!(all[0].device_group_id, "grp-2");
    }

    #[tokio::test]
    async fn test_group_upsert_is_idempotent_last_write_wins() {
        let repo = repo().await;
        repo.upsert_device_group(&group("grp-1", "thermo"))
            .await
            .unwrap();
        repo.upsert_device_group(&group("grp-1", "thermo v2"))
            .await
            .unwrap();

        let groups = repo.list_device_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "thermo v2");

        let found = repo.get_device_group_by_id("GRP-1").await.unwrap().unwrap();
        assert_eq!(found.name, "thermo v2");
        assert_eq!(found.schema().unwrap().services().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_upserts() {
        let repo = repo().await;
        repo.upsert_device_groups(&[group("grp-1", "a"), group("grp-2", "b")])
            .await
            .unwrap();
        repo.upsert_devices(&[
            device("01", "acme", "grp-1"),
            device("02", "acme", "grp-2"),
            device("03", "acme", "missing-group"),
        ])
        .await
        .unwrap();

        assert_eq!(repo.list_device_groups().await.unwrap().len(), 2);
        assert_eq!(repo.list_devices().await.unwrap().len(), 3);

        // Empty batches are a no-op.
        repo.upsert_devices(&[]).await.unwrap();
        repo.upsert_device_groups(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_absent_devices_are_not_evicted() {
        let repo = repo().await;
        repo.upsert_devices(&[device("01", "acme", "g"), device("02", "acme", "g")])
            .await
            .unwrap();
        repo.upsert_devices(&[device("01", "acme", "g")])
            .await
            .unwrap();

        assert!(repo.get_device_by_hash("02").await.unwrap().is_some());
    }
}
