//! SQLite-backed store using sqlx. Item names, values and channel statuses
//! are stored as JSON text and queried with `json_extract`.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
};

use crate::{
    Context, Error, Result,
    store::{ChangedFields, ChannelStore, ExecutionStore, ItemStore},
    types::{Channel, ChannelExecution, ExecutionStatus, Item, ItemChannelStatus},
};

const ITEM_COLUMNS: &str =
    "i.id, i.tenant_id, i.identifier, i.type_id, i.path, i.name, i.attr_values, i.channel_status";

/// Persistence for channels, items, relations and executions.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with a private pool and run migrations.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::external("failed to connect to SQLite", e))?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool. Call [`crate::run_migrations`] first.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// JSON path addressing one key of a JSON object column.
fn key_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

fn channel_from_row(row: &SqliteRow) -> Result<Channel> {
    let id: i64 = row.get("id");
    let channel_type: String = row.get("channel_type");
    let config: String = row.get("config");
    let mappings: String = row.get("mappings");
    Ok(Channel {
        id,
        tenant_id: row.get("tenant_id"),
        identifier: row.get("identifier"),
        name: row.get("name"),
        channel_type: channel_type.parse()?,
        active: row.get::<i64, _>("active") != 0,
        config: serde_json::from_str(&config)
            .with_context(|| format!("invalid config of channel {id}"))?,
        mappings: serde_json::from_str(&mappings)
            .with_context(|| format!("invalid mappings of channel {id}"))?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let name: String = row.get("name");
    let values: String = row.get("attr_values");
    let channels: String = row.get("channel_status");
    let id: i64 = row.get("id");
    Ok(Item {
        id,
        tenant_id: row.get("tenant_id"),
        identifier: row.get("identifier"),
        type_id: row.get("type_id"),
        path: row.get("path"),
        name: serde_json::from_str(&name).with_context(|| format!("invalid name of item {id}"))?,
        values: serde_json::from_str(&values)
            .with_context(|| format!("invalid values of item {id}"))?,
        channels: serde_json::from_str(&channels)
            .with_context(|| format!("invalid channel status of item {id}"))?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<ChannelExecution> {
    let status: i64 = row.get("status");
    let status = u8::try_from(status)
        .with_context(|| format!("invalid execution status: {status}"))
        .and_then(|code| ExecutionStatus::try_from(code).map_err(Error::message))?;
    Ok(ChannelExecution {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        channel_id: row.get("channel_id"),
        status,
        log: row.get("log"),
        started_at_ms: row.get::<i64, _>("started_at_ms") as u64,
        finished_at_ms: row.get::<Option<i64>, _>("finished_at_ms").map(|v| v as u64),
        storage_path: row.get("storage_path"),
    })
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn get_channel(&self, id: i64) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn find_channel(&self, tenant_id: &str, identifier: &str) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE tenant_id = ? AND identifier = ?")
            .bind(tenant_id)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn list_channels(&self, tenants: &[String]) -> Result<Vec<Channel>> {
        let rows = if tenants.is_empty() {
            sqlx::query("SELECT * FROM channels ORDER BY tenant_id, id")
                .fetch_all(&self.pool)
                .await?
        } else {
            let placeholders = vec!["?"; tenants.len()].join(", ");
            let sql = format!(
                "SELECT * FROM channels WHERE tenant_id IN ({placeholders}) ORDER BY tenant_id, id"
            );
            let mut query = sqlx::query(&sql);
            for tenant in tenants {
                query = query.bind(tenant);
            }
            query.fetch_all(&self.pool).await?
        };
        rows.iter().map(channel_from_row).collect()
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<i64> {
        let config = serde_json::to_string(&channel.config)?;
        let mappings = serde_json::to_string(&channel.mappings)?;
        let row = sqlx::query(
            "INSERT INTO channels (tenant_id, identifier, name, channel_type, active, config, mappings)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, identifier) DO UPDATE SET
                name = excluded.name,
                channel_type = excluded.channel_type,
                active = excluded.active,
                config = excluded.config,
                mappings = excluded.mappings
             RETURNING id",
        )
        .bind(&channel.tenant_id)
        .bind(&channel.identifier)
        .bind(&channel.name)
        .bind(channel.channel_type.as_str())
        .bind(i64::from(channel.active))
        .bind(&config)
        .bind(&mappings)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_item(&self, item: &Item) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO items (tenant_id, identifier, type_id, path, name, attr_values, channel_status, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&item.tenant_id)
        .bind(&item.identifier)
        .bind(item.type_id)
        .bind(&item.path)
        .bind(serde_json::to_string(&item.name)?)
        .bind(serde_json::to_string(&item.values)?)
        .bind(serde_json::to_string(&item.channels)?)
        .bind(marketsync_common::time::now_ms() as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn save_item(&self, item: &Item, changed: ChangedFields) -> Result<()> {
        if !changed.any() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        if changed.values {
            sqlx::query("UPDATE items SET attr_values = ? WHERE id = ?")
                .bind(serde_json::to_string(&item.values)?)
                .bind(item.id)
                .execute(&mut *tx)
                .await?;
        }
        if changed.channels {
            sqlx::query("UPDATE items SET channel_status = ? WHERE id = ?")
                .bind(serde_json::to_string(&item.channels)?)
                .bind(item.id)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query("UPDATE items SET updated_at_ms = ? WHERE id = ?")
            .bind(marketsync_common::time::now_ms() as i64)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("item", item.id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM items
             WHERE tenant_id = ? AND json_extract(channel_status, ?) = ?",
        )
        .bind(tenant_id)
        .bind(format!("{}.status", key_path(channel)))
        .bind(i64::from(u8::from(status)))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn find_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items i
             WHERE i.tenant_id = ? AND json_extract(i.channel_status, ?) = ?
             ORDER BY i.id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(format!("{}.status", key_path(channel)))
            .bind(i64::from(u8::from(status)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn find_with_value(&self, tenant_id: &str, attr: &str) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items i
             WHERE i.tenant_id = ?1
               AND json_extract(i.attr_values, ?2) IS NOT NULL
               AND json_extract(i.attr_values, ?2) != ''
             ORDER BY i.id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(key_path(attr))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn add_relation(
        &self,
        tenant_id: &str,
        relation_id: i64,
        item_id: i64,
        target_id: i64,
        order: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO item_relations (tenant_id, relation_id, item_id, target_id, sort_order)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(relation_id)
        .bind(item_id)
        .bind(target_id)
        .bind(order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_relation_sources(
        &self,
        tenant_id: &str,
        relation_id: i64,
        target_id: i64,
    ) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items i
             JOIN item_relations r ON r.item_id = i.id
             WHERE r.tenant_id = ? AND r.relation_id = ? AND r.target_id = ?
             ORDER BY r.sort_order, i.id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(relation_id)
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn find_relation_targets(
        &self,
        tenant_id: &str,
        item_id: i64,
        relation_ids: &[i64],
    ) -> Result<Vec<Item>> {
        if relation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; relation_ids.len()].join(", ");
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items i
             JOIN item_relations r ON r.target_id = i.id
             WHERE r.tenant_id = ? AND r.item_id = ? AND r.relation_id IN ({placeholders})
             ORDER BY r.sort_order, i.id"
        );
        let mut query = sqlx::query(&sql).bind(tenant_id).bind(item_id);
        for relation_id in relation_ids {
            query = query.bind(relation_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_execution(&self, execution: &ChannelExecution) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO channel_executions (tenant_id, channel_id, status, log, started_at_ms, finished_at_ms, storage_path)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&execution.tenant_id)
        .bind(execution.channel_id)
        .bind(i64::from(u8::from(execution.status)))
        .bind(&execution.log)
        .bind(execution.started_at_ms as i64)
        .bind(execution.finished_at_ms.map(|v| v as i64))
        .bind(&execution.storage_path)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn finish_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        log: &str,
        finished_at_ms: u64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE channel_executions SET status = ?, log = ?, finished_at_ms = ? WHERE id = ?",
        )
        .bind(i64::from(u8::from(status)))
        .bind(log)
        .bind(finished_at_ms as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("execution", id));
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM channel_executions WHERE channel_id = ?
             ORDER BY started_at_ms DESC, id DESC LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{ChannelType, ItemChannelEntry},
        serde_json::json,
    };

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:", 1).await.unwrap()
    }

    fn item(identifier: &str) -> Item {
        Item {
            id: 0,
            tenant_id: "t1".into(),
            identifier: identifier.into(),
            type_id: 3,
            path: "1.7".into(),
            name: [("ru".to_string(), "Ботинки".to_string())].into(),
            values: Default::default(),
            channels: Default::default(),
        }
    }

    #[tokio::test]
    async fn channel_round_trip_and_upsert() {
        let store = store().await;
        let mut channel: Channel = serde_json::from_value(json!({
            "tenantId": "t1",
            "identifier": "ozon",
            "type": "ozon",
            "config": {"start": 2, "interval": 15, "ozonClientId": "42"},
            "mappings": {"cat_17": {"valid": [3], "visible": ["7"]}},
        }))
        .unwrap();
        let id = store.upsert_channel(&channel).await.unwrap();
        channel.id = id;
        let loaded = store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(loaded, channel);

        channel.active = false;
        assert_eq!(store.upsert_channel(&channel).await.unwrap(), id);
        let found = store.find_channel("t1", "ozon").await.unwrap().unwrap();
        assert!(!found.active);
    }

    #[tokio::test]
    async fn json_status_queries() {
        let store = store().await;
        let mut a = item("a");
        a.channels
            .insert("ozon".into(), ItemChannelEntry::new(ItemChannelStatus::Submitted));
        a.values.insert("ozonId".into(), json!(555));
        let mut b = item("b");
        b.channels
            .insert("ozon".into(), ItemChannelEntry::new(ItemChannelStatus::Synced));
        b.values.insert("ozonId".into(), json!(""));
        store.insert_item(&a).await.unwrap();
        store.insert_item(&b).await.unwrap();

        let n = store
            .count_by_channel_status("t1", "ozon", ItemChannelStatus::Submitted)
            .await
            .unwrap();
        assert_eq!(n, 1);
        let synced = store
            .find_by_channel_status("t1", "ozon", ItemChannelStatus::Synced)
            .await
            .unwrap();
        assert_eq!(synced[0].identifier, "b");
        let with_id = store.find_with_value("t1", "ozonId").await.unwrap();
        assert_eq!(with_id.len(), 1);
        assert_eq!(with_id[0].identifier, "a");
    }

    #[tokio::test]
    async fn save_is_partial() {
        let store = store().await;
        let id = store.insert_item(&item("a")).await.unwrap();
        let mut edited = store.get_item(id).await.unwrap().unwrap();
        edited.values.insert("sku".into(), json!("S1"));
        edited
            .channels
            .insert("ozon".into(), ItemChannelEntry::new(ItemChannelStatus::Error));
        store
            .save_item(&edited, ChangedFields {
                values: false,
                channels: true,
            })
            .await
            .unwrap();
        let stored = store.get_item(id).await.unwrap().unwrap();
        assert!(stored.values.is_empty());
        assert_eq!(stored.channel_status("ozon"), Some(ItemChannelStatus::Error));
    }

    #[tokio::test]
    async fn relations_and_executions() {
        let store = store().await;
        let product = store.insert_item(&item("p")).await.unwrap();
        let image = store.insert_item(&item("img")).await.unwrap();
        store.add_relation("t1", 5, product, image, 0).await.unwrap();
        let targets = store
            .find_relation_targets("t1", product, &[5, 9])
            .await
            .unwrap();
        assert_eq!(targets[0].identifier, "img");
        let sources = store.find_relation_sources("t1", 5, image).await.unwrap();
        assert_eq!(sources[0].identifier, "p");

        let channel = Channel {
            id: 1,
            tenant_id: "t1".into(),
            identifier: "ozon".into(),
            name: String::new(),
            channel_type: ChannelType::Ozon,
            active: true,
            config: Default::default(),
            mappings: Default::default(),
        };
        let exec_id = store
            .create_execution(&ChannelExecution::running(&channel, 1_000))
            .await
            .unwrap();
        store
            .finish_execution(exec_id, ExecutionStatus::Success, "Finish\n", 2_000)
            .await
            .unwrap();
        let list = store.list_executions(1, 10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, ExecutionStatus::Success);
        assert_eq!(list[0].finished_at_ms, Some(2_000));
        assert!(store.finish_execution(999, ExecutionStatus::Error, "", 0).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_json_column_names_the_row() {
        let store = store().await;
        let channel: Channel = serde_json::from_value(json!({
            "tenantId": "t1",
            "identifier": "ozon",
            "type": "ozon",
            "config": {},
            "mappings": {},
        }))
        .unwrap();
        let id = store.upsert_channel(&channel).await.unwrap();
        sqlx::query("UPDATE channels SET config = '{broken' WHERE id = ?")
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();
        let err = store.get_channel(id).await.unwrap_err();
        assert!(matches!(err, Error::Message(_)));
        assert!(err.to_string().starts_with(&format!("invalid config of channel {id}: ")));
    }
}
