//! SQLite-backed catalog and media store.
//!
//! Product rows live in SQLite; media bytes live as plain files under the
//! configured media directory with a row per attachment. Prices are stored
//! as their exact decimal string.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::catalog::{
    CatalogStore, ImageId, LocalProduct, MediaStore, ProductId, StoreError,
};
use crate::config::SyncConfig;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS products (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    sku             TEXT    NOT NULL UNIQUE,
    name            TEXT    NOT NULL,
    description     TEXT    NOT NULL,
    price           TEXT    NOT NULL,
    stock_quantity  INTEGER NOT NULL,
    image_id        INTEGER
);
CREATE TABLE IF NOT EXISTS media (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    filename    TEXT NOT NULL,
    title       TEXT NOT NULL,
    owner_id    INTEGER NOT NULL,
    path        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub struct SqliteStore {
    pool: SqlitePool,
    media_dir: PathBuf,
}

impl SqliteStore {
    pub async fn open(config: &SyncConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.db_path))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        let media_dir = PathBuf::from(&config.media_dir);
        tokio::fs::create_dir_all(&media_dir).await?;
        info!(db = %config.db_path, media_dir = %media_dir.display(), "catalog store opened");

        Ok(Self { pool, media_dir })
    }

    /// In-memory database for tests and throwaway runs; media files still go
    /// to `media_dir`.
    pub async fn open_in_memory(media_dir: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        // one connection, or every connection would see its own empty db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tokio::fs::create_dir_all(media_dir).await?;
        Ok(Self {
            pool,
            media_dir: media_dir.to_path_buf(),
        })
    }
}

fn product_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LocalProduct, StoreError> {
    let price_raw: String = row.get("price");
    let price = BigDecimal::from_str(&price_raw)
        .map_err(|_| StoreError::Decode(format!("price {price_raw:?}")))?;
    Ok(LocalProduct {
        id: Some(ProductId(row.get::<i64, _>("id"))),
        sku: row.get("sku"),
        name: row.get("name"),
        description: row.get("description"),
        price,
        stock_quantity: row.get("stock_quantity"),
        image_id: row.get::<Option<i64>, _>("image_id").map(ImageId),
    })
}

#[async_trait::async_trait]
impl CatalogStore for SqliteStore {
    async fn list_all(&self) -> Result<Vec<LocalProduct>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, sku, name, description, price, stock_quantity, image_id \
             FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn create(&self, product: &LocalProduct) -> Result<ProductId, StoreError> {
        let res = sqlx::query(
            "INSERT INTO products (sku, name, description, price, stock_quantity, image_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(product.stock_quantity)
        .bind(product.image_id.map(|i| i.0))
        .execute(&self.pool)
        .await?;
        Ok(ProductId(res.last_insert_rowid()))
    }

    async fn update(&self, product: &LocalProduct) -> Result<(), StoreError> {
        let id = product
            .id
            .ok_or_else(|| StoreError::Unsaved(product.sku.clone()))?;
        let res = sqlx::query(
            "UPDATE products SET sku = ?, name = ?, description = ?, price = ?, \
             stock_quantity = ?, image_id = ? WHERE id = ?",
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(product.stock_quantity)
        .bind(product.image_id.map(|i| i.0))
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::MissingProduct(id));
        }
        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::MissingProduct(id));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaStore for SqliteStore {
    async fn store(
        &self,
        path: &Path,
        filename: &str,
        title: &str,
        owner: ProductId,
    ) -> Result<ImageId, StoreError> {
        let dest = self.media_dir.join(format!("{}_{}", owner.0, filename));
        tokio::fs::copy(path, &dest).await?;
        let res = sqlx::query(
            "INSERT INTO media (filename, title, owner_id, path) VALUES (?, ?, ?, ?)",
        )
        .bind(filename)
        .bind(title)
        .bind(owner.0)
        .bind(dest.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;
        debug!(owner = %owner, file = %dest.display(), "stored media file");
        Ok(ImageId(res.last_insert_rowid()))
    }

    async fn delete(&self, id: ImageId) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT path FROM media WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            let path: String = row.get("path");
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            sqlx::query("DELETE FROM media WHERE id = ?")
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
