//! Catalog and media store interfaces.
//!
//! The reconciler is the only writer; everything else is read-only or
//! stateless with respect to the catalog. Store identities are opaque;
//! correlation between remote and local records happens on SKU alone.

use bigdecimal::BigDecimal;
use thiserror::Error;

/// Store-assigned product identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductId(pub i64);

/// Opaque reference into the media store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub i64);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A product record as held in the local catalog.
///
/// `id` is `None` until the store has persisted the record once.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalProduct {
    pub id: Option<ProductId>,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: BigDecimal,
    pub stock_quantity: i64,
    pub image_id: Option<ImageId>,
}

impl LocalProduct {
    /// Fresh, unsaved record for a SKU that does not exist locally yet.
    pub fn new(sku: &str) -> Self {
        Self {
            id: None,
            sku: sku.to_string(),
            name: String::new(),
            description: String::new(),
            price: BigDecimal::default(),
            stock_quantity: 0,
            image_id: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("media i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("product {0} not persisted yet")]
    Unsaved(String),
    #[error("corrupt stored value: {0}")]
    Decode(String),
    #[error("no such product id {0}")]
    MissingProduct(ProductId),
}

/// Local product catalog. Writes to distinct records are independent; the
/// reconciler drives all mutations sequentially within a pass.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Full catalog, no pagination limit.
    async fn list_all(&self) -> Result<Vec<LocalProduct>, StoreError>;

    /// Persist a new record, returning its store identity.
    async fn create(&self, product: &LocalProduct) -> Result<ProductId, StoreError>;

    /// Rewrite every field of an existing record in one statement.
    async fn update(&self, product: &LocalProduct) -> Result<(), StoreError>;

    /// Remove a record by identity.
    async fn delete(&self, id: ProductId) -> Result<(), StoreError>;
}

/// Media attachments owned by product records.
#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    /// Ingest the file at `path` under `filename`, associated with `owner`.
    async fn store(
        &self,
        path: &std::path::Path,
        filename: &str,
        title: &str,
        owner: ProductId,
    ) -> Result<ImageId, StoreError>;

    /// Remove an attachment and its bytes.
    async fn delete(&self, id: ImageId) -> Result<(), StoreError>;
}
