//! The diff/merge engine.
//!
//! Given a SKU-keyed remote snapshot and the local product list, computes and
//! applies the create/update/delete set. The remote side always wins; the
//! only state this system owns is the one-time image attachment.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogStore, LocalProduct, MediaStore, StoreError};
use crate::feed::RemoteProduct;
use crate::media::ImageUploader;

/// Per-product failure; never aborts the rest of the pass.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("price {raw:?} does not normalize to a decimal")]
    InvalidPrice { raw: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SkuFailure {
    pub sku: String,
    pub error: String,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failures: Vec<SkuFailure>,
    pub generated_at: String,
}

impl SyncReport {
    fn fail(&mut self, sku: &str, error: impl std::fmt::Display) {
        warn!(sku, error = %error, "per-product failure");
        self.failures.push(SkuFailure {
            sku: sku.to_string(),
            error: error.to_string(),
        });
    }
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

pub struct Reconciler {
    catalog: Arc<dyn CatalogStore>,
    media: Arc<dyn MediaStore>,
    images: Arc<dyn ImageUploader>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        media: Arc<dyn MediaStore>,
        images: Arc<dyn ImageUploader>,
    ) -> Self {
        Self {
            catalog,
            media,
            images,
        }
    }

    /// One reconciliation pass. Snapshot entries matched by a local product
    /// are marked consumed in step one; the unconsumed remainder becomes the
    /// create set, in feed order.
    pub async fn reconcile(
        &self,
        snapshot: IndexMap<String, RemoteProduct>,
        locals: Vec<LocalProduct>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut consumed: HashSet<String> = HashSet::with_capacity(locals.len());

        // Existing products: update if still in the feed, delete otherwise.
        for local in locals {
            match snapshot.get(&local.sku) {
                Some(remote) => {
                    consumed.insert(local.sku.clone());
                    let sku = local.sku.clone();
                    match self.apply_update(remote, Some(local), &mut report).await {
                        Ok(Applied::Updated) => report.updated += 1,
                        Ok(Applied::Unchanged) => report.unchanged += 1,
                        Ok(Applied::Created) => report.created += 1,
                        Err(err) => report.fail(&sku, err),
                    }
                }
                None => {
                    if let Err(err) = self.delete_product(&local).await {
                        report.fail(&local.sku, err);
                    } else {
                        report.deleted += 1;
                    }
                }
            }
        }

        // Snapshot entries with no local counterpart: create them.
        for (sku, remote) in &snapshot {
            if consumed.contains(sku) {
                continue;
            }
            match self.apply_update(remote, None, &mut report).await {
                Ok(Applied::Created) => report.created += 1,
                Ok(Applied::Updated) => report.updated += 1,
                Ok(Applied::Unchanged) => report.unchanged += 1,
                Err(err) => report.fail(sku, err),
            }
        }

        report.generated_at = chrono::Utc::now().to_rfc3339();
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            "reconcile pass complete"
        );
        report
    }

    /// Delete a local product together with its owned image. The image goes
    /// first: if that fails the product is kept so the next pass can retry
    /// without orphaning the attachment.
    async fn delete_product(&self, local: &LocalProduct) -> Result<(), ProductError> {
        if let Some(image_id) = local.image_id {
            self.media.delete(image_id).await?;
        }
        match local.id {
            Some(id) => self.catalog.delete(id).await?,
            None => return Err(StoreError::Unsaved(local.sku.clone()).into()),
        }
        debug!(sku = %local.sku, "deleted product absent from feed");
        Ok(())
    }

    /// Write the normalized remote fields onto an existing product, or onto a
    /// fresh record when `existing` is `None`.
    ///
    /// Field validation happens before any store write, so an invalid record
    /// never leaves a partially written product behind. A failed image upload
    /// is reported but does not block the product itself.
    async fn apply_update(
        &self,
        remote: &RemoteProduct,
        existing: Option<LocalProduct>,
        report: &mut SyncReport,
    ) -> Result<Applied, ProductError> {
        let price = normalize_price(&remote.price).ok_or_else(|| ProductError::InvalidPrice {
            raw: remote.price.clone(),
        })?;

        let creating = existing.is_none();
        let before = existing.clone();
        let mut product = existing.unwrap_or_else(|| LocalProduct::new(&remote.sku));
        product.sku = remote.sku.clone();
        product.name = remote.name.clone();
        product.description = decode_description(&remote.description);
        product.stock_quantity = remote.in_stock;
        product.price = price;

        // Attach an image at most once per product lifetime: a product that
        // already carries an image reference is never re-uploaded, even when
        // the remote URL changes. An empty/absent URL skips upload silently.
        if product.image_id.is_none() {
            let picture = remote
                .picture
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty());
            if let Some(url) = picture {
                // Upload needs an owner id, so unsaved records are persisted
                // first.
                let owner = match product.id {
                    Some(id) => id,
                    None => {
                        let id = self.catalog.create(&product).await?;
                        product.id = Some(id);
                        id
                    }
                };
                match self.images.upload(url, &product.name, owner).await {
                    Ok(image_id) => product.image_id = Some(image_id),
                    Err(err) => report.fail(&product.sku, err),
                }
            }
        }

        // Final save regardless of image outcome.
        match product.id {
            Some(_) => {
                if before.as_ref() == Some(&product) {
                    return Ok(Applied::Unchanged);
                }
                self.catalog.update(&product).await?;
                if creating {
                    Ok(Applied::Created)
                } else {
                    Ok(Applied::Updated)
                }
            }
            None => {
                self.catalog.create(&product).await?;
                Ok(Applied::Created)
            }
        }
    }
}

/// Strip everything that is not an ASCII digit or a decimal point, then
/// parse. Empty or unparsable results are invalid input for that SKU.
pub fn normalize_price(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

/// Feed descriptions may carry encoded entities; decode before storing.
pub fn decode_description(raw: &str) -> String {
    html_escape::decode_html_entities(raw).into_owned()
}
