pub mod entity;
pub mod migration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::query::{JoinType, QueryOrder, QuerySelect};
use sea_orm::{ActiveValue::Set, DatabaseConnection, DatabaseTransaction};

use crate::error::{ServerError, ServerResult};
use entity::image::{self, Entity as Image, ImageModel, ImageVariant};
use entity::product::{self, Entity as Product, ProductModel};
use entity::upload::{self, Entity as Upload, UploadModel, UploadStatus};

#[async_trait]
pub trait DepotDatabase: Send + Sync {
    /// Retrieves an upload session.
    async fn find_upload(&self, upload_id: &str) -> ServerResult<UploadModel>;

    /// Retrieves an upload session, taking a row-level exclusive lock.
    ///
    /// The lock is held until the transaction ends. All mutating
    /// upload operations must go through here.
    async fn find_and_lock_upload(
        &self,
        txn: &DatabaseTransaction,
        upload_id: &str,
    ) -> ServerResult<UploadModel>;

    /// Retrieves a completed upload with a matching whole-file checksum.
    ///
    /// Used to deduplicate `initialize` calls.
    async fn find_completed_upload_by_checksum(
        &self,
        checksum: &str,
    ) -> ServerResult<Option<UploadModel>>;

    /// Retrieves a product by its SKU.
    async fn find_product_by_sku(&self, sku: &str) -> ServerResult<Option<ProductModel>>;

    /// Points a product's primary image at the given image row.
    ///
    /// Last-writer-wins; setting the same image twice is a no-op.
    async fn attach_primary_image(&self, product_id: i64, image_id: &str) -> ServerResult<()>;

    /// Retrieves all image rows of an upload.
    async fn find_images_for_upload(&self, upload_id: &str) -> ServerResult<Vec<ImageModel>>;

    /// Retrieves one variant of an upload, if generated.
    async fn find_image_variant(
        &self,
        upload_id: &str,
        variant: ImageVariant,
    ) -> ServerResult<Option<ImageModel>>;

    /// Resolver step 1: find an existing original image matching an
    /// image reference from a CSV row.
    ///
    /// Sub-strategies in order, most-recently-created first within
    /// each: exact path match, path containing the basename, upload
    /// original filename equal to the basename, upload stored
    /// filename containing the basename.
    async fn find_original_image_for_source(
        &self,
        source: &str,
        basename: &str,
    ) -> ServerResult<Option<ImageModel>>;

    /// Resolver step 2: find a completed upload matching an image
    /// reference's basename.
    async fn find_completed_upload_for_source(
        &self,
        basename: &str,
    ) -> ServerResult<Option<UploadModel>>;
}

#[async_trait]
impl DepotDatabase for DatabaseConnection {
    async fn find_upload(&self, upload_id: &str) -> ServerResult<UploadModel> {
        Upload::find_by_id(upload_id)
            .one(self)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NoSuchUpload)
    }

    async fn find_and_lock_upload(
        &self,
        txn: &DatabaseTransaction,
        upload_id: &str,
    ) -> ServerResult<UploadModel> {
        Upload::find_by_id(upload_id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NoSuchUpload)
    }

    async fn find_completed_upload_by_checksum(
        &self,
        checksum: &str,
    ) -> ServerResult<Option<UploadModel>> {
        Upload::find()
            .filter(upload::Column::ChecksumSha256.eq(checksum))
            .filter(upload::Column::Status.eq(UploadStatus::Completed))
            .order_by_desc(upload::Column::CreatedAt)
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_product_by_sku(&self, sku: &str) -> ServerResult<Option<ProductModel>> {
        Product::find()
            .filter(product::Column::Sku.eq(sku))
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn attach_primary_image(&self, product_id: i64, image_id: &str) -> ServerResult<()> {
        Product::update(product::ActiveModel {
            id: Set(product_id),
            primary_image_id: Set(Some(image_id.to_owned())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .exec(self)
        .await
        .map_err(ServerError::database_error)?;

        Ok(())
    }

    async fn find_images_for_upload(&self, upload_id: &str) -> ServerResult<Vec<ImageModel>> {
        Image::find()
            .filter(image::Column::UploadId.eq(upload_id))
            .order_by_asc(image::Column::CreatedAt)
            .all(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_image_variant(
        &self,
        upload_id: &str,
        variant: ImageVariant,
    ) -> ServerResult<Option<ImageModel>> {
        Image::find()
            .filter(image::Column::UploadId.eq(upload_id))
            .filter(image::Column::Variant.eq(variant))
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_original_image_for_source(
        &self,
        source: &str,
        basename: &str,
    ) -> ServerResult<Option<ImageModel>> {
        let originals = || {
            Image::find()
                .filter(image::Column::Variant.eq(ImageVariant::Original))
                .order_by_desc(image::Column::CreatedAt)
        };

        if let Some(image) = originals()
            .filter(image::Column::Path.eq(source))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            return Ok(Some(image));
        }

        if let Some(image) = originals()
            .filter(image::Column::Path.contains(basename))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            return Ok(Some(image));
        }

        if let Some(image) = originals()
            .join(JoinType::InnerJoin, image::Relation::Upload.def())
            .filter(upload::Column::OriginalFilename.eq(basename))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            return Ok(Some(image));
        }

        originals()
            .join(JoinType::InnerJoin, image::Relation::Upload.def())
            .filter(upload::Column::StoredFilename.contains(basename))
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_completed_upload_for_source(
        &self,
        basename: &str,
    ) -> ServerResult<Option<UploadModel>> {
        let completed = || {
            Upload::find()
                .filter(upload::Column::Status.eq(UploadStatus::Completed))
                .order_by_desc(upload::Column::CreatedAt)
        };

        if let Some(found) = completed()
            .filter(upload::Column::OriginalFilename.eq(basename))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            return Ok(Some(found));
        }

        completed()
            .filter(upload::Column::StoredFilename.contains(basename))
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }
}
