use sea_orm_migration::prelude::*;

use crate::database::entity::image::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250715_000002_create_image_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(ColumnDef::new(Column::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Column::UploadId).string().not_null())
                    .col(
                        ColumnDef::new(Column::Variant)
                            .r#char()
                            .char_len(1)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::Path).string().not_null())
                    .col(ColumnDef::new(Column::Width).integer().null())
                    .col(ColumnDef::new(Column::Height).integer().null())
                    .col(ColumnDef::new(Column::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Column::MimeType).string().not_null())
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-image-upload-id")
                            .from(Entity, Column::UploadId)
                            .to(
                                crate::database::entity::upload::Entity,
                                crate::database::entity::upload::Column::Id,
                            )
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-image-upload-id-variant")
                    .table(Entity)
                    .col(Column::UploadId)
                    .col(Column::Variant)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}
