use sea_orm_migration::prelude::*;

use crate::database::entity::upload::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250715_000001_create_upload_table"
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
                    .col(
                        ColumnDef::new(Column::OriginalFilename)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::StoredFilename)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Column::MimeType).string().null())
                    .col(ColumnDef::new(Column::TotalSize).big_integer().not_null())
                    .col(ColumnDef::new(Column::TotalChunks).integer().not_null())
                    .col(
                        ColumnDef::new(Column::UploadedChunks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::ChecksumSha256)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::Status)
                            .r#char()
                            .char_len(1)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::UploadedChunkSet)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::FailureReason).string().null())
                    .col(
                        ColumnDef::new(Column::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-upload-checksum-sha256")
                    .table(Entity)
                    .col(Column::ChecksumSha256)
                    .to_owned(),
            )
            .await
    }
}
