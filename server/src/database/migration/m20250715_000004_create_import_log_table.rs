use sea_orm_migration::prelude::*;

use crate::database::entity::import_log::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250715_000004_create_import_log_table"
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
                    .col(
                        ColumnDef::new(Column::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Column::Filename).string().not_null())
                    .col(ColumnDef::new(Column::FileHash).string().null())
                    .col(
                        ColumnDef::new(Column::Status)
                            .r#char()
                            .char_len(1)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::TotalRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::ImportedRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::UpdatedRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::InvalidRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::DuplicateRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Column::ErrorDetails).string().not_null())
                    .col(
                        ColumnDef::new(Column::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Column::ProcessingTimeSeconds)
                            .big_integer()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-import-log-started-at")
                    .table(Entity)
                    .col(Column::StartedAt)
                    .to_owned(),
            )
            .await
    }
}
