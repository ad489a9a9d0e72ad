//! Database migrations.

pub use sea_orm_migration::*;

mod m20250715_000001_create_upload_table;
mod m20250715_000002_create_image_table;
mod m20250715_000003_create_product_table;
mod m20250715_000004_create_import_log_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250715_000001_create_upload_table::Migration),
            Box::new(m20250715_000002_create_image_table::Migration),
            Box::new(m20250715_000003_create_product_table::Migration),
            Box::new(m20250715_000004_create_import_log_table::Migration),
        ]
    }
}
