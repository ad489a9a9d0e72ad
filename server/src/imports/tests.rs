use super::*;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use rust_decimal::Decimal;

use crate::database::entity::image::ImageVariant;
use crate::database::entity::product::ProductStatus;
use crate::testing::test_state;
use crate::uploads;
use depot::api::v1::uploads::{InitializeUploadRequest, UploadChunkRequest};

const MIXED_CSV: &str = "\
sku,name,price,stock_quantity
SKU001,Product 1,10.00,100
SKU002,Product 2,invalid,200
SKU003,Product 3,30.00,300
";

fn options() -> ImportOptions {
    ImportOptions::default()
}

async fn run_import(state: &crate::State, data: &str, options: ImportOptions) -> ImportResult {
    import(state, &ProductRowHandler, "products.csv", data.as_bytes(), options)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_import_with_mixed_rows() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let result = run_import(&state, MIXED_CSV, options()).await;

    assert_eq!(3, result.total);
    assert_eq!(2, result.imported);
    assert_eq!(0, result.updated);
    assert_eq!(1, result.invalid);
    assert_eq!(0, result.duplicates);
    assert_eq!(2, result.processed);
    assert_eq!(66.67, result.success_rate);

    assert_eq!(
        vec![RowErrors {
            row: 3,
            errors: vec!["Invalid price format".to_string()],
        }],
        result.errors
    );

    // Both valid products landed
    let product = database
        .find_product_by_sku("SKU001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!("Product 1", product.name);
    assert_eq!(Decimal::new(1000, 2), product.price);
    assert_eq!(100, product.stock_quantity);
    assert_eq!(ProductStatus::Active, product.status);

    assert!(database
        .find_product_by_sku("SKU002")
        .await
        .unwrap()
        .is_none());

    // The audit log reached its terminal state with matching counts
    let log = ImportLog::find_by_id(result.import_log_id.unwrap())
        .one(database)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ImportStatus::PartiallyCompleted, log.status);
    assert_eq!(3, log.total_rows);
    assert_eq!(
        log.total_rows,
        log.imported_rows + log.updated_rows + log.invalid_rows + log.duplicate_rows
    );
    assert!(log.completed_at.is_some());
    assert!(log.processing_time_seconds.unwrap() >= 0);
    assert!(log.file_hash.is_some());
}

#[tokio::test]
async fn test_reimport_without_update_existing_counts_duplicates() {
    let (state, _dir) = test_state().await;

    run_import(&state, MIXED_CSV, options()).await;

    let result = run_import(
        &state,
        MIXED_CSV,
        ImportOptions {
            update_existing: false,
            ..options()
        },
    )
    .await;

    assert_eq!(3, result.total);
    assert_eq!(0, result.imported);
    assert_eq!(0, result.updated);
    assert_eq!(1, result.invalid);
    assert_eq!(2, result.duplicates);

    // The original rows are untouched
    let database = state.database().await.unwrap();
    let product = database
        .find_product_by_sku("SKU001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Decimal::new(1000, 2), product.price);
}

#[tokio::test]
async fn test_reimport_updates_existing_products() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    run_import(&state, MIXED_CSV, options()).await;

    let updated_csv = "\
sku,name,price,stock_quantity,status
SKU001,Product 1 v2,12.50,90,inactive
SKU003,Product 3 v2,35.00,310,discontinued
";

    let result = run_import(&state, updated_csv, options()).await;
    assert_eq!(2, result.total);
    assert_eq!(0, result.imported);
    assert_eq!(2, result.updated);
    assert_eq!(100.0, result.success_rate);

    let product = database
        .find_product_by_sku("SKU001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!("Product 1 v2", product.name);
    assert_eq!(Decimal::new(1250, 2), product.price);
    assert_eq!(90, product.stock_quantity);
    assert_eq!(ProductStatus::Inactive, product.status);
}

#[tokio::test]
async fn test_header_only_file() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let result = run_import(&state, "sku,name,price,stock_quantity\n", options()).await;

    assert_eq!(0, result.total);
    assert_eq!(0.0, result.success_rate);
    assert!(result.errors.is_empty());

    let log = ImportLog::find_by_id(result.import_log_id.unwrap())
        .one(database)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ImportStatus::Completed, log.status);
}

#[tokio::test]
async fn test_missing_required_columns() {
    let (state, _dir) = test_state().await;

    let csv = "sku,name,stock_quantity\nS1,P,5\n";

    assert!(matches!(
        import(
            &state,
            &ProductRowHandler,
            "products.csv",
            csv.as_bytes(),
            options()
        )
        .await,
        Err(ServerError::Validation { .. })
    ));

    let missing = validate_header(&ProductRowHandler, csv.as_bytes()).unwrap();
    assert_eq!(vec!["price".to_string()], missing);

    let complete = "sku,name,price,stock_quantity\n";
    assert!(validate_header(&ProductRowHandler, complete.as_bytes())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_validate_only_persists_nothing() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let result = run_import(
        &state,
        MIXED_CSV,
        ImportOptions {
            validate_only: true,
            ..options()
        },
    )
    .await;

    assert_eq!(3, result.total);
    assert_eq!(2, result.imported);
    assert_eq!(1, result.invalid);
    assert!(result.import_log_id.is_none());

    // Neither products nor logs were written
    assert!(database
        .find_product_by_sku("SKU001")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        0,
        ImportLog::find().all(database).await.unwrap().len()
    );
}

#[tokio::test]
async fn test_abort_on_first_invalid_row() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let result = import(
        &state,
        &ProductRowHandler,
        "products.csv",
        MIXED_CSV.as_bytes(),
        ImportOptions {
            skip_invalid: false,
            ..options()
        },
    )
    .await;

    match result {
        Err(ServerError::ImportAborted { row, errors }) => {
            assert_eq!(3, row);
            assert_eq!(vec!["Invalid price format".to_string()], errors);
        }
        other => panic!("Expected ImportAborted, got {:?}", other.map(|_| ())),
    }

    // The first valid row was already processed, the rest never ran
    assert!(database
        .find_product_by_sku("SKU001")
        .await
        .unwrap()
        .is_some());
    assert!(database
        .find_product_by_sku("SKU003")
        .await
        .unwrap()
        .is_none());

    let log = ImportLog::find()
        .one(database)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ImportStatus::Failed, log.status);
    assert_eq!(
        log.total_rows,
        log.imported_rows + log.updated_rows + log.invalid_rows + log.duplicate_rows
    );
}

#[tokio::test]
async fn test_primary_image_resolution_via_existing_upload() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    // A completed upload named logo.png, with no image rows
    let data = b"png bytes, allegedly";
    let upload = uploads::initialize(
        &state,
        InitializeUploadRequest {
            original_filename: "logo.png".to_string(),
            total_chunks: 1,
            total_size: data.len() as u64,
            checksum_sha256: depot::hash::Hash::sha256_from_bytes(data).to_hex(),
            mime_type: Some("image/png".to_string()),
        },
    )
    .await
    .unwrap();

    uploads::receive_chunk(
        &state,
        UploadChunkRequest {
            upload_id: upload.id.clone(),
            chunk_index: 0,
            total_chunks: Some(1),
            chunk_data: BASE64_STANDARD.encode(data),
            checksum: depot::hash::Hash::sha256_from_bytes(data).to_hex(),
            original_filename: None,
            chunk_size: None,
            total_size: None,
        },
    )
    .await
    .unwrap();

    uploads::complete(&state, &upload.id, false).await.unwrap();
    assert!(database
        .find_images_for_upload(&upload.id)
        .await
        .unwrap()
        .is_empty());

    let csv = "\
sku,name,price,stock_quantity,primary_image
SKU010,Pictured Product,5.00,10,logo.png
";

    let result = run_import(&state, csv, options()).await;
    assert_eq!(1, result.imported);

    // One original image row was created for the upload...
    let images = database.find_images_for_upload(&upload.id).await.unwrap();
    assert_eq!(1, images.len());
    assert_eq!(ImageVariant::Original, images[0].variant);
    assert_eq!(upload.blob_path(), images[0].path);

    // ...and attached to the product
    let product = database
        .find_product_by_sku("SKU010")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(images[0].id.clone()), product.primary_image_id);
}

#[tokio::test]
async fn test_primary_image_attachment_is_idempotent() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let now = chrono::Utc::now();
    let product = crate::database::entity::product::ActiveModel {
        sku: sea_orm::ActiveValue::Set("SKU-A".to_string()),
        name: sea_orm::ActiveValue::Set("A".to_string()),
        description: sea_orm::ActiveValue::Set(None),
        price: sea_orm::ActiveValue::Set(Decimal::new(100, 2)),
        stock_quantity: sea_orm::ActiveValue::Set(1),
        status: sea_orm::ActiveValue::Set(ProductStatus::Active),
        primary_image_id: sea_orm::ActiveValue::Set(None),
        created_at: sea_orm::ActiveValue::Set(now),
        updated_at: sea_orm::ActiveValue::Set(now),
        ..Default::default()
    }
    .insert(database)
    .await
    .unwrap();

    database
        .attach_primary_image(product.id, "image-1")
        .await
        .unwrap();
    database
        .attach_primary_image(product.id, "image-1")
        .await
        .unwrap();

    let fetched = database
        .find_product_by_sku("SKU-A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some("image-1".to_string()), fetched.primary_image_id);
}

#[tokio::test]
async fn test_unresolvable_image_reference_does_not_fail_the_row() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    // Bare filename with no matching image or upload; not a path,
    // not a URL
    let csv = "\
sku,name,price,stock_quantity,primary_image
SKU020,Unpictured,5.00,10,nowhere.png
";

    let result = run_import(&state, csv, options()).await;
    assert_eq!(1, result.imported);
    assert_eq!(0, result.invalid);

    let product = database
        .find_product_by_sku("SKU020")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(None, product.primary_image_id);
}

#[tokio::test]
async fn test_history_and_detail() {
    let (state, _dir) = test_state().await;

    let first = run_import(&state, MIXED_CSV, options()).await;
    run_import(&state, "sku,name,price,stock_quantity\n", options()).await;

    let page = history(&state, 1, 10).await.unwrap();
    assert_eq!(2, page.total);
    assert_eq!(2, page.imports.len());
    assert_eq!(1, page.page);

    let detail = detail(&state, first.import_log_id.unwrap()).await.unwrap();
    assert_eq!("partially_completed", detail.import.status);
    assert_eq!(3, detail.summary.total);
    assert_eq!(2, detail.summary.processed);
    assert_eq!(66.67, detail.summary.success_rate);

    assert!(matches!(
        super::detail(&state, 999_999).await,
        Err(ServerError::NoSuchImport)
    ));
}

#[tokio::test]
async fn test_statistics_window() {
    let (state, _dir) = test_state().await;

    run_import(&state, MIXED_CSV, options()).await;
    run_import(
        &state,
        MIXED_CSV,
        ImportOptions {
            update_existing: false,
            ..options()
        },
    )
    .await;

    let response = statistics(&state, 30).await.unwrap();
    let stats = response.statistics;

    assert_eq!(2, stats.total_imports);
    assert_eq!(2, stats.partially_completed);
    assert_eq!(6, stats.total_rows);
    assert_eq!(2, stats.imported_rows);
    assert_eq!(2, stats.invalid_rows);
    assert_eq!(2, stats.duplicate_rows);

    // 2 of 6 rows processed over the window
    assert_eq!(33.33, stats.success_rate);

    assert!(response.period.from < response.period.to);
}

#[tokio::test]
async fn test_concurrent_imports_produce_separate_logs() {
    let (state, _dir) = test_state().await;
    let database = state.database().await.unwrap();

    let (a, b) = tokio::join!(
        import(
            &state,
            &ProductRowHandler,
            "a.csv",
            MIXED_CSV.as_bytes(),
            options()
        ),
        import(
            &state,
            &ProductRowHandler,
            "b.csv",
            MIXED_CSV.as_bytes(),
            options()
        ),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a.import_log_id, b.import_log_id);

    // Same file hash recorded on both; no deduplication by content
    let logs = ImportLog::find().all(database).await.unwrap();
    assert_eq!(2, logs.len());
    assert_eq!(logs[0].file_hash, logs[1].file_hash);
}

#[tokio::test]
async fn test_row_numbering_accounts_for_header() {
    let (state, _dir) = test_state().await;

    let csv = "\
sku,name,price,stock_quantity
SKU001,First,1.00,1
,Broken,2.00,2
SKU003,Third,bad,3
";

    let result = run_import(&state, csv, options()).await;
    assert_eq!(2, result.invalid);

    let rows: Vec<u64> = result.errors.iter().map(|e| e.row).collect();
    assert_eq!(vec![3, 4], rows);

    assert_eq!(
        vec!["SKU is required".to_string()],
        result.errors[0].errors
    );
}
