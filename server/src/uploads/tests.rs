use super::*;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

use crate::testing::test_state;

/// SHA-256 of "helloworld".
const HELLOWORLD_SHA256: &str = "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";

fn init_request(
    filename: &str,
    total_chunks: u32,
    total_size: u64,
    checksum: &str,
) -> InitializeUploadRequest {
    InitializeUploadRequest {
        original_filename: filename.to_string(),
        total_chunks,
        total_size,
        checksum_sha256: checksum.to_string(),
        mime_type: None,
    }
}

fn chunk_request(upload_id: &str, chunk_index: u32, data: &[u8]) -> UploadChunkRequest {
    UploadChunkRequest {
        upload_id: upload_id.to_string(),
        chunk_index,
        total_chunks: None,
        chunk_data: BASE64_STANDARD.encode(data),
        checksum: Hash::sha256_from_bytes(data).to_hex(),
        original_filename: None,
        chunk_size: Some(data.len() as u64),
        total_size: None,
    }
}

#[tokio::test]
async fn test_happy_path_two_chunks() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();
    assert_eq!(UploadStatus::Pending, upload.status);

    let receipt = receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    assert_eq!(1, receipt.uploaded_chunks);
    assert_eq!("uploading", receipt.status);
    assert_eq!(50.0, receipt.progress);

    let receipt = receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    assert_eq!(2, receipt.uploaded_chunks);

    let (completed, images) = complete(&state, &upload.id, true).await.unwrap();
    assert_eq!(UploadStatus::Completed, completed.status);
    assert!(completed.completed_at.is_some());

    // The assembled blob is bit-for-bit the concatenation
    assert_eq!(
        b"helloworld".to_vec(),
        storage.get(&completed.blob_path()).await.unwrap()
    );

    // The transient chunk directory is gone
    assert!(!storage
        .path_on_fs(&completed.chunk_prefix())
        .exists());

    // Non-image upload: just the original image row
    assert_eq!(1, images.len());
    assert_eq!(ImageVariant::Original, images[0].variant);

    assert!(verify_checksum(&state, &upload.id).await.unwrap());
}

#[tokio::test]
async fn test_chunk_resend_is_idempotent() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();

    // Identical re-send: success, no change
    let receipt = receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    assert_eq!(1, receipt.uploaded_chunks);
    assert_eq!("uploading", receipt.status);

    assert_eq!(
        b"hello".to_vec(),
        storage.get(&upload.chunk_path(0)).await.unwrap()
    );
}

#[tokio::test]
async fn test_chunk_checksum_mismatch_is_reported() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    let mut request = chunk_request(&upload.id, 0, b"hello");
    request.checksum = Hash::sha256_from_bytes(b"other").to_hex();

    assert!(matches!(
        receive_chunk(&state, request).await,
        Err(ServerError::ChecksumMismatch { context: "chunk" })
    ));

    // No state change: the chunk can be retried
    let database = state.database().await.unwrap();
    let current = database.find_upload(&upload.id).await.unwrap();
    assert_eq!(0, current.uploaded_chunks);
    assert_eq!(UploadStatus::Pending, current.status);
}

#[tokio::test]
async fn test_malformed_base64_is_rejected() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    let mut request = chunk_request(&upload.id, 0, b"hello");
    request.chunk_data = "this is not base64!!!".to_string();

    assert!(matches!(
        receive_chunk(&state, request).await,
        Err(ServerError::Validation { .. })
    ));
}

#[tokio::test]
async fn test_chunk_index_out_of_range() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    assert!(matches!(
        receive_chunk(&state, chunk_request(&upload.id, 2, b"extra")).await,
        Err(ServerError::Validation { .. })
    ));
}

#[tokio::test]
async fn test_complete_with_missing_chunks() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();

    match complete(&state, &upload.id, true).await {
        Err(ServerError::MissingChunks { count, missing }) => {
            assert_eq!(1, count);
            assert_eq!(vec![0], missing);
        }
        other => panic!("Expected MissingChunks, got {:?}", other.map(|_| ())),
    }

    // Recoverable: send the missing chunk and complete
    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    let (completed, _) = complete(&state, &upload.id, true).await.unwrap();
    assert_eq!(UploadStatus::Completed, completed.status);
}

#[tokio::test]
async fn test_complete_checksum_mismatch_marks_failed() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let bogus = "0".repeat(64);
    let upload = initialize(&state, init_request("hello.txt", 2, 10, &bogus))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();

    assert!(matches!(
        complete(&state, &upload.id, true).await,
        Err(ServerError::ChecksumMismatch {
            context: "assembled file"
        })
    ));

    let database = state.database().await.unwrap();
    let failed = database.find_upload(&upload.id).await.unwrap();
    assert_eq!(UploadStatus::Failed, failed.status);
    assert_eq!(Some("checksum mismatch".to_string()), failed.failure_reason);

    // The bad assembled blob is deleted, and so are the chunks
    assert!(!storage.exists(&failed.blob_path()).await.unwrap());
    assert!(!storage.path_on_fs(&failed.chunk_prefix()).exists());

    // Subsequent complete reports the conflict
    assert!(matches!(
        complete(&state, &upload.id, true).await,
        Err(ServerError::StateConflict { .. })
    ));
}

#[tokio::test]
async fn test_complete_twice_is_idempotent() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();

    let (first, first_images) = complete(&state, &upload.id, true).await.unwrap();
    let (second, second_images) = complete(&state, &upload.id, true).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(first_images.len(), second_images.len());
}

#[tokio::test]
async fn test_chunk_after_complete_reports_success() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    complete(&state, &upload.id, true).await.unwrap();

    // A retry from a client that missed the response is a success
    let receipt = receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    assert_eq!("completed", receipt.status);
    assert_eq!(2, receipt.uploaded_chunks);
}

#[tokio::test]
async fn test_resume_after_partial_upload() {
    let (state, _dir) = test_state().await;

    let data = b"aaaaabbbbbcccccdddddeeeee";
    let checksum = Hash::sha256_from_bytes(data).to_hex();

    let upload = initialize(&state, init_request("parts.bin", 5, 25, &checksum))
        .await
        .unwrap();

    for index in [0u32, 2, 4] {
        let chunk = &data[index as usize * 5..(index as usize + 1) * 5];
        receive_chunk(&state, chunk_request(&upload.id, index, chunk))
            .await
            .unwrap();
    }

    let resume = resume(&state, &upload.id).await.unwrap();
    assert!(resume.can_resume);
    assert_eq!(vec![0, 2, 4], resume.uploaded_chunks);
    assert_eq!(vec![1, 3], resume.missing_chunks);
    assert_eq!(60.0, resume.progress);

    // Uploaded and missing sets are disjoint and cover the range
    let mut all: Vec<u32> = resume
        .uploaded_chunks
        .iter()
        .chain(resume.missing_chunks.iter())
        .copied()
        .collect();
    all.sort();
    assert_eq!(vec![0, 1, 2, 3, 4], all);
}

#[tokio::test]
async fn test_initialize_deduplicates_completed_uploads() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    complete(&state, &upload.id, true).await.unwrap();

    // Same checksum, uppercase on the wire: the completed session
    // is returned as-is
    let deduplicated = initialize(
        &state,
        init_request(
            "other-name.txt",
            4,
            10,
            &HELLOWORLD_SHA256.to_ascii_uppercase(),
        ),
    )
    .await
    .unwrap();

    assert_eq!(upload.id, deduplicated.id);
    assert_eq!(UploadStatus::Completed, deduplicated.status);
}

#[tokio::test]
async fn test_initialize_validation() {
    let (state, _dir) = test_state().await;

    // Chunk count bounds
    assert!(matches!(
        initialize(&state, init_request("a", 0, 10, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));
    assert!(matches!(
        initialize(&state, init_request("a", 10_001, MAX_TOTAL_SIZE, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));

    // Size bounds
    assert!(matches!(
        initialize(&state, init_request("a", 1, 0, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));
    assert!(matches!(
        initialize(&state, init_request("a", 1, MAX_TOTAL_SIZE + 1, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));

    // Implied chunk size bounds
    assert!(matches!(
        initialize(&state, init_request("a", 1, MAX_CHUNK_SIZE + 1, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));
    assert!(matches!(
        initialize(&state, init_request("a", 10_000, 6 * 1024, HELLOWORLD_SHA256)).await,
        Err(ServerError::Validation { .. })
    ));

    // Checksum shape
    assert!(matches!(
        initialize(&state, init_request("a", 1, 10, "zz")).await,
        Err(ServerError::Validation { .. })
    ));
    assert!(matches!(
        initialize(&state, init_request("a", 1, 10, &"g".repeat(64))).await,
        Err(ServerError::Validation { .. })
    ));
}

#[tokio::test]
async fn test_initialize_boundaries() {
    let (state, _dir) = test_state().await;

    // A single-chunk upload at the minimum size
    let small = initialize(&state, init_request("tiny.bin", 1, 1, HELLOWORLD_SHA256))
        .await
        .unwrap();
    assert_eq!(1, small.total_chunks);

    // The maximum chunk count with valid implied chunk size
    let big = initialize(
        &state,
        init_request(
            "big.bin",
            MAX_TOTAL_CHUNKS,
            MAX_TOTAL_CHUNKS as u64 * MIN_CHUNK_SIZE,
            &"a".repeat(64),
        ),
    )
    .await
    .unwrap();
    assert_eq!(MAX_TOTAL_CHUNKS as i32, big.total_chunks);

    // 5 GiB - 1 in maximal chunks
    let huge = initialize(
        &state,
        init_request("huge.bin", 52, MAX_TOTAL_SIZE - 1, &"b".repeat(64)),
    )
    .await
    .unwrap();
    assert_eq!(52, huge.total_chunks);
}

#[tokio::test]
async fn test_single_chunk_round_trip() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let checksum = Hash::sha256_from_bytes(b"solo").to_hex();
    let upload = initialize(&state, init_request("solo.bin", 1, 4, &checksum))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"solo"))
        .await
        .unwrap();

    let (completed, _) = complete(&state, &upload.id, false).await.unwrap();
    assert_eq!(UploadStatus::Completed, completed.status);
    assert_eq!(
        b"solo".to_vec(),
        storage.get(&completed.blob_path()).await.unwrap()
    );
}

#[tokio::test]
async fn test_cancel() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();

    assert!(cancel(&state, &upload.id).await.unwrap());

    let database = state.database().await.unwrap();
    let cancelled = database.find_upload(&upload.id).await.unwrap();
    assert_eq!(UploadStatus::Cancelled, cancelled.status);
    assert_eq!(Some("Cancelled".to_string()), cancelled.failure_reason);
    assert!(!storage.path_on_fs(&cancelled.chunk_prefix()).exists());

    // Further chunks are refused
    assert!(matches!(
        receive_chunk(&state, chunk_request(&upload.id, 1, b"world")).await,
        Err(ServerError::StateConflict { .. })
    ));

    // Cancelling again is a no-op
    assert!(!cancel(&state, &upload.id).await.unwrap());

    // Unknown uploads are a no-op too
    assert!(!cancel(&state, "no-such-upload").await.unwrap());
}

#[tokio::test]
async fn test_cancel_completed_upload_is_refused() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    complete(&state, &upload.id, true).await.unwrap();

    assert!(!cancel(&state, &upload.id).await.unwrap());

    let database = state.database().await.unwrap();
    let current = database.find_upload(&upload.id).await.unwrap();
    assert_eq!(UploadStatus::Completed, current.status);
}

#[tokio::test]
async fn test_status_reporting() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    let report = status(&state, &upload.id).await.unwrap();
    assert_eq!("pending", report.status);
    assert_eq!(0.0, report.progress);

    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();

    let report = status(&state, &upload.id).await.unwrap();
    assert_eq!("uploading", report.status);
    assert_eq!(50.0, report.progress);
    assert_eq!(1, report.uploaded_chunks);

    assert!(matches!(
        status(&state, "no-such-upload").await,
        Err(ServerError::NoSuchUpload)
    ));
}

#[tokio::test]
async fn test_verify_checksum_requires_completion() {
    let (state, _dir) = test_state().await;

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();

    assert!(matches!(
        verify_checksum(&state, &upload.id).await,
        Err(ServerError::StateConflict { .. })
    ));
}

#[tokio::test]
async fn test_verify_checksum_detects_post_complete_mutation() {
    let (state, _dir) = test_state().await;
    let storage = state.storage().await.unwrap();

    let upload = initialize(&state, init_request("hello.txt", 2, 10, HELLOWORLD_SHA256))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 0, b"hello"))
        .await
        .unwrap();
    receive_chunk(&state, chunk_request(&upload.id, 1, b"world"))
        .await
        .unwrap();
    let (completed, _) = complete(&state, &upload.id, false).await.unwrap();

    // Stable across calls
    assert!(verify_checksum(&state, &upload.id).await.unwrap());
    assert!(verify_checksum(&state, &upload.id).await.unwrap());

    // Out-of-band corruption is detected
    storage.put(&completed.blob_path(), b"tampered!!").await.unwrap();
    assert!(!verify_checksum(&state, &upload.id).await.unwrap());
}

#[tokio::test]
async fn test_progress_rounding() {
    let (state, _dir) = test_state().await;

    let data = b"aaabbbccc";
    let checksum = Hash::sha256_from_bytes(data).to_hex();
    let upload = initialize(&state, init_request("thirds.bin", 3, 9, &checksum))
        .await
        .unwrap();

    receive_chunk(&state, chunk_request(&upload.id, 0, b"aaa"))
        .await
        .unwrap();

    // 1/3 => 33.33, two-decimal rounding
    let report = status(&state, &upload.id).await.unwrap();
    assert_eq!(33.33, report.progress);
}
