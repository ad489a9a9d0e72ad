use super::*;

use crate::error::DepotError;

#[test]
fn test_basic() {
    let hash = Hash::sha256_from_bytes(b"helloworld");

    let expected = "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";
    assert_eq!(expected, hash.to_hex());

    assert_eq!(hash, Hash::from_hex(expected).unwrap());
}

#[test]
fn test_from_hex_uppercase() {
    let lower = "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";
    let upper = lower.to_ascii_uppercase();

    let parsed = Hash::from_hex(&upper).unwrap();
    assert_eq!(lower, parsed.to_hex());
}

#[test]
fn test_from_hex_invalid() {
    assert!(matches!(
        Hash::from_hex("deadbeef"),
        Err(DepotError::HashError(Error::InvalidHashStringLength {
            actual: 8,
            ..
        }))
    ));

    assert!(matches!(
        Hash::from_hex(&"g".repeat(64)),
        Err(DepotError::HashError(Error::InvalidHexHash(_)))
    ));
}

#[test]
fn test_verify() {
    let a = Hash::sha256_from_bytes(b"hello");
    let b = Hash::sha256_from_bytes(b"hello");
    let c = Hash::sha256_from_bytes(b"world");

    assert!(a.verify(&b));
    assert!(!a.verify(&c));
}

#[test]
fn test_serde_round_trip() {
    let hash = Hash::sha256_from_bytes(b"hello");
    let json = serde_json::to_string(&hash).unwrap();

    assert_eq!(
        json,
        "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
    );

    let back: Hash = serde_json::from_str(&json).unwrap();
    assert_eq!(hash, back);
}

#[tokio::test]
async fn test_sha256_from_reader() {
    let mut reader = std::io::Cursor::new(b"helloworld".to_vec());
    let (hash, size) = Hash::sha256_from_reader(&mut reader).await.unwrap();

    assert_eq!(10, size);
    assert_eq!(
        "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af",
        hash.to_hex()
    );
}
