//! CSV decoding and per-row validation.
//!
//! The first record is the header. Required columns must be present;
//! unknown columns are tolerated and ignored. Records are consumed
//! lazily so memory does not grow with row count.

use std::collections::HashMap;
use std::str::FromStr;

use csv::StringRecord;
use rust_decimal::Decimal;

use crate::database::entity::product::ProductStatus;

/// Columns every product CSV must carry.
pub const REQUIRED_COLUMNS: &[&str] = &["sku", "name", "price", "stock_quantity"];

/// Columns recognized when present.
pub const OPTIONAL_COLUMNS: &[&str] = &["description", "status", "primary_image"];

/// A parsed CSV header, mapping recognized column names to indices.
#[derive(Debug, Clone)]
pub struct CsvHeader {
    index: HashMap<String, usize>,
}

impl CsvHeader {
    /// Parses the header record. Column names are matched
    /// case-insensitively and surrounding whitespace is ignored.
    pub fn parse(record: &StringRecord) -> Self {
        let index = record
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
            .collect();

        Self { index }
    }

    /// Returns the required columns that are absent.
    pub fn missing_required(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.index.contains_key(**c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Returns a field's trimmed value, if the column exists and the
    /// value is non-empty.
    pub fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.index
            .get(column)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// One validated product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRow {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub status: ProductStatus,
    pub primary_image: Option<String>,
}

/// Validates one record against the product schema.
///
/// All failed checks are reported together, one message per field.
pub fn parse_product_row(header: &CsvHeader, record: &StringRecord) -> Result<ProductRow, Vec<String>> {
    let mut errors = Vec::new();

    let sku = match header.get(record, "sku") {
        Some(sku) => Some(sku.to_string()),
        None => {
            errors.push("SKU is required".to_string());
            None
        }
    };

    let name = match header.get(record, "name") {
        Some(name) => Some(name.to_string()),
        None => {
            errors.push("Name is required".to_string());
            None
        }
    };

    let price = match header.get(record, "price") {
        Some(raw) => match Decimal::from_str(raw) {
            Ok(price) if price.is_sign_negative() => {
                errors.push("Price cannot be negative".to_string());
                None
            }
            Ok(price) => Some(price.round_dp(2)),
            Err(_) => {
                errors.push("Invalid price format".to_string());
                None
            }
        },
        None => {
            errors.push("Price is required".to_string());
            None
        }
    };

    let stock_quantity = match header.get(record, "stock_quantity") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(quantity) if quantity < 0 => {
                errors.push("Stock quantity cannot be negative".to_string());
                None
            }
            Ok(quantity) if quantity > i32::MAX as i64 => {
                errors.push("Invalid stock quantity".to_string());
                None
            }
            Ok(quantity) => Some(quantity as i32),
            Err(_) => {
                errors.push("Invalid stock quantity".to_string());
                None
            }
        },
        None => {
            errors.push("Stock quantity is required".to_string());
            None
        }
    };

    let status = match header.get(record, "status") {
        Some(raw) => match ProductStatus::from_str_opt(raw) {
            Some(status) => Some(status),
            None => {
                errors.push("Invalid status value".to_string());
                None
            }
        },
        None => Some(ProductStatus::Active),
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ProductRow {
        sku: sku.unwrap(),
        name: name.unwrap(),
        description: header.get(record, "description").map(str::to_string),
        price: price.unwrap(),
        stock_quantity: stock_quantity.unwrap(),
        status: status.unwrap(),
        primary_image: header.get(record, "primary_image").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(columns: &[&str]) -> CsvHeader {
        CsvHeader::parse(&StringRecord::from(columns.to_vec()))
    }

    fn record_of(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_missing_required_columns() {
        let header = header_of(&["sku", "name"]);
        assert_eq!(
            vec!["price".to_string(), "stock_quantity".to_string()],
            header.missing_required(REQUIRED_COLUMNS)
        );

        let header = header_of(&["sku", "name", "price", "stock_quantity"]);
        assert!(header.missing_required(REQUIRED_COLUMNS).is_empty());
    }

    #[test]
    fn test_header_is_case_insensitive() {
        let header = header_of(&["SKU", " Name ", "PRICE", "stock_quantity"]);
        assert!(header.missing_required(REQUIRED_COLUMNS).is_empty());
    }

    #[test]
    fn test_unknown_columns_are_ignored() {
        let header = header_of(&["sku", "name", "price", "stock_quantity", "color"]);
        let record = record_of(&["S1", "Widget", "10.00", "5", "red"]);

        let row = parse_product_row(&header, &record).unwrap();
        assert_eq!("S1", row.sku);
        assert_eq!(ProductStatus::Active, row.status);
    }

    #[test]
    fn test_valid_row() {
        let header = header_of(&[
            "sku",
            "name",
            "description",
            "price",
            "stock_quantity",
            "status",
            "primary_image",
        ]);
        let record = record_of(&[
            "SKU001",
            "Product 1",
            "A fine product",
            "19.999",
            "100",
            "inactive",
            "logo.png",
        ]);

        let row = parse_product_row(&header, &record).unwrap();
        assert_eq!("SKU001", row.sku);
        assert_eq!(Decimal::new(2000, 2), row.price);
        assert_eq!(100, row.stock_quantity);
        assert_eq!(ProductStatus::Inactive, row.status);
        assert_eq!(Some("logo.png".to_string()), row.primary_image);
    }

    #[test]
    fn test_invalid_price() {
        let header = header_of(&["sku", "name", "price", "stock_quantity"]);

        let errors =
            parse_product_row(&header, &record_of(&["S1", "P", "invalid", "1"])).unwrap_err();
        assert_eq!(vec!["Invalid price format".to_string()], errors);

        let errors = parse_product_row(&header, &record_of(&["S1", "P", "nan", "1"])).unwrap_err();
        assert_eq!(vec!["Invalid price format".to_string()], errors);

        let errors =
            parse_product_row(&header, &record_of(&["S1", "P", "-4.20", "1"])).unwrap_err();
        assert_eq!(vec!["Price cannot be negative".to_string()], errors);
    }

    #[test]
    fn test_negative_stock_is_rejected() {
        let header = header_of(&["sku", "name", "price", "stock_quantity"]);

        let errors =
            parse_product_row(&header, &record_of(&["S1", "P", "1.00", "-3"])).unwrap_err();
        assert_eq!(vec!["Stock quantity cannot be negative".to_string()], errors);
    }

    #[test]
    fn test_invalid_status() {
        let header = header_of(&["sku", "name", "price", "stock_quantity", "status"]);

        let errors = parse_product_row(&header, &record_of(&["S1", "P", "1.00", "1", "on-fire"]))
            .unwrap_err();
        assert_eq!(vec!["Invalid status value".to_string()], errors);
    }

    #[test]
    fn test_multiple_errors_reported_together() {
        let header = header_of(&["sku", "name", "price", "stock_quantity"]);

        let errors = parse_product_row(&header, &record_of(&["", "", "oops", "-1"])).unwrap_err();
        assert_eq!(
            vec![
                "SKU is required".to_string(),
                "Name is required".to_string(),
                "Invalid price format".to_string(),
                "Stock quantity cannot be negative".to_string(),
            ],
            errors
        );
    }

    #[test]
    fn test_short_record_counts_as_missing() {
        let header = header_of(&["sku", "name", "price", "stock_quantity"]);

        let errors = parse_product_row(&header, &record_of(&["S1", "P"])).unwrap_err();
        assert_eq!(
            vec![
                "Price is required".to_string(),
                "Stock quantity is required".to_string(),
            ],
            errors
        );
    }
}
