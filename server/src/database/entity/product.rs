//! A catalogue product.

use sea_orm::entity::prelude::*;

pub type ProductModel = Model;

/// Lifecycle status of a product.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum ProductStatus {
    #[sea_orm(string_value = "A")]
    Active,

    #[sea_orm(string_value = "I")]
    Inactive,

    #[sea_orm(string_value = "D")]
    Discontinued,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Discontinued => "discontinued",
        }
    }

    /// Parses the lowercase status name used in CSV files.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "discontinued" => Some(Self::Discontinued),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A catalogue row keyed by its natural SKU.
///
/// `primary_image_id` is a weak reference: it does not own the image
/// and must tolerate the referent being absent.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "product")]
pub struct Model {
    /// Unique numeric ID of the product.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The unique natural key.
    #[sea_orm(unique)]
    pub sku: String,

    pub name: String,

    pub description: Option<String>,

    /// Non-negative price with two-digit scale.
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,

    /// Non-negative stock count.
    pub stock_quantity: i32,

    pub status: ProductStatus,

    /// Weak reference to the primary image.
    pub primary_image_id: Option<String>,

    /// Timestamp when the product was created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the last mutation.
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
