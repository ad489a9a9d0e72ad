//! An image variant derived from a completed upload.

use sea_orm::entity::prelude::*;

pub type ImageModel = Model;

/// A variant of an uploaded image.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum ImageVariant {
    /// The assembled blob itself.
    #[sea_orm(string_value = "O")]
    Original,

    /// Longest edge at most 256 px.
    #[sea_orm(string_value = "S")]
    Small,

    /// Longest edge at most 512 px.
    #[sea_orm(string_value = "M")]
    Medium,

    /// Longest edge at most 1024 px.
    #[sea_orm(string_value = "L")]
    Large,
}

impl ImageVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Maximum dimension of the longer edge, in pixels.
    ///
    /// `None` means the variant is never resized.
    pub fn max_dimension(&self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::Small => Some(256),
            Self::Medium => Some(512),
            Self::Large => Some(1024),
        }
    }

    /// All resized variants, smallest first.
    pub fn resized() -> [Self; 3] {
        [Self::Small, Self::Medium, Self::Large]
    }
}

impl std::fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One image variant (original or resized) derived from an upload.
///
/// An upload may exist without any image rows (prior to variant
/// generation); an image cannot exist without its upload. The pair
/// `(upload_id, variant)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "image")]
pub struct Model {
    /// Opaque unique ID of the image.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The upload this image derives from.
    #[sea_orm(indexed)]
    pub upload_id: String,

    /// Which variant this image is.
    pub variant: ImageVariant,

    /// Path of the encoded image in the blob store.
    pub path: String,

    /// Pixel width, when the image has been decoded.
    pub width: Option<i32>,

    /// Pixel height, when the image has been decoded.
    pub height: Option<i32>,

    /// Size of the encoded image, in bytes.
    pub size_bytes: i64,

    /// MIME type of the encoded image.
    pub mime_type: String,

    /// Timestamp when the image row was created.
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::upload::Entity",
        from = "Column::UploadId",
        to = "super::upload::Column::Id"
    )]
    Upload,
}

impl Related<super::upload::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Upload.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
