use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Structural description of the store's user-visible relations at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableDef>,
    pub views: Vec<TableDef>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub schema_name: String,
    pub table_name: String,
    /// In ordinal position order.
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_expr: Option<String>,
    pub length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default_expr: None,
            length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_numeric(mut self, precision: i32, scale: Option<i32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }
}

/// One row of the relations-with-columns catalog queries. Column fields are
/// NULL for relations without visible columns (LEFT JOIN).
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub data_type: Option<String>,
    pub is_nullable: Option<String>,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

impl CatalogRow {
    pub fn column(&self) -> Option<ColumnDef> {
        let name = self.column_name.clone()?;
        Some(ColumnDef {
            name,
            data_type: self.data_type.clone().unwrap_or_default(),
            nullable: self.is_nullable.as_deref() != Some("NO"),
            default_expr: self.column_default.clone(),
            length: self.character_maximum_length,
            precision: self.numeric_precision,
            scale: self.numeric_scale,
        })
    }
}
