//! DDL generation for entity tables
//!
//! Used to bootstrap a PostgreSQL table from a declared [`EntityDescriptor`].

use crate::schema::EntityDescriptor;
use crate::sql::sanitize::quote_identifier;
use crate::types::{ColumnDefinition, ColumnType};

/// DDL generator for entity tables
pub struct DdlGenerator;

impl DdlGenerator {
    /// Generate CREATE TABLE for an entity.
    ///
    /// A single-column primary key without a default gets one: an identity for
    /// integer keys, a random UUID for text keys.
    pub fn generate_create_table(entity: &EntityDescriptor) -> String {
        let generated_key = match entity.primary_key() {
            [pk] => Some(pk.as_str()),
            _ => None,
        };

        let mut column_defs: Vec<String> = entity
            .columns()
            .iter()
            .map(|col| Self::format_column_definition(col, generated_key == Some(col.name.as_str())))
            .collect();

        let pk: Vec<String> = entity
            .primary_key()
            .iter()
            .map(|c| quote_identifier(c))
            .collect();
        column_defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(entity.table()),
            column_defs.join(", ")
        )
    }

    /// Generate DROP TABLE statement
    pub fn generate_drop_table(table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table_name))
    }

    /// Format a single column definition for CREATE TABLE
    pub fn format_column_definition(col: &ColumnDefinition, generated_key: bool) -> String {
        let mut parts = vec![
            quote_identifier(&col.name),
            col.column_type.to_sql_type(&col.name),
        ];

        if col.unique {
            parts.push("UNIQUE".to_string());
        }

        if !col.nullable {
            parts.push("NOT NULL".to_string());
        }

        match (&col.default_value, &col.column_type, generated_key) {
            (Some(default), _, _) => parts.push(format!("DEFAULT {}", default)),
            (None, ColumnType::Integer, true) => {
                parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string())
            }
            (None, ColumnType::String, true) => {
                parts.push("DEFAULT gen_random_uuid()::text".to_string())
            }
            _ => {}
        }

        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_with_identity_key() {
        let entity = EntityDescriptor::builder("projects")
            .column(ColumnDefinition::new("id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("name", ColumnType::String).not_null())
            .column(ColumnDefinition::new("budget", ColumnType::decimal(10, 2)).default("0"))
            .column(ColumnDefinition::new("is_deleted", ColumnType::Boolean).default("false"))
            .build()
            .unwrap();

        let sql = DdlGenerator::generate_create_table(&entity);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"projects\" (\
             \"id\" BIGINT NOT NULL GENERATED BY DEFAULT AS IDENTITY, \
             \"name\" TEXT NOT NULL, \
             \"budget\" NUMERIC(10,2) DEFAULT 0, \
             \"is_deleted\" BOOLEAN DEFAULT false, \
             PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_create_table_with_text_key() {
        let entity = EntityDescriptor::builder("tags")
            .column(ColumnDefinition::new("slug", ColumnType::String))
            .primary_key(["slug"])
            .build()
            .unwrap();
        let sql = DdlGenerator::generate_create_table(&entity);
        assert!(sql.contains("\"slug\" TEXT DEFAULT gen_random_uuid()::text"));
    }

    #[test]
    fn test_composite_key_has_no_generated_default() {
        let entity = EntityDescriptor::builder("memberships")
            .column(ColumnDefinition::new("project_id", ColumnType::Integer))
            .column(ColumnDefinition::new("user_id", ColumnType::Integer))
            .primary_key(["project_id", "user_id"])
            .build()
            .unwrap();
        let sql = DdlGenerator::generate_create_table(&entity);
        assert!(!sql.contains("IDENTITY"));
        assert!(sql.ends_with("PRIMARY KEY (\"project_id\", \"user_id\"))"));
    }

    #[test]
    fn test_unique_column() {
        let col = ColumnDefinition::new("email", ColumnType::String).unique().not_null();
        assert_eq!(
            DdlGenerator::format_column_definition(&col, false),
            "\"email\" TEXT UNIQUE NOT NULL"
        );
    }

    #[test]
    fn test_generate_drop_table() {
        assert_eq!(
            DdlGenerator::generate_drop_table("my\"table"),
            "DROP TABLE IF EXISTS \"my\"\"table\" CASCADE"
        );
    }
}
