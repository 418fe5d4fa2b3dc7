//! DDL: data tables, columns, indexes and unique constraints.

use std::collections::HashSet;

use dict_engine_core::backend::DictSchemeBackend;
use dict_engine_core::error::Result;
use dict_engine_core::schema::{
    Dict, DictConstraint, DictField, DictIndex, DELETED_FIELD, ID_FIELD,
};
use rusqlite::{params, Connection};

use crate::engine::SqliteBackend;
use crate::values::{column_type, constraint_name, index_name, quote, scheme_error, table_name};

fn column_definition(field: &DictField) -> String {
    if field.id == ID_FIELD {
        return format!("{} TEXT PRIMARY KEY NOT NULL", quote(ID_FIELD));
    }
    format!("{} {}", quote(&field.id), column_type(field))
}

fn create_index_sql(dict: &Dict, index: &DictIndex) -> String {
    let columns: Vec<String> = index
        .fields
        .iter()
        .map(|f| format!("{} {}", quote(f), index.direction.keyword()))
        .collect();
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&index_name(&dict.id, &index.id)),
        table_name(&dict.id),
        columns.join(", ")
    )
}

/// Unique index over active rows only.
fn create_constraint_sql(dict: &Dict, constraint: &DictConstraint) -> String {
    let columns: Vec<String> = constraint.fields.iter().map(|f| quote(f)).collect();
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}) WHERE {} IS NULL",
        quote(&constraint_name(&dict.id, &constraint.id)),
        table_name(&dict.id),
        columns.join(", "),
        quote(DELETED_FIELD)
    )
}

fn drop_index_sql(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote(name))
}

fn existing_columns(connection: &Connection, dict: &Dict) -> Result<HashSet<String>> {
    let mut statement = connection
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|e| scheme_error(&dict.id, e))?;
    let names = statement
        .query_map(params![format!("d_{}", dict.id)], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<HashSet<_>>>())
        .map_err(|e| scheme_error(&dict.id, e))?;
    Ok(names)
}

impl SqliteBackend {
    fn execute_ddl(&self, dict: &Dict, statements: &[String]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let mut connection = self.connection();
        let savepoint = connection
            .savepoint()
            .map_err(|e| scheme_error(&dict.id, e))?;
        for sql in statements {
            tracing::debug!("DDL for dict '{}': {}", dict.id, sql);
            savepoint
                .execute_batch(sql)
                .map_err(|e| scheme_error(&dict.id, e))?;
        }
        savepoint.commit().map_err(|e| scheme_error(&dict.id, e))
    }
}

impl DictSchemeBackend for SqliteBackend {
    fn create_dict_scheme(&self, dict: &Dict) -> Result<()> {
        let columns: Vec<String> = dict.fields.iter().map(column_definition).collect();
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table_name(&dict.id),
            columns.join(", ")
        )];
        statements.extend(dict.indexes.iter().map(|i| create_index_sql(dict, i)));
        statements.extend(dict.constraints.iter().map(|c| create_constraint_sql(dict, c)));
        self.execute_ddl(dict, &statements)?;
        tracing::info!("Created table for dict '{}'", dict.id);
        Ok(())
    }

    /// Drops changed or removed indexes and constraints first, then alters
    /// columns, then creates new indexes and constraints. Columns are compared
    /// against the physical table, so reapplying the same change is a no-op.
    fn update_dict_scheme(&self, old: &Dict, new: &Dict) -> Result<()> {
        let present = {
            let connection = self.connection();
            existing_columns(&connection, new)?
        };
        let mut statements = Vec::new();

        for index in &old.indexes {
            if new.get_index(&index.id) != Some(index) {
                statements.push(drop_index_sql(&index_name(&old.id, &index.id)));
            }
        }
        for constraint in &old.constraints {
            if new.get_constraint(&constraint.id) != Some(constraint) {
                statements.push(drop_index_sql(&constraint_name(&old.id, &constraint.id)));
            }
        }

        for field in &old.fields {
            if new.field(&field.id).is_none() && present.contains(&field.id) {
                statements.push(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    table_name(&new.id),
                    quote(&field.id)
                ));
            }
        }
        for field in &new.fields {
            if !present.contains(&field.id) {
                statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table_name(&new.id),
                    column_definition(field)
                ));
            }
        }

        statements.extend(new.indexes.iter().map(|i| create_index_sql(new, i)));
        statements.extend(new.constraints.iter().map(|c| create_constraint_sql(new, c)));

        self.execute_ddl(new, &statements)?;
        tracing::info!("Altered table for dict '{}'", new.id);
        Ok(())
    }

    fn rename_dict_field(&self, dict: &Dict, old_field_id: &str, new_field_id: &str) -> Result<()> {
        self.execute_ddl(
            dict,
            &[format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table_name(&dict.id),
                quote(old_field_id),
                quote(new_field_id)
            )],
        )?;
        tracing::info!(
            "Renamed column '{}' to '{}' in dict '{}'",
            old_field_id,
            new_field_id,
            dict.id
        );
        Ok(())
    }

    fn create_index(&self, dict: &Dict, index: &DictIndex) -> Result<()> {
        self.execute_ddl(dict, &[create_index_sql(dict, index)])
    }

    fn delete_index(&self, dict: &Dict, index_id: &str) -> Result<()> {
        self.execute_ddl(dict, &[drop_index_sql(&index_name(&dict.id, index_id))])
    }

    fn create_constraint(&self, dict: &Dict, constraint: &DictConstraint) -> Result<()> {
        self.execute_ddl(dict, &[create_constraint_sql(dict, constraint)])
    }

    fn delete_constraint(&self, dict: &Dict, constraint_id: &str) -> Result<()> {
        self.execute_ddl(
            dict,
            &[drop_index_sql(&constraint_name(&dict.id, constraint_id))],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dict_engine_core::schema::{service_fields, FieldType, SortDirection};
    use ntest::timeout;

    fn dict() -> Dict {
        let mut dict = Dict::new("orders", "sql")
            .with_field(DictField::new("title", FieldType::String))
            .with_field(DictField::new("amount", FieldType::Decimal))
            .with_index(DictIndex {
                id: "by_title".into(),
                fields: vec!["title".into()],
                direction: SortDirection::Desc,
            });
        let mut fields = service_fields();
        fields.append(&mut dict.fields);
        dict.fields = fields;
        dict
    }

    fn indexes(backend: &SqliteBackend) -> Vec<String> {
        let connection = backend.connection();
        let mut statement = connection
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'd_orders'
                 AND sql IS NOT NULL ORDER BY name",
            )
            .unwrap();
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        names
    }

    #[timeout(1000)]
    #[test]
    fn test_create_and_alter_table() {
        let backend = SqliteBackend::in_memory().unwrap();
        let old = dict();
        backend.create_dict_scheme(&old).unwrap();
        backend.create_dict_scheme(&old).unwrap();
        assert_eq!(indexes(&backend), vec!["ix_orders_by_title"]);

        let mut new = old.clone();
        new.fields.retain(|f| f.id != "amount");
        new.fields.push(DictField::new("state", FieldType::String));
        new.indexes.clear();
        new.constraints.push(DictConstraint {
            id: "uniq".into(),
            fields: vec!["title".into()],
        });
        backend.update_dict_scheme(&old, &new).unwrap();
        backend.update_dict_scheme(&old, &new).unwrap();

        let columns = existing_columns(&backend.connection(), &new).unwrap();
        assert!(columns.contains("state"));
        assert!(!columns.contains("amount"));
        assert_eq!(indexes(&backend), vec!["uq_orders_uniq"]);
    }

    #[timeout(1000)]
    #[test]
    fn test_rename_column() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut dict = dict();
        backend.create_dict_scheme(&dict).unwrap();
        dict.rename_field("title", "headline").unwrap();
        backend.rename_dict_field(&dict, "title", "headline").unwrap();

        let columns = existing_columns(&backend.connection(), &dict).unwrap();
        assert!(columns.contains("headline"));
        assert!(!columns.contains("title"));
    }

    #[timeout(1000)]
    #[test]
    fn test_ddl_failure_names_dict() {
        let backend = SqliteBackend::in_memory().unwrap();
        let dict = dict();
        let err = backend.rename_dict_field(&dict, "title", "headline").unwrap_err();
        assert!(matches!(
            err,
            dict_engine_core::error::DictError::SchemaModification { ref dict, .. } if dict == "orders"
        ));
    }
}
