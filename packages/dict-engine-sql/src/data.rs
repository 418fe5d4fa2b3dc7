//! Item CRUD and filtering over the dictionary tables.

use chrono::Utc;
use dict_engine_core::backend::{DictDataBackend, Page, Pageable, Translator};
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::mapping::{format_timestamp, parse_timestamp};
use dict_engine_core::query::{DictResolver, FieldRef, QueryExpression};
use dict_engine_core::schema::{
    Dict, DictField, DictItem, HistoryEntry, ItemData, CREATED_FIELD, DELETED_FIELD,
    DELETION_REASON_FIELD, HISTORY_FIELD, ID_FIELD, UPDATED_FIELD, VERSION_FIELD,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::engine::SqliteBackend;
use crate::translator::{from_clause, SqlJoin, SqlQuery};
use crate::values::{
    column, data_error, from_sql, quote, scalar_from_sql, table_name, to_sql, ROOT_ALIAS,
};

/// Service columns read for every item, in row order.
const SERVICE_COLUMNS: [&str; 7] = [
    ID_FIELD,
    CREATED_FIELD,
    UPDATED_FIELD,
    DELETED_FIELD,
    DELETION_REASON_FIELD,
    HISTORY_FIELD,
    VERSION_FIELD,
];

/// One projected data column: output key, SQL expression and definition.
struct Projected {
    key: String,
    expr: String,
    dict_id: String,
    field: DictField,
}

/// SELECT list for reading items.
struct Projection {
    columns: Vec<Projected>,
}

impl Projection {
    /// Every root user field.
    fn all(dict: &Dict) -> Self {
        Self {
            columns: dict
                .user_fields()
                .map(|field| Projected {
                    key: field.id.clone(),
                    expr: column(ROOT_ALIAS, &field.id),
                    dict_id: dict.id.clone(),
                    field: field.clone(),
                })
                .collect(),
        }
    }

    fn select_list(&self) -> String {
        SERVICE_COLUMNS
            .iter()
            .map(|c| column(ROOT_ALIAS, c))
            .chain(self.columns.iter().map(|c| c.expr.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn read(&self, dict: &Dict, row: &rusqlite::Row<'_>) -> Result<DictItem> {
        let get = |index: usize| -> Result<SqlValue> {
            row.get::<_, SqlValue>(index)
                .map_err(|e| data_error(&dict.id, e))
        };
        let text = |index: usize| -> Result<Option<String>> {
            match get(index)? {
                SqlValue::Text(text) => Ok(Some(text)),
                _ => Ok(None),
            }
        };
        let timestamp = |index: usize| -> Result<Option<chrono::DateTime<Utc>>> {
            Ok(text(index)?.as_deref().and_then(parse_timestamp))
        };

        let id = text(0)?.unwrap_or_default();
        let created = timestamp(1)?.unwrap_or_default();
        let updated = timestamp(2)?.unwrap_or(created);
        let history: Vec<HistoryEntry> = match text(5)? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        let version = match get(6)? {
            SqlValue::Integer(v) => v,
            _ => 0,
        };

        let mut data = ItemData::new();
        for (offset, projected) in self.columns.iter().enumerate() {
            let value = from_sql(
                &projected.dict_id,
                &projected.field,
                get(SERVICE_COLUMNS.len() + offset)?,
            )?;
            if !value.is_null() {
                data.insert(projected.key.clone(), value);
            }
        }

        Ok(DictItem {
            id,
            data,
            history,
            version,
            created,
            updated,
            deleted: timestamp(3)?,
            deletion_reason: text(4)?,
        })
    }
}

/// Runs a SELECT returning full item rows.
fn query_items(
    connection: &Connection,
    dict: &Dict,
    projection: &Projection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<DictItem>> {
    tracing::debug!("Query on dict '{}': {}", dict.id, sql);
    let mut statement = connection.prepare(sql).map_err(|e| data_error(&dict.id, e))?;
    let mut rows = statement
        .query(params_from_iter(params.iter()))
        .map_err(|e| data_error(&dict.id, e))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next().map_err(|e| data_error(&dict.id, e))? {
        items.push(projection.read(dict, row)?);
    }
    Ok(items)
}

fn select_by_id(
    connection: &Connection,
    dict: &Dict,
    item_id: &str,
    include_deleted: bool,
) -> Result<Option<DictItem>> {
    let projection = Projection::all(dict);
    let mut sql = format!(
        "SELECT {} {} WHERE {} = ?",
        projection.select_list(),
        from_clause(dict, &[]),
        column(ROOT_ALIAS, ID_FIELD)
    );
    if !include_deleted {
        sql.push_str(&format!(" AND {} IS NULL", column(ROOT_ALIAS, DELETED_FIELD)));
    }
    let mut items = query_items(
        connection,
        dict,
        &projection,
        &sql,
        &[SqlValue::Text(item_id.to_string())],
    )?;
    Ok(items.pop())
}

fn insert_item(connection: &Connection, dict: &Dict, item: &DictItem) -> Result<()> {
    let mut columns: Vec<String> = vec![
        quote(ID_FIELD),
        quote(CREATED_FIELD),
        quote(UPDATED_FIELD),
        quote(HISTORY_FIELD),
        quote(VERSION_FIELD),
    ];
    let mut values: Vec<SqlValue> = vec![
        SqlValue::Text(item.id.clone()),
        SqlValue::Text(format_timestamp(&item.created)),
        SqlValue::Text(format_timestamp(&item.updated)),
        SqlValue::Text(serde_json::to_string(&item.history)?),
        SqlValue::Integer(item.version),
    ];
    for field in dict.user_fields() {
        if let Some(value) = item.data.get(&field.id) {
            columns.push(quote(&field.id));
            values.push(to_sql(field, value));
        }
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_name(&dict.id),
        columns.join(", "),
        placeholders
    );
    connection
        .execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| data_error(&dict.id, e))?;
    Ok(())
}

/// Filter query joined with the projection and sort joins.
struct FilterPlan {
    query: SqlQuery,
    joins: Vec<SqlJoin>,
}

impl FilterPlan {
    fn from_and_where(&self, dict: &Dict) -> String {
        format!(
            "{} WHERE {} IS NULL AND ({})",
            from_clause(dict, &self.joins),
            column(ROOT_ALIAS, DELETED_FIELD),
            self.query.where_clause
        )
    }
}

impl SqliteBackend {
    fn plan(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<FilterPlan> {
        let query = self.translator().process(dict, resolver, expression)?;
        let joins = query.joins.clone();
        Ok(FilterPlan { query, joins })
    }

    fn projection(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        required_fields: &[FieldRef],
        joins: &mut Vec<SqlJoin>,
    ) -> Result<Projection> {
        if required_fields.is_empty() {
            return Ok(Projection::all(dict));
        }
        let mut columns = Vec::new();
        for field_ref in required_fields {
            let (expr, resolved) = self
                .translator()
                .column_for(dict, resolver, field_ref, joins)?;
            if !resolved.is_joined() && resolved.field.is_service() {
                continue;
            }
            let key = if resolved.is_joined() {
                format!("{}.{}", resolved.dict_id, resolved.field.id)
            } else {
                resolved.field.id.clone()
            };
            if columns.iter().any(|c: &Projected| c.key == key) {
                continue;
            }
            columns.push(Projected {
                key,
                expr,
                dict_id: resolved.dict_id,
                field: resolved.field,
            });
        }
        Ok(Projection { columns })
    }

    fn count(&self, dict: &Dict, plan: &FilterPlan) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) {}", plan.from_and_where(dict));
        let count: i64 = self
            .connection()
            .query_row(&sql, params_from_iter(plan.query.params.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| data_error(&dict.id, e))?;
        Ok(count as u64)
    }
}

impl DictDataBackend for SqliteBackend {
    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        select_by_id(&self.connection(), dict, item_id, false)
    }

    fn get_raw_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        select_by_id(&self.connection(), dict, item_id, true)
    }

    fn get_by_ids(&self, dict: &Dict, item_ids: &[String]) -> Result<Vec<DictItem>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let projection = Projection::all(dict);
        let sql = format!(
            "SELECT {} {} WHERE {} IN ({}) AND {} IS NULL ORDER BY {}.rowid",
            projection.select_list(),
            from_clause(dict, &[]),
            column(ROOT_ALIAS, ID_FIELD),
            vec!["?"; item_ids.len()].join(", "),
            column(ROOT_ALIAS, DELETED_FIELD),
            ROOT_ALIAS
        );
        let params: Vec<SqlValue> = item_ids.iter().map(|id| SqlValue::Text(id.clone())).collect();
        query_items(&self.connection(), dict, &projection, &sql, &params)
    }

    fn get_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        required_fields: &[FieldRef],
        expression: &QueryExpression,
        pageable: &Pageable,
    ) -> Result<Page<DictItem>> {
        let mut plan = self.plan(dict, resolver, expression)?;
        let projection = self.projection(dict, resolver, required_fields, &mut plan.joins)?;

        let mut order = Vec::new();
        for sort in pageable.effective_sort() {
            let (expr, _) =
                self.translator()
                    .column_for(dict, resolver, &sort.field, &mut plan.joins)?;
            order.push(format!("{} {}", expr, sort.direction.keyword()));
        }
        order.push(format!("{}.rowid ASC", ROOT_ALIAS));

        let total = self.count(dict, &plan)?;
        if total == 0 {
            return Ok(Page::empty(pageable));
        }

        let mut sql = format!(
            "SELECT {} {} ORDER BY {}",
            projection.select_list(),
            plan.from_and_where(dict),
            order.join(", ")
        );
        let mut params = plan.query.params.clone();
        if let Some(size) = pageable.size {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(size as i64));
            params.push(SqlValue::Integer(pageable.offset() as i64));
        }
        let content = query_items(&self.connection(), dict, &projection, &sql, &params)?;

        Ok(Page {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements: total,
        })
    }

    fn exists_by_id(&self, dict: &Dict, item_id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 AND {} IS NULL",
            table_name(&dict.id),
            quote(ID_FIELD),
            quote(DELETED_FIELD)
        );
        self.connection()
            .query_row(&sql, [item_id], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(|e| data_error(&dict.id, e))
    }

    fn exists_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<bool> {
        let plan = self.plan(dict, resolver, expression)?;
        let sql = format!("SELECT EXISTS (SELECT 1 {})", plan.from_and_where(dict));
        let exists: i64 = self
            .connection()
            .query_row(&sql, params_from_iter(plan.query.params.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| data_error(&dict.id, e))?;
        Ok(exists != 0)
    }

    fn count_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<u64> {
        let plan = self.plan(dict, resolver, expression)?;
        self.count(dict, &plan)
    }

    fn create(&self, dict: &Dict, item: DictItem) -> Result<DictItem> {
        insert_item(&self.connection(), dict, &item)?;
        Ok(item)
    }

    fn create_many(&self, dict: &Dict, items: Vec<DictItem>) -> Result<Vec<DictItem>> {
        let mut connection = self.connection();
        let savepoint = connection.savepoint().map_err(|e| data_error(&dict.id, e))?;
        for item in &items {
            insert_item(&savepoint, dict, item)?;
        }
        savepoint.commit().map_err(|e| data_error(&dict.id, e))?;
        Ok(items)
    }

    fn update(
        &self,
        dict: &Dict,
        item_id: &str,
        data: ItemData,
        expected_version: i64,
    ) -> Result<DictItem> {
        let mut connection = self.connection();
        let savepoint = connection.savepoint().map_err(|e| data_error(&dict.id, e))?;

        let mut item = select_by_id(&savepoint, dict, item_id, false)?.ok_or_else(|| {
            DictError::ItemNotFound {
                dict: dict.id.clone(),
                item: item_id.to_string(),
            }
        })?;
        if item.version != expected_version {
            return Err(DictError::ConcurrentUpdate {
                dict: dict.id.clone(),
                item: item_id.to_string(),
                expected: expected_version,
                actual: item.version,
            });
        }

        let changed = item.changed_fields(&data);
        let previous_version = item.version;
        item.apply_update(data, Utc::now());

        let mut assignments = vec![
            format!("{} = ?", quote(UPDATED_FIELD)),
            format!("{} = ?", quote(HISTORY_FIELD)),
            format!("{} = ?", quote(VERSION_FIELD)),
        ];
        let mut values = vec![
            SqlValue::Text(format_timestamp(&item.updated)),
            SqlValue::Text(serde_json::to_string(&item.history)?),
            SqlValue::Integer(item.version),
        ];
        for field_id in &changed {
            let field = dict.get_field(field_id)?;
            assignments.push(format!("{} = ?", quote(field_id)));
            values.push(to_sql(field, item.data.get(field_id).unwrap_or(&Value::Null)));
        }
        values.push(SqlValue::Text(item_id.to_string()));
        values.push(SqlValue::Integer(previous_version));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? AND {} = ? AND {} IS NULL",
            table_name(&dict.id),
            assignments.join(", "),
            quote(ID_FIELD),
            quote(VERSION_FIELD),
            quote(DELETED_FIELD)
        );
        let updated = savepoint
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| data_error(&dict.id, e))?;
        if updated == 0 {
            return Err(DictError::ConcurrentUpdate {
                dict: dict.id.clone(),
                item: item_id.to_string(),
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
        savepoint.commit().map_err(|e| data_error(&dict.id, e))?;
        tracing::debug!(
            "Wrote {} changed fields of item '{}' in dict '{}'",
            changed.len(),
            item_id,
            dict.id
        );
        Ok(item)
    }

    fn delete(&self, dict: &Dict, item_id: &str, soft: bool, reason: Option<&str>) -> Result<()> {
        let connection = self.connection();
        let deleted = if soft {
            let now = SqlValue::Text(format_timestamp(&Utc::now()));
            let sql = format!(
                "UPDATE {} SET {} = ?1, {} = ?2, {} = ?1 WHERE {} = ?3 AND {} IS NULL",
                table_name(&dict.id),
                quote(DELETED_FIELD),
                quote(DELETION_REASON_FIELD),
                quote(UPDATED_FIELD),
                quote(ID_FIELD),
                quote(DELETED_FIELD)
            );
            let reason = reason.map_or(SqlValue::Null, |r| SqlValue::Text(r.to_string()));
            connection.execute(&sql, [now, reason, SqlValue::Text(item_id.to_string())])
        } else {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?1",
                table_name(&dict.id),
                quote(ID_FIELD)
            );
            connection.execute(&sql, [item_id])
        }
        .map_err(|e| data_error(&dict.id, e))?;

        if deleted == 0 {
            return Err(DictError::ItemNotFound {
                dict: dict.id.clone(),
                item: item_id.to_string(),
            });
        }
        Ok(())
    }

    fn delete_all(&self, dict: &Dict, soft: bool, reason: Option<&str>) -> Result<u64> {
        let connection = self.connection();
        let deleted = if soft {
            let sql = format!(
                "UPDATE {} SET {} = ?1, {} = ?2, {} = ?1 WHERE {} IS NULL",
                table_name(&dict.id),
                quote(DELETED_FIELD),
                quote(DELETION_REASON_FIELD),
                quote(UPDATED_FIELD),
                quote(DELETED_FIELD)
            );
            let now = SqlValue::Text(format_timestamp(&Utc::now()));
            let reason = reason.map_or(SqlValue::Null, |r| SqlValue::Text(r.to_string()));
            connection.execute(&sql, [now, reason])
        } else {
            let sql = format!(
                "DELETE FROM {} WHERE {} IS NULL",
                table_name(&dict.id),
                quote(DELETED_FIELD)
            );
            connection.execute(&sql, [])
        }
        .map_err(|e| data_error(&dict.id, e))?;
        tracing::debug!("Deleted {} rows of dict '{}'", deleted, dict.id);
        Ok(deleted as u64)
    }

    fn get_distinct_values_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        field_id: &str,
        expression: &QueryExpression,
    ) -> Result<Vec<Value>> {
        let field = dict.get_field(field_id)?;
        let plan = self.plan(dict, resolver, expression)?;
        let target = column(ROOT_ALIAS, field_id);
        let sql = if field.multivalued {
            format!(
                "SELECT DISTINCT e.value {}, json_each({}) AS e WHERE {} IS NULL AND ({}) \
                 AND e.value IS NOT NULL ORDER BY e.value",
                from_clause(dict, &plan.joins),
                target,
                column(ROOT_ALIAS, DELETED_FIELD),
                plan.query.where_clause
            )
        } else {
            format!(
                "SELECT DISTINCT {0} {1} AND {0} IS NOT NULL ORDER BY {0}",
                target,
                plan.from_and_where(dict)
            )
        };

        let connection = self.connection();
        let mut statement = connection.prepare(&sql).map_err(|e| data_error(&dict.id, e))?;
        let values = statement
            .query_map(params_from_iter(plan.query.params.iter()), |row| {
                row.get::<_, SqlValue>(0)
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| data_error(&dict.id, e))?;
        Ok(values
            .into_iter()
            .map(|v| scalar_from_sql(field.field_type, v))
            .collect())
    }
}
