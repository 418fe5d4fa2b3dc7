//! Item CRUD and filtering over document collections.

use std::borrow::Cow;
use std::cmp::Ordering;

use chrono::Utc;
use dict_engine_core::backend::{DictDataBackend, Page, Pageable, Translator};
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::query::{DictResolver, FieldRef, QueryExpression};
use dict_engine_core::schema::{Dict, DictConstraint, DictItem, ItemData, SortDirection};
use serde_json::Value;

use crate::compare::{equals, sort_cmp};
use crate::criteria::{DocumentView, FieldPath};
use crate::engine::DocumentBackend;
use crate::store::DocumentStore;
use crate::translator::{DocumentQuery, Lookup};

/// Returns the rendered key if another item in `others` holds the same
/// values for the constraint's fields. Items with a null key never clash.
pub(crate) fn duplicate_key<'a>(
    constraint: &DictConstraint,
    item: &DictItem,
    mut others: impl Iterator<Item = &'a DictItem>,
) -> Option<String> {
    let key = constraint
        .fields
        .iter()
        .map(|f| item.data.get(f).filter(|v| !v.is_null()))
        .collect::<Option<Vec<&Value>>>()?;
    let clash = others.any(|other| {
        other.id != item.id
            && constraint
                .fields
                .iter()
                .zip(&key)
                .all(|(f, value)| other.data.get(f).is_some_and(|v| equals(v, value)))
    });
    clash.then(|| {
        let rendered: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        format!("({})", rendered.join(", "))
    })
}

fn check_unique(dict: &Dict, collection: &[DictItem], item: &DictItem) -> Result<()> {
    if collection.iter().any(|other| other.id == item.id) {
        return Err(DictError::UniqueViolation {
            dict: dict.id.clone(),
            message: format!("duplicate item id '{}'", item.id),
        });
    }
    check_constraints(dict, collection, item)
}

fn check_constraints(dict: &Dict, collection: &[DictItem], item: &DictItem) -> Result<()> {
    for constraint in &dict.constraints {
        let active = collection.iter().filter(|other| !other.is_deleted());
        if let Some(key) = duplicate_key(constraint, item, active) {
            return Err(DictError::UniqueViolation {
                dict: dict.id.clone(),
                message: format!("constraint '{}' already holds key {}", constraint.id, key),
            });
        }
    }
    Ok(())
}

fn item_not_found(dict: &Dict, item_id: &str) -> DictError {
    DictError::ItemNotFound {
        dict: dict.id.clone(),
        item: item_id.to_string(),
    }
}

/// Resolves the lookups of one root document.
fn view<'a>(store: &'a DocumentStore, item: &'a DictItem, lookups: &'a [Lookup]) -> DocumentView<'a> {
    let mut view = DocumentView::root(item);
    for lookup in lookups {
        let Some(id) = item.data.get(&lookup.via).and_then(Value::as_str) else {
            continue;
        };
        if let Some(found) = store.collection(&lookup.dict_id).iter().find(|d| d.id == id) {
            view.lookups.insert(lookup.dict_id.as_str(), found);
        }
    }
    view
}

/// One projected value: output key and where to read it.
struct Projected {
    key: String,
    path: FieldPath,
}

fn active_matches<'a>(
    store: &'a DocumentStore,
    dict: &Dict,
    query: &'a DocumentQuery,
) -> Vec<DocumentView<'a>> {
    store
        .collection(&dict.id)
        .iter()
        .filter(|item| !item.is_deleted())
        .map(|item| view(store, item, &query.lookups))
        .filter(|view| query.criteria.matches(view))
        .collect()
}

impl DocumentBackend {
    fn plan(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<DocumentQuery> {
        let query = self.translator().process(dict, resolver, expression)?;
        tracing::debug!("Criteria for dict '{}': {:?}", dict.id, query.criteria);
        Ok(query)
    }

    fn projection(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        required_fields: &[FieldRef],
        lookups: &mut Vec<Lookup>,
    ) -> Result<Vec<Projected>> {
        let mut projected: Vec<Projected> = Vec::new();
        for field_ref in required_fields {
            let (path, resolved) = self
                .translator()
                .path_for(dict, resolver, field_ref, lookups)?;
            if !resolved.is_joined() && resolved.field.is_service() {
                continue;
            }
            let key = match &path.lookup {
                Some(lookup) => format!("{}.{}", lookup, path.field),
                None => path.field.clone(),
            };
            if !projected.iter().any(|p| p.key == key) {
                projected.push(Projected { key, path });
            }
        }
        Ok(projected)
    }
}

fn project(view: &DocumentView<'_>, projected: &[Projected]) -> DictItem {
    let mut item = view.root.clone();
    if projected.is_empty() {
        return item;
    }
    item.data = projected
        .iter()
        .filter_map(|p| view.value(&p.path).map(|v| (p.key.clone(), v.into_owned())))
        .collect::<ItemData>();
    item
}

impl DictDataBackend for DocumentBackend {
    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        let store = self.read();
        Ok(store
            .collection(&dict.id)
            .iter()
            .find(|item| item.id == item_id && !item.is_deleted())
            .cloned())
    }

    fn get_raw_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        let store = self.read();
        Ok(store
            .collection(&dict.id)
            .iter()
            .find(|item| item.id == item_id)
            .cloned())
    }

    fn get_by_ids(&self, dict: &Dict, item_ids: &[String]) -> Result<Vec<DictItem>> {
        let store = self.read();
        Ok(store
            .collection(&dict.id)
            .iter()
            .filter(|item| !item.is_deleted() && item_ids.contains(&item.id))
            .cloned()
            .collect())
    }

    fn get_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        required_fields: &[FieldRef],
        expression: &QueryExpression,
        pageable: &Pageable,
    ) -> Result<Page<DictItem>> {
        let mut query = self.plan(dict, resolver, expression)?;
        let projected = self.projection(dict, resolver, required_fields, &mut query.lookups)?;
        let mut sort = Vec::new();
        for order in pageable.effective_sort() {
            let (path, _) =
                self.translator()
                    .path_for(dict, resolver, &order.field, &mut query.lookups)?;
            sort.push((path, order.direction));
        }

        let store = self.read();
        let mut matches = active_matches(&store, dict, &query);
        let total = matches.len() as u64;
        if total == 0 {
            return Ok(Page::empty(pageable));
        }

        if !sort.is_empty() {
            matches.sort_by(|a, b| {
                sort.iter()
                    .map(|(path, direction)| {
                        let left = a.value(path).unwrap_or(Cow::Owned(Value::Null));
                        let right = b.value(path).unwrap_or(Cow::Owned(Value::Null));
                        match direction {
                            SortDirection::Asc => sort_cmp(&left, &right),
                            SortDirection::Desc => sort_cmp(&right, &left),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let content = matches
            .iter()
            .skip(pageable.offset())
            .take(pageable.size.unwrap_or(usize::MAX))
            .map(|view| project(view, &projected))
            .collect();
        Ok(Page {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements: total,
        })
    }

    fn exists_by_id(&self, dict: &Dict, item_id: &str) -> Result<bool> {
        Ok(self.get_by_id(dict, item_id)?.is_some())
    }

    fn exists_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<bool> {
        Ok(self.count_by_filter(dict, resolver, expression)? > 0)
    }

    fn count_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<u64> {
        let query = self.plan(dict, resolver, expression)?;
        let store = self.read();
        Ok(active_matches(&store, dict, &query).len() as u64)
    }

    fn create(&self, dict: &Dict, item: DictItem) -> Result<DictItem> {
        self.mutate(|store| {
            let collection = store.collection_mut(&dict.id);
            check_unique(dict, collection, &item)?;
            collection.push(item.clone());
            Ok(item)
        })
    }

    fn create_many(&self, dict: &Dict, items: Vec<DictItem>) -> Result<Vec<DictItem>> {
        self.mutate(|store| {
            let collection = store.collection_mut(&dict.id);
            let before = collection.len();
            for item in &items {
                if let Err(e) = check_unique(dict, collection, item) {
                    collection.truncate(before);
                    return Err(e);
                }
                collection.push(item.clone());
            }
            Ok(items)
        })
    }

    fn update(
        &self,
        dict: &Dict,
        item_id: &str,
        data: ItemData,
        expected_version: i64,
    ) -> Result<DictItem> {
        self.mutate(|store| {
            let collection = store.collection_mut(&dict.id);
            let position = collection
                .iter()
                .position(|item| item.id == item_id && !item.is_deleted())
                .ok_or_else(|| item_not_found(dict, item_id))?;

            let current = &collection[position];
            if current.version != expected_version {
                return Err(DictError::ConcurrentUpdate {
                    dict: dict.id.clone(),
                    item: item_id.to_string(),
                    expected: expected_version,
                    actual: current.version,
                });
            }

            let changed = current.changed_fields(&data);
            let mut updated = current.clone();
            updated.apply_update(data, Utc::now());
            check_constraints(dict, collection, &updated)?;
            collection[position] = updated.clone();
            tracing::debug!(
                "Wrote {} changed fields of item '{}' in dict '{}'",
                changed.len(),
                item_id,
                dict.id
            );
            Ok(updated)
        })
    }

    fn delete(&self, dict: &Dict, item_id: &str, soft: bool, reason: Option<&str>) -> Result<()> {
        self.mutate(|store| {
            let collection = store.collection_mut(&dict.id);
            if soft {
                let item = collection
                    .iter_mut()
                    .find(|item| item.id == item_id && !item.is_deleted())
                    .ok_or_else(|| item_not_found(dict, item_id))?;
                item.mark_deleted(reason.map(str::to_string), Utc::now());
            } else {
                let position = collection
                    .iter()
                    .position(|item| item.id == item_id)
                    .ok_or_else(|| item_not_found(dict, item_id))?;
                collection.remove(position);
            }
            Ok(())
        })
    }

    fn delete_all(&self, dict: &Dict, soft: bool, reason: Option<&str>) -> Result<u64> {
        self.mutate(|store| {
            let collection = store.collection_mut(&dict.id);
            let active = collection.iter().filter(|item| !item.is_deleted()).count();
            if soft {
                let now = Utc::now();
                for item in collection.iter_mut().filter(|item| !item.is_deleted()) {
                    item.mark_deleted(reason.map(str::to_string), now);
                }
            } else {
                collection.retain(DictItem::is_deleted);
            }
            tracing::debug!("Deleted {} documents of dict '{}'", active, dict.id);
            Ok(active as u64)
        })
    }

    fn get_distinct_values_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        field_id: &str,
        expression: &QueryExpression,
    ) -> Result<Vec<Value>> {
        let field = dict.get_field(field_id)?;
        let query = self.plan(dict, resolver, expression)?;
        let path = FieldPath {
            lookup: None,
            field: field.id.clone(),
            multivalued: field.multivalued,
        };

        let store = self.read();
        let mut values: Vec<Value> = Vec::new();
        for view in active_matches(&store, dict, &query) {
            match view.value(&path).map(Cow::into_owned) {
                Some(Value::Array(elements)) if field.multivalued => {
                    values.extend(elements.into_iter().filter(|v| !v.is_null()))
                }
                Some(value) => values.push(value),
                None => {}
            }
        }
        values.sort_by(sort_cmp);
        values.dedup_by(|a, b| equals(a, b));
        Ok(values)
    }
}
