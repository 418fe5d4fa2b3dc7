//! Pagination and sorting.

use serde::{Deserialize, Serialize};

use crate::query::FieldRef;
use crate::schema::{SortDirection, ID_FIELD};

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: FieldRef,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: FieldRef::parse_path(&field.into()),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: FieldRef::parse_path(&field.into()),
            direction: SortDirection::Desc,
        }
    }

    fn is_root_id(&self) -> bool {
        self.field.dict.is_none() && self.field.field == ID_FIELD
    }
}

/// Page request: zero-based page number, page size and sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pageable {
    pub page: usize,
    /// Page size (`None` = unpaged)
    pub size: Option<usize>,
    pub sort: Vec<SortOrder>,
}

impl Pageable {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: Some(size),
            sort: Vec::new(),
        }
    }

    pub fn unpaged() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, order: SortOrder) -> Self {
        self.sort.push(order);
        self
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> usize {
        self.size.map(|size| self.page.saturating_mul(size)).unwrap_or(0)
    }

    /// Sort keys to apply.
    ///
    /// An explicit sort without `id` gets `id ASC` appended as a tiebreak. An
    /// empty sort stays empty and backends return rows in insertion order.
    pub fn effective_sort(&self) -> Vec<SortOrder> {
        let mut sort = self.sort.clone();
        if !sort.is_empty() && !sort.iter().any(SortOrder::is_root_id) {
            sort.push(SortOrder::asc(ID_FIELD));
        }
        sort
    }

    /// Caps the page size.
    pub fn capped(mut self, max_size: usize) -> Self {
        self.size = Some(self.size.map_or(max_size, |size| size.min(max_size)));
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    /// Requested page size (`None` = unpaged)
    pub size: Option<usize>,
    /// Matching rows across all pages
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn empty(pageable: &Pageable) -> Self {
        Self {
            content: Vec::new(),
            page: pageable.page,
            size: pageable.size,
            total_elements: 0,
        }
    }

    pub fn total_pages(&self) -> u64 {
        match self.size {
            Some(0) => 0,
            Some(size) => self.total_elements.div_ceil(size as u64),
            None if self.total_elements > 0 => 1,
            None => 0,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_tiebreak_added_only_for_explicit_sort() {
        assert!(Pageable::new(0, 10).effective_sort().is_empty());

        let sorted = Pageable::new(0, 10).with_sort(SortOrder::desc("amount"));
        assert_eq!(
            sorted.effective_sort(),
            vec![SortOrder::desc("amount"), SortOrder::asc("id")]
        );

        let with_id = Pageable::new(0, 10).with_sort(SortOrder::desc("id"));
        assert_eq!(with_id.effective_sort(), vec![SortOrder::desc("id")]);
    }

    #[timeout(1000)]
    #[test]
    fn test_offset_and_total_pages() {
        let pageable = Pageable::new(2, 10);
        assert_eq!(pageable.offset(), 20);

        let page: Page<u8> = Page {
            content: Vec::new(),
            page: 2,
            size: Some(10),
            total_elements: 21,
        };
        assert_eq!(page.total_pages(), 3);
        assert_eq!(Pageable::unpaged().capped(100).size, Some(100));
        assert_eq!(Pageable::new(0, 500).capped(100).size, Some(100));
    }
}
