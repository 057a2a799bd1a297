use crate::util::page_count;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub(crate) enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PageCursor {
    pub index: u32,
    pub size: u32,
}

/// Filters, sort and pagination of one list view.
///
/// Absent filter keys are null. Only the schema gives the query meaning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Query {
    pub filters: BTreeMap<String, String>,
    pub sort: SortSpec,
    pub page: PageCursor,
}

impl Query {
    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    /// Applies filter changes (`None` clears). Resets the page index when any
    /// filter actually changes.
    pub fn with_filters<'a>(
        &self,
        schema: &QuerySchema,
        changes: impl IntoIterator<Item = (&'a str, Option<String>)>,
    ) -> Self {
        let mut next = self.clone();
        for (key, raw) in changes {
            if schema.field(key).is_none() {
                tracing::warn!(event = "models.unknown_filter", key);
                continue;
            }
            match raw.and_then(|v| schema.coerce_filter(key, &v)) {
                Some(v) => {
                    next.filters.insert(key.to_string(), v);
                }
                None => {
                    next.filters.remove(key);
                }
            }
        }
        if next.filters != self.filters {
            next.page.index = 0;
        }
        next
    }

    /// Reselecting the current field flips the direction, a new field starts
    /// ascending. `None` for fields the schema does not sort by.
    pub fn with_sort_toggled(&self, schema: &QuerySchema, field: &str) -> Option<Self> {
        if !schema.sort_fields.contains(&field) {
            return None;
        }
        let mut next = self.clone();
        next.sort = if self.sort.field == field {
            SortSpec {
                field: field.to_string(),
                direction: self.sort.direction.flipped(),
            }
        } else {
            SortSpec {
                field: field.to_string(),
                direction: SortDirection::Asc,
            }
        };
        next.page.index = 0;
        Some(next)
    }

    pub fn with_page(&self, index: u32) -> Self {
        let mut next = self.clone();
        next.page.index = index;
        next
    }

    /// Keeps the page index, clamped to the last page implied by
    /// `known_total` when one is known. `None` for sizes outside the schema.
    pub fn with_page_size(
        &self,
        schema: &QuerySchema,
        size: u32,
        known_total: Option<u64>,
    ) -> Option<Self> {
        if !schema.page_sizes.contains(&size) {
            return None;
        }
        let mut next = self.clone();
        next.page.size = size;
        if let Some(total) = known_total {
            let last = page_count(total, size).saturating_sub(1);
            next.page.index = next.page.index.min(last);
        }
        Some(next)
    }

    /// Defaults everywhere except the page size preference.
    pub fn cleared(&self, schema: &QuerySchema) -> Self {
        let mut next = schema.defaults();
        next.page.size = self.page.size;
        next
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterKind {
    Text,
    Enum(&'static [&'static str]),
    /// `YYYY-MM-DD`.
    Date,
    Integer { min: i64, max: i64 },
    Bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FilterField {
    pub key: &'static str,
    pub kind: FilterKind,
    /// Free-text input; changes go through the search debounce.
    pub debounced: bool,
}

impl FilterField {
    pub const fn new(key: &'static str, kind: FilterKind) -> Self {
        Self {
            key,
            kind,
            debounced: false,
        }
    }

    pub const fn search(key: &'static str) -> Self {
        Self {
            key,
            kind: FilterKind::Text,
            debounced: true,
        }
    }
}

/// Static description of one resource's query: recognized filters, sortable
/// fields and allowed page sizes. Every filter defaults to null.
#[derive(Debug)]
pub(crate) struct QuerySchema {
    pub filters: &'static [FilterField],
    pub sort_fields: &'static [&'static str],
    pub default_sort: (&'static str, SortDirection),
    pub page_sizes: &'static [u32],
    pub default_page_size: u32,
}

impl QuerySchema {
    pub fn defaults(&self) -> Query {
        Query {
            filters: BTreeMap::new(),
            sort: SortSpec {
                field: self.default_sort.0.to_string(),
                direction: self.default_sort.1,
            },
            page: PageCursor {
                index: 0,
                size: self.default_page_size,
            },
        }
    }

    pub fn is_default(&self, query: &Query) -> bool {
        *query == self.defaults()
    }

    pub fn field(&self, key: &str) -> Option<&FilterField> {
        self.filters.iter().find(|f| f.key == key)
    }

    /// Normalized value for `key`, or `None` when the value is empty or
    /// invalid for the field kind.
    pub fn coerce_filter(&self, key: &str, raw: &str) -> Option<String> {
        let field = self.field(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        match field.kind {
            FilterKind::Text => Some(raw.to_string()),
            FilterKind::Enum(allowed) => {
                let v = raw.trim();
                allowed
                    .iter()
                    .find(|a| a.eq_ignore_ascii_case(v))
                    .map(|a| a.to_string())
            }
            FilterKind::Date => chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .ok()
                .map(|d| d.format("%Y-%m-%d").to_string()),
            FilterKind::Integer { min, max } => raw
                .trim()
                .parse::<i64>()
                .ok()
                .map(|n| n.clamp(min, max).to_string()),
            FilterKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some("true".to_string()),
                "false" | "0" => Some("false".to_string()),
                _ => None,
            },
        }
    }

    /// Clamps into the allowed range, then snaps up to the nearest allowed size.
    pub fn clamp_page_size(&self, raw: i64) -> u32 {
        let (Some(&min), Some(&max)) = (self.page_sizes.iter().min(), self.page_sizes.iter().max())
        else {
            return self.default_page_size;
        };
        let clamped = raw.clamp(i64::from(min), i64::from(max));
        self.page_sizes
            .iter()
            .copied()
            .filter(|&s| i64::from(s) >= clamped)
            .min()
            .unwrap_or(max)
    }
}

/// One successfully fetched page. Derived fields always agree with
/// `total_elements`, `page_size` and `page_index`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub page_index: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u32,
    pub is_first: bool,
    pub is_last: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page_index: u32, page_size: u32, total_elements: u64) -> Self {
        let total_pages = page_count(total_elements, page_size);
        Self {
            items,
            page_index,
            page_size,
            total_elements,
            total_pages,
            is_first: page_index == 0,
            is_last: total_pages == 0 || page_index.saturating_add(1) >= total_pages,
        }
    }
}

/// Spring-style page payload returned by list endpoints.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageResponse<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub total_elements: u64,
}

impl<T> From<PageResponse<T>> for Page<T> {
    fn from(r: PageResponse<T>) -> Self {
        Page::new(r.content, r.number, r.size, r.total_elements)
    }
}

/// Regional blood donation center (RCKiK).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Center {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub city: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Scraper run report shown in the admin back office.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScraperReport {
    pub id: i64,
    #[serde(default)]
    pub rckik_id: Option<i64>,
    #[serde(default)]
    pub rckik_name: Option<String>,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Donation {
    pub id: i64,
    pub donation_date: String,
    #[serde(default)]
    pub rckik_name: Option<String>,
    #[serde(default)]
    pub donation_type: Option<String>,
    #[serde(default)]
    pub quantity_ml: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Notification {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: String,
}


#[cfg(all(test, not(target_arch = "wasm32")))]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn page_flags_agree_with_totals(total in 0u64..10_000, size in 1u32..200, index in 0u32..100) {
            let p = Page::<()>::new(vec![], index, size, total);
            prop_assert_eq!(u64::from(p.total_pages), total.div_ceil(u64::from(size)));
            prop_assert_eq!(p.is_first, index == 0);
            prop_assert_eq!(p.is_last, index + 1 >= p.total_pages);
        }
    }
}
