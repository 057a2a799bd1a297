//! Per-resource list adapters: endpoint, query schema and error wording.

use crate::api::{ApiError, ApiErrorKind, ApiRequest};
use crate::models::{
    Center, Donation, FilterField, FilterKind, Notification, Query, QuerySchema, ScraperReport,
    SortDirection,
};
use serde::de::DeserializeOwned;

pub(crate) const PAGE_SIZES: &[u32] = &[10, 20, 50, 100];
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 20;

pub(crate) const REPORT_STATUSES: &[&str] = &["PENDING", "IN_PROGRESS", "SUCCESS", "FAILED"];

/// A paged list endpoint the list controller can drive.
pub(crate) trait ListResource: 'static {
    type Item: DeserializeOwned + Clone + 'static;

    fn name(&self) -> &'static str;

    fn path(&self) -> &'static str;

    fn schema(&self) -> &'static QuerySchema;

    fn request(&self, query: &Query) -> ApiRequest {
        list_request(self.path(), self.schema(), query)
    }

    /// Wording for a client error (4xx) on this resource, if it has one.
    fn client_error_message(&self, _err: &ApiError) -> Option<String> {
        None
    }
}

/// `page`, `size`, `sort=<field>,<dir>` and the non-null filters in schema order.
pub(crate) fn list_request(path: &str, schema: &QuerySchema, query: &Query) -> ApiRequest {
    let mut req = ApiRequest::get(path)
        .with_param("page", query.page.index.to_string())
        .with_param("size", query.page.size.to_string())
        .with_param(
            "sort",
            format!("{},{}", query.sort.field, query.sort.direction),
        );
    for field in schema.filters {
        if let Some(v) = query.filter(field.key) {
            req = req.with_param(field.key, v);
        }
    }
    req
}

fn status_of(err: &ApiError) -> Option<u16> {
    match err.kind {
        ApiErrorKind::Http | ApiErrorKind::Unauthorized => err.status,
        _ => None,
    }
}

pub(crate) static CENTERS_SCHEMA: QuerySchema = QuerySchema {
    filters: &[
        FilterField::search("search"),
        FilterField::new("city", FilterKind::Text),
        FilterField::new("active", FilterKind::Bool),
    ],
    sort_fields: &["name", "city", "code"],
    default_sort: ("name", SortDirection::Asc),
    page_sizes: PAGE_SIZES,
    default_page_size: DEFAULT_PAGE_SIZE,
};

/// Public RCKiK search.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CentersResource;

impl ListResource for CentersResource {
    type Item = Center;

    fn name(&self) -> &'static str {
        "centers"
    }

    fn path(&self) -> &'static str {
        "/api/v1/rckik"
    }

    fn schema(&self) -> &'static QuerySchema {
        &CENTERS_SCHEMA
    }

    fn client_error_message(&self, err: &ApiError) -> Option<String> {
        match status_of(err)? {
            400 => Some("Some search filters are invalid. Adjust them and try again.".to_string()),
            _ => None,
        }
    }
}

pub(crate) static ADMIN_CENTERS_SCHEMA: QuerySchema = QuerySchema {
    filters: &[
        FilterField::search("search"),
        FilterField::new("city", FilterKind::Text),
        FilterField::new("active", FilterKind::Bool),
    ],
    sort_fields: &["name", "code", "city", "updatedAt"],
    default_sort: ("name", SortDirection::Asc),
    page_sizes: PAGE_SIZES,
    default_page_size: DEFAULT_PAGE_SIZE,
};

/// RCKiK management in the admin back office.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AdminCentersResource;

impl ListResource for AdminCentersResource {
    type Item = Center;

    fn name(&self) -> &'static str {
        "admin_centers"
    }

    fn path(&self) -> &'static str {
        "/api/v1/admin/rckik"
    }

    fn schema(&self) -> &'static QuerySchema {
        &ADMIN_CENTERS_SCHEMA
    }

    fn client_error_message(&self, err: &ApiError) -> Option<String> {
        match status_of(err)? {
            403 => Some("You do not have permission to manage RCKiK centers.".to_string()),
            400 => Some("Some search filters are invalid. Adjust them and try again.".to_string()),
            _ => None,
        }
    }
}

pub(crate) static REPORTS_SCHEMA: QuerySchema = QuerySchema {
    filters: &[
        FilterField::search("search"),
        FilterField::new("status", FilterKind::Enum(REPORT_STATUSES)),
        FilterField::new(
            "rckikId",
            FilterKind::Integer {
                min: 1,
                max: i64::MAX,
            },
        ),
        FilterField::new("dateFrom", FilterKind::Date),
        FilterField::new("dateTo", FilterKind::Date),
    ],
    sort_fields: &["createdAt", "status"],
    default_sort: ("createdAt", SortDirection::Desc),
    page_sizes: PAGE_SIZES,
    default_page_size: DEFAULT_PAGE_SIZE,
};

/// Scraper run reports.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ReportsResource;

impl ListResource for ReportsResource {
    type Item = ScraperReport;

    fn name(&self) -> &'static str {
        "reports"
    }

    fn path(&self) -> &'static str {
        "/api/v1/admin/reports"
    }

    fn schema(&self) -> &'static QuerySchema {
        &REPORTS_SCHEMA
    }

    fn client_error_message(&self, err: &ApiError) -> Option<String> {
        match status_of(err)? {
            400 => Some("The report filters are invalid. Check the date range.".to_string()),
            403 => Some("Only administrators can view scraper reports.".to_string()),
            _ => None,
        }
    }
}

pub(crate) static DONATIONS_SCHEMA: QuerySchema = QuerySchema {
    filters: &[
        FilterField::new(
            "rckikId",
            FilterKind::Integer {
                min: 1,
                max: i64::MAX,
            },
        ),
        FilterField::new("dateFrom", FilterKind::Date),
        FilterField::new("dateTo", FilterKind::Date),
    ],
    sort_fields: &["donationDate", "quantityMl"],
    default_sort: ("donationDate", SortDirection::Desc),
    page_sizes: PAGE_SIZES,
    default_page_size: DEFAULT_PAGE_SIZE,
};

/// The signed-in user's donation diary.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DonationsResource;

impl ListResource for DonationsResource {
    type Item = Donation;

    fn name(&self) -> &'static str {
        "donations"
    }

    fn path(&self) -> &'static str {
        "/api/v1/users/me/donations"
    }

    fn schema(&self) -> &'static QuerySchema {
        &DONATIONS_SCHEMA
    }

    fn client_error_message(&self, err: &ApiError) -> Option<String> {
        match status_of(err)? {
            400 => Some("The date range is invalid.".to_string()),
            401 => Some("Sign in to see your donation diary.".to_string()),
            404 => Some("No donation diary was found for this account.".to_string()),
            _ => None,
        }
    }
}

pub(crate) static NOTIFICATIONS_SCHEMA: QuerySchema = QuerySchema {
    filters: &[FilterField::new("unreadOnly", FilterKind::Bool)],
    sort_fields: &["createdAt"],
    default_sort: ("createdAt", SortDirection::Desc),
    page_sizes: PAGE_SIZES,
    default_page_size: DEFAULT_PAGE_SIZE,
};

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct NotificationsResource;

impl ListResource for NotificationsResource {
    type Item = Notification;

    fn name(&self) -> &'static str {
        "notifications"
    }

    fn path(&self) -> &'static str {
        "/api/v1/users/me/notifications"
    }

    fn schema(&self) -> &'static QuerySchema {
        &NOTIFICATIONS_SCHEMA
    }
}

pub(crate) fn mark_notification_read_request(id: i64) -> ApiRequest {
    ApiRequest::patch(format!("/api/v1/users/me/notifications/{id}/read"), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawResponse;

    fn http(status: u16) -> ApiError {
        ApiError::from_status(
            &RawResponse {
                status,
                retry_after: None,
                body: String::new(),
            },
            "Request failed",
        )
    }

    #[test]
    fn test_default_request_params() {
        let req = CentersResource.request(&CENTERS_SCHEMA.defaults());
        assert_eq!(req.path, "/api/v1/rckik");
        assert_eq!(req.param("page"), Some("0"));
        assert_eq!(req.param("size"), Some("20"));
        assert_eq!(req.param("sort"), Some("name,asc"));
        assert_eq!(req.param("search"), None);
    }

    #[test]
    fn test_filters_become_params() {
        let q = REPORTS_SCHEMA.defaults().with_filters(
            &REPORTS_SCHEMA,
            [
                ("status", Some("failed".to_string())),
                ("rckikId", Some("12".to_string())),
                ("dateFrom", Some("2024-01-01".to_string())),
            ],
        );
        let req = ReportsResource.request(&q);
        assert_eq!(req.param("status"), Some("FAILED"));
        assert_eq!(req.param("rckikId"), Some("12"));
        assert_eq!(req.param("dateFrom"), Some("2024-01-01"));
        assert_eq!(req.param("sort"), Some("createdAt,desc"));

        let keys: Vec<&str> = req.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["page", "size", "sort", "status", "rckikId", "dateFrom"]);
    }

    #[test]
    fn test_client_error_wording_is_per_resource() {
        assert!(AdminCentersResource
            .client_error_message(&http(403))
            .is_some_and(|m| m.contains("permission")));
        assert_eq!(CentersResource.client_error_message(&http(403)), None);
        assert_eq!(
            ReportsResource.client_error_message(&ApiError::network("refused")),
            None
        );
    }

    #[test]
    fn test_mark_read_request() {
        let req = mark_notification_read_request(42);
        assert_eq!(req.method, reqwest::Method::PATCH);
        assert_eq!(req.path, "/api/v1/users/me/notifications/42/read");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_only_search_is_debounced() {
        for schema in [&CENTERS_SCHEMA, &ADMIN_CENTERS_SCHEMA, &REPORTS_SCHEMA, &DONATIONS_SCHEMA] {
            for f in schema.filters {
                assert_eq!(f.debounced, f.key == "search", "{}", f.key);
            }
            assert!(schema.sort_fields.contains(&schema.default_sort.0));
        }
    }
}
