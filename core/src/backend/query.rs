//! Typed list queries.
//!
//! Filters are built as an expression tree and rendered to the store's
//! filter syntax at the adapter boundary. Values are always quoted and
//! escaped, so user input (join codes, ids from QR payloads) can never
//! change the shape of a query.

use super::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const AND: &str = " && ";
const OR: &str = " || ";

/// Default page size used by the store when none is given.
pub const DEFAULT_PER_PAGE: u32 = 30;

/// Filter expression over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field = value`
    Eq(String, Value),
    /// `field != value`
    Ne(String, Value),
    /// All sub-filters hold. An empty list matches everything.
    And(Vec<Filter>),
    /// At least one sub-filter holds. An empty list matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    /// `field = value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// `field != value`
    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// Conjunction with another filter, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            },
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            },
            (this, other) => Self::And(vec![this, other]),
        }
    }

    /// Render to the store's filter syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use guestpass_core::Filter;
    ///
    /// let filter = Filter::eq("code", "AB12CD").and(Filter::eq("scanned", false));
    /// assert_eq!(filter.render(), r#"(code = "AB12CD" && scanned = false)"#);
    ///
    /// let hostile = Filter::eq("code", r#"" || id != ""#);
    /// assert_eq!(hostile.render(), r#"code = "\" || id != \"""#);
    /// ```
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Eq(field, value) => format!("{field} = {}", render_value(value)),
            Self::Ne(field, value) => format!("{field} != {}", render_value(value)),
            Self::And(filters) => render_group(filters, AND),
            Self::Or(filters) => render_group(filters, OR),
        }
    }

    /// Evaluate the filter against an in-memory record.
    ///
    /// Missing fields compare equal to `null` and to the empty string, which
    /// mirrors how the store treats unset text and relation fields.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Eq(field, value) => field_equals(record, field, value),
            Self::Ne(field, value) => !field_equals(record, field, value),
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

/// Rendering of an empty `Or`; no stored record has an empty id.
const NEVER: &str = r#"id = """#;

fn render_group(filters: &[Filter], separator: &str) -> String {
    match filters {
        [] if separator == OR => NEVER.to_string(),
        [] => String::new(),
        [single] => single.render(),
        many => {
            let parts: Vec<String> = many.iter().map(Filter::render).collect();
            format!("({})", parts.join(separator))
        },
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", escape(s)),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("\"{}\"", escape(&other.to_string())),
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn field_equals(record: &Record, field: &str, expected: &Value) -> bool {
    match (record.get(field), expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (None | Some(Value::Null), Value::String(s)) => s.is_empty(),
        (None, _) => false,
        (Some(actual), expected) => actual == expected,
    }
}

/// Whether every `field: expected` pair of a conditional-update guard holds
/// for `record`.
///
/// Unlike [`Filter::matches`], an unset or `null` field satisfies an
/// expected `false`, matching how the model decodes missing flags.
///
/// # Examples
///
/// ```
/// use guestpass_core::backend::{Record, guard_holds};
/// use serde_json::json;
///
/// let guard: Record = json!({"scanned": false}).as_object().cloned().unwrap_or_default();
/// let legacy: Record = json!({"id": "a1"}).as_object().cloned().unwrap_or_default();
/// assert!(guard_holds(&legacy, &guard));
/// ```
#[must_use]
pub fn guard_holds(record: &Record, guard: &Record) -> bool {
    guard.iter().all(|(field, expected)| match (record.get(field), expected) {
        (None | Some(Value::Null), Value::Bool(false)) => true,
        _ => field_equals(record, field, expected),
    })
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// Field to sort by
    pub field: String,
    /// Sort direction
    pub descending: bool,
}

impl Sort {
    /// Ascending order on `field`.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Render as `field` or `-field`.
    #[must_use]
    pub fn render(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// Parameters of a paginated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// 1-based page number
    pub page: u32,
    /// Items per page
    pub per_page: u32,
    /// Optional filter expression
    pub filter: Option<Filter>,
    /// Sort keys, applied in order
    pub sort: Vec<Sort>,
    /// Relation fields to expand inline
    pub expand: Vec<String>,
    /// Only compute `total_items`; `items` may be empty
    pub count_only: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            filter: None,
            sort: Vec::new(),
            expand: Vec::new(),
            count_only: false,
        }
    }
}

impl ListQuery {
    /// First page with the default page size and no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a page (1-based; `0` is treated as `1`).
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Set the page size (at least 1).
    #[must_use]
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Restrict results, combining with any existing filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    /// Expand a relation field.
    #[must_use]
    pub fn expand(mut self, field: impl Into<String>) -> Self {
        self.expand.push(field.into());
        self
    }

    /// Only count matches.
    #[must_use]
    pub const fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    /// Rendered `filter` parameter, if any.
    #[must_use]
    pub fn rendered_filter(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(Filter::render)
            .filter(|s| !s.is_empty())
    }

    /// Rendered `sort` parameter, if any.
    #[must_use]
    pub fn rendered_sort(&self) -> Option<String> {
        if self.sort.is_empty() {
            return None;
        }
        Some(
            self.sort
                .iter()
                .map(Sort::render)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// One page of list results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based page number
    pub page: u32,
    /// Requested page size
    pub per_page: u32,
    /// Number of matching records across all pages
    pub total_items: u64,
    /// Number of pages
    pub total_pages: u64,
    /// Records on this page
    #[serde(default)]
    pub items: Vec<Record>,
}
