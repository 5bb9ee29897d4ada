#![forbid(unsafe_code)]

//! Read-side aggregation pipeline.
//!
//! A [`Pipeline`] describes a denormalized read over one collection and is
//! compiled into SQL in a fixed stage order:
//!
//! 1. text filter over the source's searchable columns
//! 2. equality / membership filters
//! 3. sort (whitelisted column, rowid tiebreaker)
//! 4. owner join, one-to-one on the user primary key
//! 5. optional like join producing `likes_count` and `is_liked`
//! 6. projection of the source's public columns
//! 7. pagination
//!
//! The selected row layout is always: source columns, then the four owner
//! columns, then (if likes are joined) the count and the viewer flag.

use libsql::Value;
use serde::Serialize;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Number of owner columns appended after the source projection.
pub const OWNER_COLUMNS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Parses raw query values. Missing values take the defaults; anything
    /// that is not a positive integer is rejected rather than coerced.
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Result<Self, String> {
        let page = parse_positive("page", page, DEFAULT_PAGE)?;
        let limit = parse_positive("limit", limit, DEFAULT_LIMIT)?.min(MAX_LIMIT);
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

fn parse_positive(name: &str, raw: Option<&str>, default: u32) -> Result<u32, String> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("{name} must be a positive integer")),
        Ok(value) => Ok(value),
    }
}

/// Paginated result in the shape clients of the video API expect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: u64,
    pub limit: u32,
    pub page: u32,
    pub total_pages: u64,
    pub paging_counter: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
    pub prev_page: Option<u32>,
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    pub fn new(docs: Vec<T>, total_docs: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit.max(1));
        let total_pages = total_docs.div_ceil(limit);
        let page = request.page;
        let has_prev_page = page > 1;
        let has_next_page = u64::from(page) < total_pages;
        Self {
            docs,
            total_docs,
            limit: request.limit,
            page,
            total_pages,
            paging_counter: request.offset() + 1,
            has_prev_page,
            has_next_page,
            prev_page: has_prev_page.then(|| page - 1),
            next_page: has_next_page.then(|| page + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub column: &'static str,
    pub direction: SortDirection,
}

impl Sort {
    pub const fn newest_first() -> Self {
        Self {
            column: "created_at",
            direction: SortDirection::Desc,
        }
    }

    /// Maps a public field name onto a sortable column. `sort_type` other
    /// than `asc` sorts descending.
    pub fn parse(
        sort_by: Option<&str>,
        sort_type: Option<&str>,
        allowed: &[(&str, &'static str)],
    ) -> Result<Self, String> {
        let Some(field) = sort_by.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::newest_first());
        };
        let column = allowed
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, column)| *column)
            .ok_or_else(|| format!("cannot sort by '{field}'"))?;
        let direction = match sort_type.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "asc" || value == "1" => SortDirection::Asc,
            _ => SortDirection::Desc,
        };
        Ok(Self { column, direction })
    }
}

/// Static description of a collection that can be aggregated.
#[derive(Debug)]
pub struct Source {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub search_columns: &'static [&'static str],
    /// `target_kind` value in the likes table for documents of this source.
    pub like_kind: &'static str,
}

impl Source {
    pub fn owner_offset(&self) -> usize {
        self.columns.len()
    }

    pub fn likes_offset(&self) -> usize {
        self.columns.len() + OWNER_COLUMNS
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(&'static str, Value),
    LikedBy(String),
    VisibleTo(String),
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    source: &'static Source,
    search: Option<String>,
    conditions: Vec<Condition>,
    sort: Sort,
    likes: bool,
    viewer: Option<String>,
}

impl Pipeline {
    pub fn new(source: &'static Source) -> Self {
        Self {
            source,
            search: None,
            conditions: Vec::new(),
            sort: Sort::newest_first(),
            likes: false,
            viewer: None,
        }
    }

    pub fn source(&self) -> &'static Source {
        self.source
    }

    pub fn has_likes(&self) -> bool {
        self.likes
    }

    pub fn search(mut self, text: Option<&str>) -> Self {
        self.search = text
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self
    }

    pub fn filter_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column, value.into()));
        self
    }

    /// Keeps only documents the given user has liked.
    pub fn liked_by(mut self, user_id: &str) -> Self {
        self.conditions.push(Condition::LikedBy(user_id.to_string()));
        self
    }

    /// Keeps published documents plus the viewer's own drafts. Only for
    /// sources with an `is_published` column.
    pub fn visible_to(mut self, viewer: &str) -> Self {
        self.conditions.push(Condition::VisibleTo(viewer.to_string()));
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Joins the likes table; `viewer` drives the `is_liked` flag.
    pub fn with_likes(mut self, viewer: Option<&str>) -> Self {
        self.likes = true;
        self.viewer = viewer.map(str::to_string);
        self
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> String {
        let mut clauses = Vec::new();

        if let Some(text) = &self.search {
            let pattern = format!("%{}%", escape_like(text));
            let ors: Vec<String> = self
                .source
                .search_columns
                .iter()
                .map(|column| {
                    params.push(Value::Text(pattern.clone()));
                    format!("r.{column} LIKE ? ESCAPE '\\'")
                })
                .collect();
            if !ors.is_empty() {
                clauses.push(format!("({})", ors.join(" OR ")));
            }
        }

        for condition in &self.conditions {
            match condition {
                Condition::Eq(column, value) => {
                    params.push(value.clone());
                    clauses.push(format!("r.{column} = ?"));
                }
                Condition::LikedBy(user_id) => {
                    params.push(Value::Text(self.source.like_kind.to_string()));
                    params.push(Value::Text(user_id.clone()));
                    clauses.push(
                        "r.id IN (SELECT lk.target_id FROM likes AS lk \
                         WHERE lk.target_kind = ? AND lk.liked_by = ?)"
                            .to_string(),
                    );
                }
                Condition::VisibleTo(viewer) => {
                    params.push(Value::Text(viewer.clone()));
                    clauses.push("(r.is_published = 1 OR r.owner = ?)".to_string());
                }
            }
        }

        if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        }
    }

    fn select_list(&self, params: &mut Vec<Value>) -> String {
        let mut columns: Vec<String> = self
            .source
            .columns
            .iter()
            .map(|column| format!("r.{column}"))
            .collect();
        columns.extend(
            ["o.id", "o.username", "o.fullname", "o.avatar"]
                .iter()
                .map(|column| column.to_string()),
        );
        if self.likes {
            let kind = self.source.like_kind;
            params.push(Value::Text(kind.to_string()));
            columns.push(
                "(SELECT COUNT(*) FROM likes AS l WHERE l.target_kind = ? AND l.target_id = r.id)"
                    .to_string(),
            );
            match &self.viewer {
                Some(viewer) => {
                    params.push(Value::Text(kind.to_string()));
                    params.push(Value::Text(viewer.clone()));
                    columns.push(
                        "EXISTS (SELECT 1 FROM likes AS l WHERE l.target_kind = ? \
                         AND l.target_id = r.id AND l.liked_by = ?)"
                            .to_string(),
                    );
                }
                None => columns.push("0".to_string()),
            }
        }
        columns.join(", ")
    }

    /// Full pipeline for one page of documents.
    pub fn compile_page(&self, page: PageRequest) -> CompiledQuery {
        let mut params = Vec::new();
        let select = self.select_list(&mut params);
        let filter = self.where_clause(&mut params);
        let direction = self.sort.direction.as_sql();
        params.push(Value::Integer(i64::from(page.limit)));
        params.push(Value::Integer(page.offset() as i64));
        let sql = format!(
            "SELECT {select} FROM {table} AS r \
             LEFT JOIN users AS o ON o.id = r.owner{filter} \
             ORDER BY r.{column} {direction}, r.rowid {direction} \
             LIMIT ? OFFSET ?",
            table = self.source.table,
            column = self.sort.column,
        );
        CompiledQuery { sql, params }
    }

    /// Counts matching documents; joins do not change the count.
    pub fn compile_count(&self) -> CompiledQuery {
        let mut params = Vec::new();
        let filter = self.where_clause(&mut params);
        let sql = format!(
            "SELECT COUNT(*) FROM {table} AS r{filter}",
            table = self.source.table
        );
        CompiledQuery { sql, params }
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}


#[cfg(test)]
mod tests {
    use super::testing::window_len;
    use super::*;

    static ITEMS: Source = Source {
        table: "items",
        columns: &["id", "title", "created_at"],
        search_columns: &["title", "description"],
        like_kind: "item",
    };

    const SORTABLE: &[(&str, &str)] = &[("createdAt", "created_at"), ("views", "views")];

    #[test]
    fn page_request_defaults_and_caps() {
        assert_eq!(PageRequest::parse(None, None).unwrap(), PageRequest::default());
        let capped = PageRequest::parse(Some("3"), Some("5000")).unwrap();
        assert_eq!(capped.page, 3);
        assert_eq!(capped.limit, MAX_LIMIT);
        assert_eq!(capped.offset(), 200);
    }

    #[test]
    fn page_request_rejects_non_numeric_and_zero() {
        assert!(PageRequest::parse(Some("abc"), None).is_err());
        assert!(PageRequest::parse(None, Some("0")).is_err());
        assert!(PageRequest::parse(Some("-1"), None).is_err());
        assert!(PageRequest::parse(Some("1.5"), None).is_err());
    }

    #[test]
    fn window_len_matches_formula() {
        for total in [0u64, 1, 9, 10, 11, 25] {
            for page in 1..=4u32 {
                for limit in [1u32, 3, 10] {
                    let request = PageRequest { page, limit };
                    let expected = (limit as i64)
                        .min((total as i64 - (page as i64 - 1) * limit as i64).max(0));
                    assert_eq!(window_len(request, total) as i64, expected);
                }
            }
        }
    }

    #[test]
    fn page_metadata_is_consistent() {
        let page = Page::new(vec![1, 2, 3], 23, PageRequest { page: 2, limit: 10 });
        assert_eq!(page.total_pages, 3);
        assert!(page.has_prev_page && page.has_next_page);
        assert_eq!(page.prev_page, Some(1));
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.paging_counter, 11);

        let last = Page::<u8>::new(vec![], 0, PageRequest::default());
        assert_eq!(last.total_pages, 0);
        assert!(!last.has_next_page && !last.has_prev_page);
    }

    #[test]
    fn sort_parse_whitelists_fields() {
        assert_eq!(Sort::parse(None, None, SORTABLE).unwrap(), Sort::newest_first());
        let views = Sort::parse(Some("views"), Some("asc"), SORTABLE).unwrap();
        assert_eq!(views.column, "views");
        assert_eq!(views.direction, SortDirection::Asc);
        let desc = Sort::parse(Some("createdAt"), None, SORTABLE).unwrap();
        assert_eq!(desc.direction, SortDirection::Desc);
        assert!(Sort::parse(Some("password; DROP TABLE"), None, SORTABLE).is_err());
    }

    #[test]
    fn compiled_page_orders_stages() {
        let pipeline = Pipeline::new(&ITEMS)
            .search(Some("50%_off"))
            .filter_eq("owner", "u1")
            .with_likes(Some("viewer"))
            .sort(Sort::parse(Some("views"), Some("asc"), SORTABLE).unwrap());
        let query = pipeline.compile_page(PageRequest { page: 2, limit: 5 });

        let where_at = query.sql.find("WHERE (r.title LIKE").unwrap();
        let join_at = query.sql.find("LEFT JOIN users").unwrap();
        let order_at = query.sql.find("ORDER BY r.views ASC").unwrap();
        let limit_at = query.sql.find("LIMIT ? OFFSET ?").unwrap();
        assert!(join_at < where_at && where_at < order_at && order_at < limit_at);

        let placeholders = query.sql.matches('?').count();
        assert_eq!(placeholders, query.params.len());
        assert_eq!(
            query.params.first(),
            Some(&Value::Text("item".to_string()))
        );
        assert!(query.params.contains(&Value::Text("%50\\%\\_off%".to_string())));
        assert_eq!(query.params[query.params.len() - 2], Value::Integer(5));
        assert_eq!(query.params[query.params.len() - 1], Value::Integer(5));
    }

    #[test]
    fn count_query_skips_joins_and_paging() {
        let pipeline = Pipeline::new(&ITEMS).liked_by("u2").with_likes(None);
        let query = pipeline.compile_count();
        assert!(!query.sql.contains("LEFT JOIN"));
        assert!(!query.sql.contains("LIMIT"));
        assert_eq!(query.sql.matches('?').count(), query.params.len());
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn anonymous_viewer_never_matches() {
        let query = Pipeline::new(&ITEMS)
            .with_likes(None)
            .compile_page(PageRequest::default());
        assert!(query.sql.contains(", 0 FROM items"));
    }
}
