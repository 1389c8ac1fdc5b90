use serde::Deserialize;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 50;

/// A bounded `skip`/`take` window over the recency-sorted poll collection.
///
/// Out-of-range input is clamped rather than rejected: an absent, zero or
/// unparsable limit becomes [`DEFAULT_LIMIT`], anything else is clamped into
/// `1..=MAX_LIMIT`, and negative pages become page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    page: u32,
    limit: u32,
}

impl Default for PageWindow {
    fn default() -> Self {
        PageWindow {
            page: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Raw `?page=&limit=` query, kept as strings so malformed numbers fall back
/// to defaults instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageWindow {
    pub fn new(page: i64, limit: i64) -> Self {
        let limit = if limit == 0 {
            DEFAULT_LIMIT
        } else {
            limit.clamp(1, MAX_LIMIT as i64) as u32
        };
        let page = page.clamp(0, u32::MAX as i64) as u32;
        PageWindow { page, limit }
    }

    pub fn from_query(query: &PageQuery) -> Self {
        let parse = |raw: &Option<String>| raw.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        PageWindow::new(
            parse(&query.page).unwrap_or(0),
            parse(&query.limit).unwrap_or(DEFAULT_LIMIT as i64),
        )
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }

    pub fn take(&self) -> u64 {
        u64::from(self.limit)
    }

    /// Slices an already sorted collection.
    pub fn apply<'a, T>(&self, sorted: &'a [T]) -> &'a [T] {
        let start = usize::try_from(self.skip()).unwrap_or(usize::MAX).min(sorted.len());
        let end = start.saturating_add(self.limit as usize).min(sorted.len());
        &sorted[start..end]
    }

    /// A short page means there is nothing after it.
    pub fn is_last_page(&self, returned: usize) -> bool {
        returned < self.limit as usize
    }

    pub fn next(&self) -> Self {
        PageWindow {
            page: self.page.saturating_add(1),
            limit: self.limit,
        }
    }
}
