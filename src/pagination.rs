use serde::{Deserialize, Serialize};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;

/// A normalized page/limit pair.
///
/// Callers hand in whatever the wire carried; `new` fills in defaults and
/// clamps both values to at least 1 so the offset math below cannot
/// underflow or divide by zero. There is no upper bound on `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(DEFAULT_PAGE).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).max(1),
        }
    }

    /// Number of rows to skip for this page.
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    pub fn limit(&self) -> u64 {
        self.limit as u64
    }

    /// Wraps a page slice together with its pagination metadata.
    pub fn paged<T>(&self, data: Vec<T>, total_items: u64) -> Paged<T> {
        Paged {
            data,
            meta: PageMeta {
                total_items,
                total_pages: total_items.div_ceil(self.limit as u64),
                current_page: self.page,
                limit: self.limit,
            },
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub limit: u32,
}

/// The list reply shape: one page of rows plus the metadata consumers use to
/// drive further page requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}
