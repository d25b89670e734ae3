use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, current_page: i64, page_size: i64, total: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items,
            current_page,
            total_pages,
            total,
        }
    }
}

/// 1-based page number to `(limit, offset)`. Pages below 1 clamp to 1.
pub fn page_bounds(page: i64, page_size: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    (page, page_size, (page - 1) * page_size)
}
