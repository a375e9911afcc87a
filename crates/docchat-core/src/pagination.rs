//! Offset/limit pagination arithmetic.
//!
//! Shared by the document listing and the chunk browser. Pages are
//! 1-based; there is always at least one page, even when `total` is 0.
//!
//! ```rust
//! use docchat_core::pagination::Pagination;
//!
//! let p = Pagination { limit: 50, offset: 100, total: 120 };
//! assert_eq!(p.page(), 3);
//! assert_eq!(p.pages(), 3);
//! assert!(!p.has_next());
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

impl Pagination {
    /// `floor(offset / limit) + 1`.
    pub fn page(&self) -> u64 {
        u64::from(self.offset) / u64::from(self.limit.max(1)) + 1
    }

    /// `ceil(total / limit)`, never less than 1.
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit.max(1))).max(1)
    }

    pub fn has_prev(&self) -> bool {
        self.page() > 1
    }

    pub fn has_next(&self) -> bool {
        self.page() < self.pages()
    }

    /// Offset of the next page, clamped to the start of the last page.
    pub fn next_offset(&self) -> u32 {
        let last = (self.pages() - 1) * u64::from(self.limit);
        let next = u64::from(self.offset) + u64::from(self.limit);
        u32::try_from(next.min(last)).unwrap_or(u32::MAX)
    }

    /// Offset of the previous page, clamped to 0.
    pub fn prev_offset(&self) -> u32 {
        self.offset.saturating_sub(self.limit)
    }

    /// Offset of a 1-based page number, clamped into range.
    pub fn offset_for_page(&self, page: u64) -> u32 {
        let page = page.clamp(1, self.pages());
        u32::try_from((page - 1) * u64::from(self.limit)).unwrap_or(u32::MAX)
    }
}
