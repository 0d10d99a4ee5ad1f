use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Caller-held pagination position. Pages are 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageState {
    fn default() -> Self { Self { page: 1, page_size: DEFAULT_PAGE_SIZE } }
}

impl PageState {
    pub fn new(page: usize, page_size: usize) -> Self { Self { page, page_size } }

    /// A new page size invalidates the position, so it restarts at page 1.
    pub fn set_page_size(&mut self, size: usize) {
        self.page_size = size.max(1);
        self.page = 1;
    }

    pub fn next(&mut self, total_pages: usize) { self.page = (self.page + 1).min(total_pages.max(1)); }

    pub fn prev(&mut self) { self.page = self.page.saturating_sub(1).max(1); }
}

/// One slice of a larger sequence plus the numbers needed to render a pager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Effective page after clamping.
    pub page: usize,
    pub page_size: usize,
    /// Zero when there is nothing to show; see [`Page::display_total_pages`].
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<T> {
    /// Pagers always show at least "1 of 1".
    pub fn display_total_pages(&self) -> usize { self.total_pages.max(1) }

    pub fn has_prev(&self) -> bool { self.page > 1 }

    pub fn has_next(&self) -> bool { self.page < self.total_pages }

    /// 1-based position of the first item on this page, 0 when empty.
    pub fn first_item(&self) -> usize {
        if self.items.is_empty() { 0 } else { (self.page - 1) * self.page_size + 1 }
    }

    pub fn last_item(&self) -> usize {
        if self.items.is_empty() { 0 } else { self.first_item() + self.items.len() - 1 }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_items: self.total_items,
        }
    }
}

/// Slices `items` for the requested page. Out-of-range pages clamp to the
/// nearest valid one and a zero page size is treated as one.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = ((page - 1) * page_size).min(total_items);
    let end = (start + page_size).min(total_items);
    Page { items: items[start..end].to_vec(), page, page_size, total_pages, total_items }
}
