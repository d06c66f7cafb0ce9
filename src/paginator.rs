pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// Offset based window over an already sorted list.
pub struct Paginator<'a, T> {
    items: &'a [T],
    limit: usize,
}

impl<'a, T> Paginator<'a, T> {
    /// `limit` is clamped to `1..=MAX_LIMIT`, `None` means `DEFAULT_LIMIT`.
    pub fn from(items: &'a [T], limit: Option<usize>) -> Self {
        Paginator {
            items,
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items starting at `offset`. Past the end the window is empty.
    pub fn get_window(&self, offset: usize) -> &'a [T] {
        let start = offset.min(self.items.len());
        let end = start.saturating_add(self.limit).min(self.items.len());
        &self.items[start..end]
    }

    pub fn has_more(&self, offset: usize) -> bool {
        offset.saturating_add(self.limit) < self.items.len()
    }
}
