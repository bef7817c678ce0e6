use once_cell::sync::OnceCell;
use uuid::Uuid;

/// Lazily generated identifier for the current page view.
///
/// The first call to [`PageViewId::get`] generates a v4 UUID; every later
/// call returns the same value for the lifetime of the holder.
#[derive(Debug, Default)]
pub struct PageViewId {
    cell: OnceCell<String>,
}

impl PageViewId {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Seed the id, e.g. when the host already has one. Ignored once set.
    #[must_use]
    pub fn with_value(value: impl Into<String>) -> Self {
        let id = Self::new();
        let _ = id.cell.set(value.into());
        id
    }

    #[must_use]
    pub fn get(&self) -> &str {
        self.cell.get_or_init(|| Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_memoized() {
        let id = PageViewId::new();
        let first = id.get().to_string();
        assert_eq!(id.get(), first);
        assert_eq!(first.len(), 36, "should be a hyphenated uuid");
    }

    #[test]
    fn seeded_value_is_kept() {
        let id = PageViewId::with_value("pv-123");
        assert_eq!(id.get(), "pv-123");
    }

    #[test]
    fn separate_holders_differ() {
        assert_ne!(PageViewId::new().get(), PageViewId::new().get());
    }
}
