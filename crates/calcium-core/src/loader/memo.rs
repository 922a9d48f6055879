use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::Result;

/// Lazily loaded value, computed on first successful access and reused after.
///
/// A failed load is not cached: the next access runs the loader again.
pub struct Memo<T> {
    cell: OnceLock<T>,
    loads: AtomicUsize,
}

impl<T> Memo<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn get_or_try_load<F>(&self, load: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = load()?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        // A concurrent loader may have won; either value is equivalent.
        Ok(self.cell.get_or_init(|| value))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of completed loads (1 after first access, unless raced).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish()
    }
}
