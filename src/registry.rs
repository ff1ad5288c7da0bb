use std::sync::{Arc, Mutex};

use crate::models::Period;

// Session-wide collection of every constructed Period, used to resolve the
// period reference a Grade carries by id. Append-only: periods are registered
// at construction time and live for as long as the registry does. Reads and
// writes are serialized by the inner mutex, so Grade construction and Period
// construction can run from different threads.
#[derive(Default)]
pub struct PeriodRegistry {
    periods: Mutex<Vec<Arc<Period>>>,
}

impl PeriodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, period: Arc<Period>) {
        self.periods.lock().unwrap().push(period);
    }

    // Returns every registered period with the given id. Ids are unique in
    // practice, so this holds at most one element; zero matches means the
    // reference is unresolved, which callers handle, not an error.
    pub fn find_by_id(&self, id: &str) -> Vec<Arc<Period>> {
        self.periods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.periods.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
