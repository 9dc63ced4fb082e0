use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Mutex-guarded value shared between tasks.
pub type Shared<T> = Arc<Mutex<T>>;

/// Single-writer / many-reader value; writers swap whole values.
pub type Published<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub fn new_published<T>(value: T) -> Published<T> {
    Arc::new(RwLock::new(value))
}
