use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a std mutex guarding store bookkeeping, recovering from poisoning.
pub(crate) fn guard<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned store mutex"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn recovers_poisoned_mutex() {
        let table = Mutex::new(vec![1_u8]);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _held = table.lock().expect("first lock succeeds");
            panic!("poison the table");
        }));

        assert!(table.is_poisoned());
        guard(&table, "cache::lock", "test").push(2);
        assert_eq!(*guard(&table, "cache::lock", "test"), vec![1, 2]);
    }
}
