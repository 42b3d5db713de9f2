use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc::channel};

/// Run `job` over `items` on `workers` scoped threads.
///
/// Results come back in submission order. Once a job fails no further items are
/// started; jobs already running finish, and the earliest failure by index wins.
pub(super) fn run_ordered<T, R, E, F>(items: Vec<T>, workers: usize, job: F) -> Result<Vec<R>, E>
where
    T: Send,
    R: Send,
    E: Send,
    F: Fn(T) -> Result<R, E> + Sync,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let worker_count = workers.clamp(1, total);
    let queue = Mutex::new(items.into_iter().enumerate().collect::<VecDeque<_>>());
    let failed = AtomicBool::new(false);
    let (tx, rx) = channel();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            let failed = &failed;
            let job = &job;
            scope.spawn(move || {
                loop {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some((index, item)) = next else {
                        break;
                    };
                    let result = job(item);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    if tx.send((index, result)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<Result<R, E>>> = (0..total).map(|_| None).collect();
    for (index, result) in rx {
        slots[index] = Some(result);
    }
    let mut results = Vec::with_capacity(total);
    for slot in slots {
        match slot {
            Some(Ok(value)) => results.push(value),
            Some(Err(err)) => return Err(err),
            // Items start in order, so an unstarted item always follows the failure.
            None => break,
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn results_keep_submission_order() {
        let out: Result<Vec<usize>, ()> = run_ordered((0..20).collect(), 4, |item: usize| {
            std::thread::sleep(std::time::Duration::from_millis((20 - item as u64) % 5));
            Ok(item * 10)
        });
        assert_eq!(out.unwrap(), (0..20).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn single_slot_stops_after_first_failure() {
        let started = AtomicUsize::new(0);
        let out: Result<Vec<usize>, String> = run_ordered((0..5).collect(), 1, |item: usize| {
            started.fetch_add(1, Ordering::SeqCst);
            if item == 1 {
                Err(format!("item {item} failed"))
            } else {
                Ok(item)
            }
        });
        assert_eq!(out.unwrap_err(), "item 1 failed");
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn earliest_failure_is_reported() {
        let out: Result<Vec<usize>, usize> = run_ordered((0..6).collect(), 6, |item: usize| {
            if item >= 2 { Err(item) } else { Ok(item) }
        });
        assert_eq!(out.unwrap_err(), 2);
    }

    #[test]
    fn workers_are_clamped_to_at_least_one() {
        let out: Result<Vec<u8>, ()> = run_ordered(vec![1, 2, 3], 0, Ok);
        assert_eq!(out.unwrap(), vec![1, 2, 3]);
    }
}
