mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use rand::Rng;
use spindle_core::{ControlledLoop, LoopExit, LoopState};

use common::{WAIT, wait_until};

#[derive(Debug, Clone, Copy)]
enum Op {
    Pause,
    PauseFor(u64),
    PauseAfter(u64),
    Wake,
    StartOrWake,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Pause),
        (1u64..20).prop_map(Op::PauseFor),
        (1u64..4).prop_map(Op::PauseAfter),
        Just(Op::Wake),
        Just(Op::StartOrWake),
    ]
}

fn apply(worker: &ControlledLoop, op: Op) {
    match op {
        Op::Pause => worker.pause(),
        Op::PauseFor(ms) => worker.pause_for(Duration::from_millis(ms)),
        Op::PauseAfter(n) => worker.pause_after_loops(n).unwrap(),
        Op::Wake => worker.wake(),
        Op::StartOrWake => worker.start_or_wake().unwrap(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pause_then_wake_never_strands_the_worker(jitter_us in 0u64..2_000) {
        let count = Arc::new(AtomicU64::new(0));
        let worker = Arc::new(
            ControlledLoop::of_runnable({
                let count = Arc::clone(&count);
                move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .interval(Duration::from_micros(200))
            .build()
            .unwrap(),
        );
        worker.start().unwrap();

        let controller = thread::spawn({
            let worker = Arc::clone(&worker);
            move || {
                worker.pause();
                thread::sleep(Duration::from_micros(jitter_us));
                worker.wake();
            }
        });
        controller.join().unwrap();

        let seen = count.load(Ordering::SeqCst);
        prop_assert!(wait_until(WAIT, || count.load(Ordering::SeqCst) > seen + 2));
        prop_assert!(!worker.state().is_paused());
        worker.close();
    }

    #[test]
    fn concurrent_close_terminates_once(callers in 1usize..8) {
        let worker = Arc::new(ControlledLoop::of_runnable(|| {}).build().unwrap());
        worker.start().unwrap();

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let worker = Arc::clone(&worker);
                thread::spawn(move || worker.close())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|closed| *closed)
            .count();

        prop_assert_eq!(winners, 1);
        prop_assert!(matches!(worker.wait_stopped(WAIT), Some(LoopExit::Closed)));
        prop_assert!(!worker.close());
    }

    #[test]
    fn at_most_one_worker_runs_work(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(
            ControlledLoop::of_runnable({
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(100));
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap(),
        );

        let callers: Vec<_> = ops
            .chunks(4)
            .map(|chunk| {
                let worker = Arc::clone(&worker);
                let chunk = chunk.to_vec();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for op in chunk {
                        apply(&worker, op);
                        thread::sleep(Duration::from_micros(rng.gen_range(0..300)));
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }
        worker.start_if_not_started().unwrap();
        worker.wake();
        thread::sleep(Duration::from_millis(5));

        worker.close();
        prop_assert!(worker.wait_stopped(WAIT).is_some());
        prop_assert!(max_active.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn budget_before_start_runs_exactly_n(n in 1u64..6) {
        let worker = ControlledLoop::of_runnable(|| {}).build().unwrap();
        worker.pause_after_loops(n).unwrap();
        worker.start().unwrap();

        prop_assert!(wait_until(WAIT, || worker.state() == LoopState::PausedIndefinite));
        thread::sleep(Duration::from_millis(10));
        prop_assert_eq!(worker.iterations(), n);
        worker.close();
    }
}
