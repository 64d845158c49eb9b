//! Property tests for blocking pool bookkeeping.

use std::time::Duration;

use proptest::prelude::*;
use sluice_pool::testing::MockProvider;
use sluice_pool::{ConnectionInfo, Lease, RetryPolicy, SharedPool};

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    Kill(usize),
    FailNextOpen,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Kill),
        1 => Just(Op::FailNextOpen),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn occupancy_always_adds_up(
        capacity in 1usize..6,
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let mock = MockProvider::new();
        let pool = SharedPool::with_retry(mock.clone(), RetryPolicy::new(1, Duration::ZERO));
        pool.initialize(
            ConnectionInfo::new("db", "app", "pw", "orders").with_max_resources(capacity),
        )
        .unwrap();

        let mut held: Vec<Lease<MockProvider>> = Vec::new();
        for op in ops {
            match op {
                Op::Acquire => {
                    if let Ok(lease) = pool.acquire_timeout(Duration::from_millis(1)) {
                        prop_assert!(held.iter().all(|h| h.id() != lease.id()));
                        held.push(lease);
                    }
                }
                Op::Release(i) if !held.is_empty() => {
                    let lease = held.swap_remove(i % held.len());
                    drop(lease);
                }
                Op::Kill(i) if !held.is_empty() => {
                    let id = held[i % held.len()].id();
                    mock.kill(id);
                }
                Op::FailNextOpen => mock.fail_next_opens(1),
                Op::Release(_) | Op::Kill(_) => {}
            }

            let info = pool.info().unwrap();
            prop_assert!(info.available <= capacity);
            prop_assert_eq!(info.in_use, held.len());
            prop_assert_eq!(info.available + info.in_use + info.vacant, capacity);
        }

        drop(held);
        let info = pool.info().unwrap();
        prop_assert_eq!(info.in_use, 0);
        prop_assert_eq!(info.available + info.vacant, capacity);
    }
}
