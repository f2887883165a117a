//! Property-based tests for the resource pool.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;

use proptest::prelude::*;
use testbay_cli::domain::{Account, ResourcePool};

#[derive(Debug, Clone)]
enum Op {
    Reserve,
    ReserveAll(usize),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Reserve),
        (1usize..4).prop_map(Op::ReserveAll),
        (0usize..8).prop_map(Op::Release),
    ]
}

fn pool(size: usize, seed: u64) -> ResourcePool<Account> {
    let pool = ResourcePool::with_seed("account", seed);
    for idx in 0..size {
        pool.register(Account::new(format!("qa{idx}"), "x")).unwrap();
    }
    pool
}

proptest! {
    /// Reserved plus available always equals registered, and nothing is
    /// ever handed out twice.
    #[test]
    fn prop_pool_conserves_resources(
        size in 0usize..6,
        seed in any::<u64>(),
        ops in proptest::collection::vec(op(), 0..40),
    ) {
        let pool = pool(size, seed);
        let mut held: Vec<Account> = Vec::new();

        for op in ops {
            match op {
                Op::Reserve => {
                    if let Ok(account) = pool.reserve() {
                        prop_assert!(!held.contains(&account), "double booking of {}", account.username);
                        held.push(account);
                    }
                }
                Op::ReserveAll(n) => {
                    let any: fn(&Account) -> bool = |_| true;
                    let before = pool.reserved_count();
                    match pool.reserve_all(&vec![any; n]) {
                        Ok(granted) => {
                            prop_assert_eq!(granted.len(), n);
                            for account in granted {
                                prop_assert!(!held.contains(&account));
                                held.push(account);
                            }
                        }
                        Err(_) => prop_assert_eq!(pool.reserved_count(), before),
                    }
                }
                Op::Release(idx) => {
                    if idx < held.len() {
                        let account = held.swap_remove(idx);
                        prop_assert!(pool.release(&account));
                        prop_assert!(!pool.release(&account), "second release must be a no-op");
                    }
                }
            }
            prop_assert_eq!(pool.reserved_count(), held.len());
            prop_assert_eq!(pool.reserved_count() + pool.available_count(), size);
        }
    }

    /// `reserve_all` succeeds exactly when enough resources are free.
    #[test]
    fn prop_reserve_all_is_atomic(size in 0usize..6, taken in 0usize..6, wanted in 1usize..8) {
        let pool = pool(size, 1);
        let taken = taken.min(size);
        for _ in 0..taken {
            pool.reserve().unwrap();
        }
        let any: fn(&Account) -> bool = |_| true;
        let result = pool.reserve_all(&vec![any; wanted]);
        if wanted <= size - taken {
            let granted = result.unwrap();
            let ids: HashSet<_> = granted.iter().map(|a| a.username.clone()).collect();
            prop_assert_eq!(ids.len(), wanted);
            prop_assert_eq!(pool.reserved_count(), taken + wanted);
        } else {
            prop_assert!(result.unwrap_err().is_retryable());
            prop_assert_eq!(pool.reserved_count(), taken);
        }
    }
}
