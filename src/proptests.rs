use super::*;

use proptest::prelude::*;
use std::collections::BTreeMap;

/// Structural checks on top of [`EventTree::validate`]: parent links agree
/// with successor order, and every live node is reachable by key.
fn validate_tree(t: &EventTree) {
    t.validate().unwrap_or_else(|e| panic!("{e}"));

    let mut expected_len = 0usize;
    let mut prev: Option<NodeRef> = None;
    let mut cur = t.first();
    while let Some(node) = cur {
        expected_len += 1;
        assert_eq!(t.find(t.id(node)), Some(node), "node must be reachable by key");
        assert_eq!(t.predecessor(node), prev, "predecessor must mirror successor");
        prev = cur;
        cur = t.successor(node);
    }
    assert_eq!(prev, t.last());
    assert_eq!(expected_len, t.len(), "successor walk must visit every node");
}

#[derive(proptest_derive::Arbitrary, Clone, Debug)]
enum Op {
    Insert(
        #[proptest(strategy = "-64i64..64")] EventId,
        #[proptest(strategy = "-20i64..100")] Count,
    ),
    Remove(#[proptest(strategy = "-64i64..64")] EventId),
    Get(#[proptest(strategy = "-64i64..64")] EventId),
    RangeSum(
        #[proptest(strategy = "-70i64..70")] EventId,
        #[proptest(strategy = "-70i64..70")] EventId,
    ),
    Compact,
}

fn sorted_pairs_strategy() -> impl Strategy<Value = Vec<(EventId, Count)>> {
    prop::collection::btree_map(any::<i32>().prop_map(EventId::from), 0i64..1_000, 0..=600)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=1500)) {
        let mut t = EventTree::new();
        let mut m: BTreeMap<EventId, Count> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(id, delta) => {
                    let node = t.insert(id, delta);
                    let expected = m.entry(id).or_insert(0);
                    *expected += delta;
                    prop_assert_eq!(t.entry(node), (id, *expected));
                }
                Op::Remove(id) => {
                    prop_assert_eq!(t.remove(id), m.remove(&id));
                    prop_assert_eq!(t.find(id), None);
                }
                Op::Get(id) => {
                    prop_assert_eq!(t.get(id), m.get(&id).copied());
                }
                Op::RangeSum(lo, hi) => {
                    let expected: Count = if lo <= hi {
                        m.range(lo..=hi).map(|(_, c)| c).sum()
                    } else {
                        0
                    };
                    prop_assert_eq!(t.range_sum(lo, hi), expected);
                }
                Op::Compact => {
                    t.compact();
                }
            }

            prop_assert_eq!(t.len(), m.len());
            prop_assert!(t.validate().is_ok(), "{:?}", t.validate());
        }

        validate_tree(&t);
        let expected: Vec<(EventId, Count)> = m.into_iter().collect();
        prop_assert_eq!(t.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn prop_neighbours(keys in prop::collection::btree_set(-1_000i64..1_000, 1..200), probe in -1_100i64..1_100) {
        let t: EventTree = keys.iter().map(|&k| (k, 1)).collect();

        let next = keys.range(probe + 1..).next().copied();
        let prev = keys.range(..probe).next_back().copied();
        prop_assert_eq!(t.next_after(probe).map(|n| t.id(n)), next);
        prop_assert_eq!(t.prev_before(probe).map(|n| t.id(n)), prev);
        prop_assert_eq!(t.lower_bound(probe).map(|n| t.id(n)), keys.range(probe..).next().copied());

        // Adjacent keys are each other's successor and predecessor.
        let sorted: Vec<EventId> = keys.iter().copied().collect();
        for pair in sorted.windows(2) {
            let a = t.find(pair[0]).unwrap();
            let b = t.find(pair[1]).unwrap();
            prop_assert_eq!(t.successor(a), Some(b));
            prop_assert_eq!(t.predecessor(b), Some(a));
        }
    }

    #[test]
    fn prop_bulk_build_equivalence(pairs in sorted_pairs_strategy(), probes in prop::collection::vec(any::<i32>().prop_map(EventId::from), 0..50)) {
        let bulk = EventTree::from_sorted(&pairs).unwrap();
        let incremental: EventTree = pairs.iter().copied().collect();

        validate_tree(&bulk);
        prop_assert_eq!(&bulk, &incremental);
        if !pairs.is_empty() {
            prop_assert_eq!(bulk.height(), pairs.len().ilog2() as usize + 1);
        }

        for probe in probes {
            prop_assert_eq!(bulk.get(probe), incremental.get(probe));
            prop_assert_eq!(
                bulk.next_after(probe).map(|n| bulk.entry(n)),
                incremental.next_after(probe).map(|n| incremental.entry(n))
            );
            prop_assert_eq!(
                bulk.prev_before(probe).map(|n| bulk.entry(n)),
                incremental.prev_before(probe).map(|n| incremental.entry(n))
            );
            let hi = probe.saturating_add(1 << 28);
            prop_assert_eq!(bulk.range_sum(probe, hi), incremental.range_sum(probe, hi));
        }
    }

    #[test]
    fn prop_bulk_build_then_delete(pairs in sorted_pairs_strategy(), seed in any::<u64>()) {
        use rand::seq::SliceRandom;
        use rand::{rngs::StdRng, SeedableRng};

        let mut t = EventTree::from_sorted(&pairs).unwrap();
        let mut order: Vec<EventId> = pairs.iter().map(|&(id, _)| id).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut remaining: BTreeMap<EventId, Count> = pairs.iter().copied().collect();
        for id in order.into_iter().take(pairs.len() / 2 + 1) {
            prop_assert_eq!(t.remove(id), remaining.remove(&id));
            prop_assert!(t.validate().is_ok(), "{:?}", t.validate());
        }
        let expected: Vec<(EventId, Count)> = remaining.into_iter().collect();
        prop_assert_eq!(t.iter().collect::<Vec<_>>(), expected);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<EventId> = vec![10, 20, 30, 40, 50, 60, 70];

    for_each_permutation(&keys, |perm| {
        let mut t = EventTree::new();
        for &k in &perm {
            t.insert(k, k);
            t.validate().unwrap();
        }
        validate_tree(&t);
        let got: Vec<EventId> = t.iter().map(|(id, _)| id).collect();
        assert_eq!(got, keys);
    });
}

#[test]
fn exhaustive_delete_order_small_set() {
    let keys: Vec<EventId> = vec![1, 2, 3, 4, 5, 6, 7];

    // Shapes built by ascending inserts and by bulk construction differ;
    // delete from both in every order.
    let ascending: EventTree = keys.iter().map(|&k| (k, k)).collect();
    let pairs: Vec<(EventId, Count)> = keys.iter().map(|&k| (k, k)).collect();
    let bulk = EventTree::from_sorted(&pairs).unwrap();

    for base in [ascending, bulk] {
        for_each_permutation(&keys, |perm| {
            let mut t = base.clone();
            let mut m: BTreeMap<EventId, Count> = pairs.iter().copied().collect();

            for k in perm {
                let node = t.find(k).expect("key present before deletion");
                assert_eq!(t.delete(node), Ok((k, k)));
                m.remove(&k);
                validate_tree(&t);
                assert_eq!(t.iter().collect::<Vec<_>>(), m.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>());
            }
            assert!(t.is_empty());
            assert_eq!(t.root(), None);
        });
    }
}
