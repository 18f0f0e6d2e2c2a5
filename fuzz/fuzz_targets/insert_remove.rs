#![no_main]
use libfuzzer_sys::fuzz_target;

use transient_btree_set::{BtreeConfig, BtreeSet};

fuzz_target!(|data: (Vec<(i64, bool)>, u8)| {
    let order = usize::from(data.1.max(2));
    let mut m = std::collections::BTreeSet::default();
    let mut fixture = BtreeSet::with_capacity(BtreeConfig::default().order(order), 1024).unwrap();

    for (key, insert) in data.0 {
        if insert {
            assert_eq!(m.insert(key), fixture.insert(key).unwrap());
        } else {
            assert_eq!(m.remove(&key), fixture.remove(&key).unwrap());
        }
    }

    assert_eq!(m.len(), fixture.len());
    if let Some(first) = m.iter().next() {
        assert_eq!(*first, fixture.first().unwrap());
    }

    // Check that the sets are equal when iterated
    let m: Vec<_> = m.into_iter().collect();
    assert_eq!(m, fixture.to_vec().unwrap());
});
