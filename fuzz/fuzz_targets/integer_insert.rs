#![no_main]
use libfuzzer_sys::fuzz_target;

use transient_btree_set::{BtreeConfig, BtreeSet};

fuzz_target!(|data: (Vec<i64>, u8)| {
    let order = usize::from(data.1.max(2));
    let mut m = std::collections::BTreeSet::default();
    let mut fixture = BtreeSet::with_capacity(BtreeConfig::default().order(order), 1024).unwrap();

    for key in data.0 {
        let newly_added = m.insert(key);
        assert_eq!(newly_added, fixture.insert(key).unwrap());
    }

    // Check len() function
    assert_eq!(m.len(), fixture.len());

    // contains query for each entry
    for k in m.iter() {
        assert!(fixture.contains(k).unwrap());
    }

    // Check that the sets are equal when iterated
    let m: Vec<_> = m.into_iter().collect();
    assert_eq!(m, fixture.to_vec().unwrap());
});
