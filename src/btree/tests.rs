use debug_tree::TreeBuilder;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::{cmp::Ordering, collections::VecDeque, fmt::Debug, ops::Bound};

use super::*;

fn print_tree<K>(t: &BtreeSet<K>) -> Result<()>
where
    K: KeyType + Debug,
{
    let mut b = TreeBuilder::new();

    print_tree_node(&mut b, t, t.root_id)?;

    b.print();
    Ok(())
}

fn print_tree_node<K>(builder: &mut TreeBuilder, t: &BtreeSet<K>, node_id: NodeId) -> Result<()>
where
    K: KeyType + Debug,
{
    let node = t.nodes.get(node_id)?;
    let mut branch = builder.add_branch(&format!(
        "(node {} with {} keys and {} children)",
        node.id,
        node.keys.len(),
        node.children.len()
    ));
    if node.is_leaf {
        // Only print the keys
        for i in 0..node.keys.len() {
            builder.add_leaf(&format!("{:?} ({}. key)", node.keys[i], i));
        }
    } else {
        // Print both the keys and the child nodes
        for i in 0..node.children.len() {
            print_tree_node(builder, t, node.children[i])?;
            if i < node.keys.len() {
                builder.add_leaf(&format!("{:?} ({}. key)", node.keys[i], i));
            }
        }
    }
    branch.release();

    Ok(())
}

fn check_order<K>(t: &BtreeSet<K>)
where
    K: KeyType + Debug,
{
    let mut previous: Option<K> = None;
    for k in t.iter().unwrap() {
        let k = k.unwrap();

        if let Some(previous) = previous {
            if previous >= k {
                dbg!(&previous, &k);
            }
            assert_eq!(Ordering::Less, previous.cmp(&k));
        }

        previous = Some(k);
    }
}

/// Collect the keys of all nodes in breadth-first order and check the
/// structural rules along the way: parent back-references, the occupancy
/// bounds of every node, uniform leaf depth and that the stored keys add up
/// to the reported length.
fn collect_nodes<K>(t: &BtreeSet<K>) -> Vec<Vec<K>>
where
    K: KeyType,
{
    let order = t.config.order;
    let mut result = Vec::new();
    let mut nr_keys = 0;
    let mut leaf_depth = None;
    let mut queue = VecDeque::new();
    queue.push_back((t.root_id, 0usize));
    while let Some((id, depth)) = queue.pop_front() {
        let node = t.nodes.get(id).unwrap();

        assert!(node.keys.len() <= 2 * order - 1);
        if id == t.root_id {
            // The root only holds no keys when the whole set is empty
            assert_eq!(t.is_empty(), node.keys.is_empty());
        } else {
            assert!(node.keys.len() >= order - 1);
        }
        if node.is_leaf {
            // Every leaf sits at the same depth
            assert_eq!(*leaf_depth.get_or_insert(depth), depth);
        }

        for child in &node.children {
            let child_node = t.nodes.get(*child).unwrap();
            assert_eq!(Some(id), child_node.parent);
            queue.push_back((*child, depth + 1));
        }
        nr_keys += node.keys.len();
        result.push(node.keys);
    }
    assert_eq!(t.len(), nr_keys);
    result
}

#[test]
fn insert_contains() {
    let nr_entries = 2000u64;

    let mut t: BtreeSet<u64> = BtreeSet::with_capacity(BtreeConfig::default(), 2000).unwrap();

    assert_eq!(true, t.is_empty());

    assert_eq!(true, t.insert(0).unwrap());

    assert_eq!(false, t.is_empty());
    assert_eq!(1, t.len());

    for i in 1..nr_entries {
        assert_eq!(true, t.insert(i).unwrap());
    }
    assert_eq!(nr_entries as usize, t.len());

    // Inserting an existing key leaves the set unchanged
    assert_eq!(false, t.insert(0).unwrap());
    assert_eq!(false, t.insert(1999).unwrap());
    assert_eq!(nr_entries as usize, t.len());

    for i in 0..nr_entries {
        assert_eq!(true, t.contains(&i).unwrap());
    }
    assert_eq!(false, t.contains(&nr_entries).unwrap());
    assert_eq!(false, t.contains(&5000).unwrap());

    assert_eq!(0, t.first().unwrap());
    assert_eq!(1999, t.last().unwrap());
}

#[test]
fn ascending_fill_splits_root() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();

    for k in -2..=2 {
        t.insert(k).unwrap();
    }
    print_tree(&t).unwrap();

    assert_eq!(5, t.len());
    assert_eq!(vec![vec![-1], vec![-2], vec![0, 1, 2]], collect_nodes(&t));
    check_order(&t);
}

#[test]
fn descending_fill_splits_root() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();

    for k in (-2..=2).rev() {
        t.insert(k).unwrap();
    }
    print_tree(&t).unwrap();

    assert_eq!(5, t.len());
    assert_eq!(vec![vec![1], vec![-2, -1, 0], vec![2]], collect_nodes(&t));
    check_order(&t);
}

#[test]
fn remove_replaces_with_successor() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in -2..=2 {
        t.insert(k).unwrap();
    }

    // The root key -1 is replaced by its successor 0 from the right child
    assert_eq!(true, t.remove(&-1).unwrap());
    print_tree(&t).unwrap();

    assert_eq!(4, t.len());
    assert_eq!(false, t.contains(&-1).unwrap());
    assert_eq!(vec![vec![0], vec![-2], vec![1, 2]], collect_nodes(&t));

    // Removing a key that is not a member reports false
    assert_eq!(false, t.remove(&100).unwrap());
    assert_eq!(4, t.len());
}

#[test]
fn remove_replaces_with_predecessor() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in [-2, -1, 0, 1, -3] {
        t.insert(k).unwrap();
    }
    assert_eq!(vec![vec![-1], vec![-3, -2], vec![0, 1]], collect_nodes(&t));

    // The left child has a key to spare, so the root key is overwritten with
    // its predecessor
    assert_eq!(true, t.remove(&-1).unwrap());
    assert_eq!(vec![vec![-2], vec![-3], vec![0, 1]], collect_nodes(&t));
    check_order(&t);
}

#[test]
fn remove_merges_around_key() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in [-3, 0, 1, 2] {
        t.insert(k).unwrap();
    }
    assert_eq!(true, t.remove(&2).unwrap());
    assert_eq!(vec![vec![0], vec![-3], vec![1]], collect_nodes(&t));

    // Both children are at minimum occupancy: they are merged around the key
    // and the tree loses one level
    assert_eq!(true, t.remove(&0).unwrap());
    assert_eq!(vec![vec![-3, 1]], collect_nodes(&t));
    assert_eq!(2, t.len());
    check_order(&t);
}

#[test]
fn remove_borrows_from_right_sibling() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in [-2, -1, 0, 1] {
        t.insert(k).unwrap();
    }
    assert_eq!(vec![vec![-1], vec![-2], vec![0, 1]], collect_nodes(&t));

    // The left child would underflow: it takes the separator from the root
    // and the right sibling moves its smallest key up
    assert_eq!(true, t.remove(&-2).unwrap());
    assert_eq!(vec![vec![0], vec![-1], vec![1]], collect_nodes(&t));
    check_order(&t);
}

#[test]
fn remove_borrows_from_left_sibling() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in [1, 0, -1, -2] {
        t.insert(k).unwrap();
    }
    assert_eq!(vec![vec![0], vec![-2, -1], vec![1]], collect_nodes(&t));

    assert_eq!(true, t.remove(&1).unwrap());
    assert_eq!(vec![vec![-1], vec![-2], vec![0]], collect_nodes(&t));
    check_order(&t);
}

#[test]
fn remove_merges_siblings() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 16).unwrap();
    for k in [0, 10, 15, -5, 14, 13, 11] {
        t.insert(k).unwrap();
    }
    assert_eq!(
        vec![vec![10, 14], vec![-5, 0], vec![11, 13], vec![15]],
        collect_nodes(&t)
    );

    t.remove(&11).unwrap();
    t.remove(&0).unwrap();
    // The middle child underflows and no sibling has a key to spare, so it is
    // merged with its right sibling
    t.remove(&13).unwrap();
    print_tree(&t).unwrap();

    assert_eq!(vec![vec![10], vec![-5], vec![14, 15]], collect_nodes(&t));
    assert_eq!(4, t.len());
    check_order(&t);
}

#[test]
fn minimal_order() {
    let nr_entries = 2000u64;

    // Too small orders should create an error
    assert_eq!(
        true,
        BtreeSet::<u64>::with_capacity(BtreeConfig::default().order(0), nr_entries as usize)
            .is_err()
    );
    assert_eq!(
        true,
        BtreeSet::<u64>::with_capacity(BtreeConfig::default().order(1), nr_entries as usize)
            .is_err()
    );

    // Test with the minimal order 2
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<u64> = BtreeSet::with_capacity(config, nr_entries as usize).unwrap();

    for i in 0..nr_entries {
        t.insert(i).unwrap();
    }
    assert_eq!(2000, t.len());
    assert_eq!(0, t.first().unwrap());
    assert_eq!(1999, t.last().unwrap());
    check_order(&t);
    collect_nodes(&t);

    // Remove every second key
    for i in (0..nr_entries).step_by(2) {
        assert_eq!(true, t.remove(&i).unwrap());
    }
    assert_eq!(1000, t.len());
    for i in 0..nr_entries {
        assert_eq!(i % 2 == 1, t.contains(&i).unwrap());
    }
    check_order(&t);
    collect_nodes(&t);
}

#[test]
fn empty_set_operations() {
    let mut t: BtreeSet<i32> = BtreeSet::with_capacity(BtreeConfig::default(), 0).unwrap();

    assert_eq!(true, t.is_empty());
    assert_eq!(0, t.len());
    assert_eq!(false, t.contains(&42).unwrap());
    assert_eq!(false, t.remove(&42).unwrap());

    assert_eq!(true, matches!(t.first(), Err(Error::EmptySet)));
    assert_eq!(true, matches!(t.last(), Err(Error::EmptySet)));

    assert_eq!(0, t.iter().unwrap().count());
    assert_eq!(true, t.to_vec().unwrap().is_empty());
    assert_eq!(true, t.range(..).unwrap().is_empty());

    let mut c = t.cursor().unwrap();
    assert_eq!(false, c.has_next());
    assert_eq!(true, matches!(c.next(), Err(Error::ExhaustedCursor)));
    assert_eq!(false, c.remove_current().unwrap());

    assert_eq!(true, matches!(t.cursor_from(1), Err(Error::EmptySet)));
}

#[test]
fn insert_twice_at_split_point() {
    let input: Vec<u32> = vec![1, 2, 3, 5, 4, 4];

    let mut m = std::collections::BTreeSet::new();
    let mut t = BtreeSet::with_capacity(BtreeConfig::default().order(2), 1024).unwrap();

    for key in input {
        let newly_added = m.insert(key);
        assert_eq!(newly_added, t.insert(key).unwrap());

        print_tree(&t).unwrap();
        println!("-------------");
    }

    let m: Vec<_> = m.into_iter().collect();
    assert_eq!(m, t.to_vec().unwrap());
}

#[test]
fn sorted_iterator() {
    let mut t: BtreeSet<u32> = BtreeSet::with_capacity(BtreeConfig::default(), 128).unwrap();

    for a in 256..512 {
        t.insert(a).unwrap();
    }
    for a in 0..256 {
        t.insert(a).unwrap();
    }
    assert_eq!(512, t.len());
    print_tree(&t).unwrap();
    check_order(&t);

    assert_eq!((0..512).collect::<Vec<u32>>(), t.to_vec().unwrap());
}

#[test]
fn cursor_traversal() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<u32> = BtreeSet::with_capacity(config, 128).unwrap();
    for i in 0..100 {
        t.insert((i * 37) % 100).unwrap();
    }
    assert_eq!(100, t.len());

    let mut c = t.cursor().unwrap();
    let mut visited = Vec::new();
    while c.has_next() {
        visited.push(c.next().unwrap());
    }
    assert_eq!((0..100).collect::<Vec<u32>>(), visited);
    assert_eq!(true, matches!(c.next(), Err(Error::ExhaustedCursor)));

    // Seeking moves the cursor to the next key that is at least as large
    let mut c = t.cursor().unwrap();
    c.seek(50).unwrap();
    assert_eq!(50, c.next().unwrap());
    c.seek(1000).unwrap();
    assert_eq!(false, c.has_next());

    let mut c = t.cursor_from(73).unwrap();
    assert_eq!(73, c.next().unwrap());
    let mut c = t.cursor_from(1000).unwrap();
    assert_eq!(false, c.has_next());
}

#[test]
fn cursor_remove() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<u32> = BtreeSet::with_capacity(config, 32).unwrap();
    for i in 1..=20 {
        t.insert(i).unwrap();
    }

    // Remove a stretch of keys in the middle
    {
        let mut c = t.cursor_from(5).unwrap();
        for _ in 0..5 {
            assert_eq!(true, c.remove_current().unwrap());
        }
        assert_eq!(10, c.next().unwrap());
    }
    assert_eq!(15, t.len());
    assert_eq!(
        vec![1, 2, 3, 4, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20],
        t.to_vec().unwrap()
    );

    // Removing the largest key exhausts the cursor
    {
        let mut c = t.cursor_from(20).unwrap();
        assert_eq!(true, c.remove_current().unwrap());
        assert_eq!(false, c.has_next());
        assert_eq!(false, c.remove_current().unwrap());
    }
    assert_eq!(14, t.len());

    // Drain the whole set from the front
    let mut c = t.cursor().unwrap();
    while c.remove_current().unwrap() {}
    assert_eq!(true, t.is_empty());
    assert_eq!(0, t.iter().unwrap().count());
}

#[test]
fn range_query_dense() {
    let nr_entries = 2000u64;

    let mut t: BtreeSet<u64> = BtreeSet::with_capacity(BtreeConfig::default(), 2000).unwrap();
    for i in 0..nr_entries {
        t.insert(i).unwrap();
    }

    // Get sub-range
    let result = t.range(40..1024).unwrap();
    assert_eq!(984, result.len());
    assert_eq!(40, result.first().unwrap());
    assert_eq!(1023, result.last().unwrap());
    check_order(&result);

    // Get complete range
    assert_eq!(2000, t.range(..).unwrap().len());

    // Inclusive and open ended bounds
    assert_eq!(1161, t.range(40..=1200).unwrap().len());
    assert_eq!(1, t.range(1999..).unwrap().len());
    assert_eq!(0, t.range(2000..).unwrap().len());
    assert_eq!(1024, t.range(..=1023).unwrap().len());

    // Excluded start bound
    let result = t.range((Bound::Excluded(40u64), Bound::Unbounded)).unwrap();
    assert_eq!(41, result.first().unwrap());
    assert_eq!(1959, result.len());

    // The copy is detached from the source set
    let mut head = t.range(..10).unwrap();
    head.insert(5000).unwrap();
    head.remove(&0).unwrap();
    assert_eq!(true, t.contains(&0).unwrap());
    assert_eq!(false, t.contains(&5000).unwrap());
    assert_eq!(2000, t.len());
}

#[test]
fn range_query_sparse() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i64> = BtreeSet::with_capacity(config, 64).unwrap();
    for i in 0..64 {
        t.insert(i * 10).unwrap();
    }

    // Range bounds that fall between the stored keys
    let result = t.range(5..95).unwrap();
    assert_eq!(
        vec![10, 20, 30, 40, 50, 60, 70, 80, 90],
        result.to_vec().unwrap()
    );

    let result = t.range(-100..5).unwrap();
    assert_eq!(vec![0], result.to_vec().unwrap());

    assert_eq!(0, t.range(631..).unwrap().len());
    assert_eq!(64, t.range(-1000..1000).unwrap().len());
}

#[test]
fn bulk_operations() {
    let mut t: BtreeSet<i32> = BtreeSet::with_capacity(BtreeConfig::default(), 16).unwrap();

    assert_eq!(true, t.insert_all(vec![5, 1, 3]).unwrap());
    assert_eq!(3, t.len());
    // Inserting only known keys does not change the set
    assert_eq!(false, t.insert_all(vec![3, 5]).unwrap());
    assert_eq!(3, t.len());
    // A single unknown key is enough to count as a change
    assert_eq!(true, t.insert_all(vec![5, 2]).unwrap());
    assert_eq!(vec![1, 2, 3, 5], t.to_vec().unwrap());

    assert_eq!(true, t.contains_all(vec![1, 3]).unwrap());
    assert_eq!(false, t.contains_all(vec![1, 4]).unwrap());
    assert_eq!(true, t.contains_all(Vec::new()).unwrap());

    // Only the keys that are actually members are removed
    assert_eq!(true, t.remove_all(vec![3, 4, 5]).unwrap());
    assert_eq!(vec![1, 2], t.to_vec().unwrap());
    assert_eq!(false, t.remove_all(vec![100, 200]).unwrap());

    t.insert_all(0..10).unwrap();
    t.retain(|k| k % 2 == 0).unwrap();
    assert_eq!(vec![0, 2, 4, 6, 8], t.to_vec().unwrap());
    t.retain(|_| false).unwrap();
    assert_eq!(true, t.is_empty());
}

#[test]
fn clear_and_reuse() {
    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<u64> = BtreeSet::with_capacity(config, 128).unwrap();
    for i in 0..100 {
        t.insert(i).unwrap();
    }

    t.clear().unwrap();
    assert_eq!(0, t.len());
    assert_eq!(true, t.is_empty());
    assert_eq!(true, matches!(t.first(), Err(Error::EmptySet)));
    assert_eq!(0, t.iter().unwrap().count());
    assert_eq!(vec![Vec::<u64>::new()], collect_nodes(&t));

    // The set stays usable and reuses the freed node storage
    for i in 0..50 {
        t.insert(i * 2).unwrap();
    }
    assert_eq!(50, t.len());
    assert_eq!(0, t.first().unwrap());
    assert_eq!(98, t.last().unwrap());
    check_order(&t);
}

#[test]
fn random_insert_remove() {
    let seed = 1263814603156052;

    let mut rng = SmallRng::seed_from_u64(seed);

    let config = BtreeConfig::default().order(2);
    let mut t: BtreeSet<i32> = BtreeSet::with_capacity(config, 1024).unwrap();
    let mut reference = std::collections::BTreeSet::new();

    for _ in 0..2000 {
        let key = rng.gen_range(-500..500);
        assert_eq!(reference.insert(key), t.insert(key).unwrap());
    }
    assert_eq!(reference.len(), t.len());
    collect_nodes(&t);

    for _ in 0..2000 {
        let key = rng.gen_range(-500..500);
        assert_eq!(reference.remove(&key), t.remove(&key).unwrap());
    }
    assert_eq!(reference.len(), t.len());

    let expected: Vec<i32> = reference.into_iter().collect();
    assert_eq!(expected, t.to_vec().unwrap());
    collect_nodes(&t);
    check_order(&t);
}
