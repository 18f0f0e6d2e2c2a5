use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

use crate::btree::cursor::{Cursor, Iter};
use crate::btree::node::{KeyType, Node, NodeFile, NodeId};
use crate::error::Result;
use crate::BtreeConfig;
use crate::Error;

pub(crate) mod cursor;
pub(crate) mod node;

#[cfg(test)]
mod tests;

/// An ordered set of integer keys, backed by a B-tree stored in a temporary
/// file.
///
/// The set is transient: its backing file is deleted when the set is dropped
/// and can not be re-opened later. All operations read and write node records
/// through the backing file, so they can fail and return a `Result`.
pub struct BtreeSet<K>
where
    K: KeyType,
{
    nodes: NodeFile<K>,
    root_id: NodeId,
    config: BtreeConfig,
    nr_elements: usize,
}

impl<K> BtreeSet<K>
where
    K: KeyType,
{
    /// Create a new empty set with the given configuration and an estimated
    /// capacity in number of keys.
    ///
    /// The capacity is only used to pre-size the backing file, the set can
    /// grow beyond it on demand.
    pub fn with_capacity(config: BtreeConfig, capacity: usize) -> Result<BtreeSet<K>> {
        if config.order < 2 {
            return Err(Error::OrderTooSmall(config.order));
        }

        // Except for the root, each node holds at least order - 1 keys
        let capacity_in_nodes = capacity / (config.order - 1) + 1;
        let mut nodes = NodeFile::with_capacity(capacity_in_nodes, &config)?;

        let root = nodes.allocate(None)?;
        nodes.put(&root)?;

        Ok(BtreeSet {
            nodes,
            root_id: root.id,
            config,
            nr_elements: 0,
        })
    }

    /// Returns whether the set contains the given key.
    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.search(self.root_id, key)?.is_some())
    }

    /// Insert a key into the set.
    ///
    /// Returns `true` if the key was not present before. If the operation
    /// fails, you should assume that the whole set is corrupted.
    pub fn insert(&mut self, key: K) -> Result<bool> {
        if self.contains(&key)? {
            return Ok(false);
        }

        let root = self.nodes.get(self.root_id)?;
        if root.keys.len() == 2 * self.config.order - 1 {
            // Split the root right away so the descent only ever meets nodes
            // with room for one more key
            self.split_root()?;
        }
        self.insert_nonfull(self.root_id, key)?;
        Ok(true)
    }

    /// Remove a key from the set.
    ///
    /// Returns `true` if the key was present. If the operation fails, you
    /// should assume that the whole set is corrupted.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        self.delete_from(self.root_id, *key)
    }

    /// Returns true if the set does not contain any elements.
    pub fn is_empty(&self) -> bool {
        self.nr_elements == 0
    }

    /// Returns the number of keys in the set.
    pub fn len(&self) -> usize {
        self.nr_elements
    }

    /// Returns the smallest key of the set.
    pub fn first(&self) -> Result<K> {
        let pos = cursor::descend_min(&self.nodes, self.root_id)?.ok_or(Error::EmptySet)?;
        cursor::key_at(&self.nodes, pos)
    }

    /// Returns the largest key of the set.
    pub fn last(&self) -> Result<K> {
        let pos = cursor::descend_max(&self.nodes, self.root_id)?.ok_or(Error::EmptySet)?;
        cursor::key_at(&self.nodes, pos)
    }

    /// Remove all keys from the set.
    ///
    /// The storage of all nodes is reclaimed and the set starts over with a
    /// fresh empty root.
    pub fn clear(&mut self) -> Result<()> {
        self.delete_subtree(self.root_id)?;

        let root = self.nodes.allocate(None)?;
        self.nodes.put(&root)?;
        self.root_id = root.id;
        self.nr_elements = 0;
        Ok(())
    }

    /// Return an iterator over all keys of the set in ascending order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use transient_btree_set::{BtreeConfig, BtreeSet, Error};
    ///
    /// fn main() -> std::result::Result<(), Error> {
    ///     let mut b = BtreeSet::<u16>::with_capacity(BtreeConfig::default(), 10)?;
    ///     b.insert(1)?;
    ///     b.insert(200)?;
    ///     b.insert(20)?;
    ///
    ///     for k in b.iter()? {
    ///         dbg!(k?);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn iter(&self) -> Result<Iter<K>> {
        let position = cursor::descend_min(&self.nodes, self.root_id)?;
        Ok(Iter::new(&self.nodes, position))
    }

    /// Create a cursor that starts at the smallest key of the set.
    ///
    /// An empty set yields an already exhausted cursor.
    pub fn cursor(&mut self) -> Result<Cursor<K>> {
        let position = cursor::descend_min(&self.nodes, self.root_id)?;
        Ok(Cursor::new(self, position))
    }

    /// Create a cursor that starts at the smallest key that is greater than
    /// or equal to the given key.
    ///
    /// Unlike [`cursor`](BtreeSet::cursor) this can not be called on an empty
    /// set.
    pub fn cursor_from(&mut self, key: K) -> Result<Cursor<K>> {
        if self.is_empty() {
            return Err(Error::EmptySet);
        }
        let position = cursor::seek(&self.nodes, self.root_id, &key)?;
        Ok(Cursor::new(self, position))
    }

    /// Create a new set that contains all keys of this set in the given range.
    ///
    /// The new set uses the same configuration but has its own backing file,
    /// so it is completely detached from this one.
    ///
    /// # Example
    ///
    /// ```rust
    /// use transient_btree_set::{BtreeConfig, BtreeSet, Error};
    ///
    /// fn main() -> std::result::Result<(), Error> {
    ///     let mut b = BtreeSet::<u16>::with_capacity(BtreeConfig::default(), 10)?;
    ///     b.insert(1)?;
    ///     b.insert(200)?;
    ///     b.insert(20)?;
    ///
    ///     let head = b.range(..200)?;
    ///     assert_eq!(2, head.len());
    ///     Ok(())
    /// }
    /// ```
    pub fn range<R>(&self, range: R) -> Result<BtreeSet<K>>
    where
        R: RangeBounds<K>,
    {
        let mut result = BtreeSet::with_capacity(self.config.clone(), self.len())?;

        let mut position = match range.start_bound() {
            Bound::Unbounded => cursor::descend_min(&self.nodes, self.root_id)?,
            Bound::Included(start) => cursor::seek(&self.nodes, self.root_id, start)?,
            Bound::Excluded(start) => {
                let mut position = cursor::seek(&self.nodes, self.root_id, start)?;
                if let Some(pos) = position {
                    if cursor::key_at(&self.nodes, pos)? == *start {
                        position = cursor::advance(&self.nodes, pos)?;
                    }
                }
                position
            }
        };

        while let Some(pos) = position {
            let key = cursor::key_at(&self.nodes, pos)?;
            let in_range = match range.end_bound() {
                Bound::Unbounded => true,
                Bound::Included(end) => key <= *end,
                Bound::Excluded(end) => key < *end,
            };
            if !in_range {
                break;
            }
            result.insert(key)?;
            position = cursor::advance(&self.nodes, pos)?;
        }

        Ok(result)
    }

    /// Insert all keys of the given collection into the set.
    ///
    /// Returns `true` if at least one of the keys was not present before.
    pub fn insert_all<I>(&mut self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
    {
        let mut changed = false;
        for key in keys {
            if self.insert(key)? {
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Remove all keys of the given collection from the set.
    ///
    /// Returns `true` if at least one of the keys was present.
    pub fn remove_all<I>(&mut self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
    {
        let mut changed = false;
        for key in keys {
            if self.remove(&key)? {
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Returns whether the set contains every key of the given collection.
    pub fn contains_all<I>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
    {
        for key in keys {
            if !self.contains(&key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove all keys for which the predicate returns `false`.
    pub fn retain<F>(&mut self, mut predicate: F) -> Result<()>
    where
        F: FnMut(&K) -> bool,
    {
        let mut doomed = Vec::new();
        for key in self.iter()? {
            let key = key?;
            if !predicate(&key) {
                doomed.push(key);
            }
        }
        for key in doomed {
            self.remove(&key)?;
        }
        Ok(())
    }

    /// Collect all keys of the set into a vector, in ascending order.
    pub fn to_vec(&self) -> Result<Vec<K>> {
        self.iter()?.collect()
    }

    fn search(&self, node_id: NodeId, key: &K) -> Result<Option<(NodeId, usize)>> {
        let node = self.nodes.get(node_id)?;
        match node.keys.binary_search(key) {
            Ok(i) => Ok(Some((node_id, i))),
            Err(i) => {
                if node.is_leaf {
                    Ok(None)
                } else {
                    self.search(node.children[i], key)
                }
            }
        }
    }

    /// Put a new root above the current one and split the old root into two
    /// children of it.
    fn split_root(&mut self) -> Result<()> {
        let mut new_root = self.nodes.allocate(None)?;
        new_root.is_leaf = false;
        new_root.children.push(self.root_id);
        self.nodes.put(&new_root)?;

        let mut old_root = self.nodes.get(self.root_id)?;
        old_root.parent = Some(new_root.id);
        self.nodes.put(&old_root)?;

        self.root_id = new_root.id;
        self.split_child(new_root.id, 0)
    }

    /// Split the full child at the given index of the parent node and move
    /// its median key up into the parent.
    fn split_child(&mut self, parent_id: NodeId, index: usize) -> Result<()> {
        let mut parent = self.nodes.get(parent_id)?;
        let mut child = self.nodes.get(parent.children[index])?;

        let mut sibling = self.nodes.allocate(Some(parent_id))?;
        sibling.is_leaf = child.is_leaf;
        sibling.keys = child.keys.split_off(self.config.order);
        let median = child.keys.pop().ok_or_else(|| Error::CorruptedNode {
            node: child.id.0,
            reason: "node to split has no median key".to_string(),
        })?;

        if !child.is_leaf {
            sibling.children = child.children.split_off(self.config.order);
            for moved in &sibling.children {
                let mut moved_child = self.nodes.get(*moved)?;
                moved_child.parent = Some(sibling.id);
                self.nodes.put(&moved_child)?;
            }
        }

        parent.keys.insert(index, median);
        parent.children.insert(index + 1, sibling.id);

        self.nodes.put(&sibling)?;
        self.nodes.put(&child)?;
        self.nodes.put(&parent)?;
        Ok(())
    }

    /// Insert the key into the subtree rooted at the given node, which is
    /// guaranteed by the caller to have room for one more key.
    fn insert_nonfull(&mut self, node_id: NodeId, key: K) -> Result<()> {
        let mut node = self.nodes.get(node_id)?;
        match node.keys.binary_search(&key) {
            Ok(_) => Ok(()),
            Err(i) => {
                if node.is_leaf {
                    node.keys.insert(i, key);
                    self.nodes.put(&node)?;
                    self.nr_elements += 1;
                    Ok(())
                } else {
                    let child_id = node.children[i];
                    let child = self.nodes.get(child_id)?;
                    if child.keys.len() == 2 * self.config.order - 1 {
                        self.split_child(node_id, i)?;
                        // The median of the child moved up into this node,
                        // compare against it to decide which half gets the key
                        node = self.nodes.get(node_id)?;
                        match key.cmp(&node.keys[i]) {
                            Ordering::Equal => Ok(()),
                            Ordering::Greater => self.insert_nonfull(node.children[i + 1], key),
                            Ordering::Less => self.insert_nonfull(node.children[i], key),
                        }
                    } else {
                        self.insert_nonfull(child_id, key)
                    }
                }
            }
        }
    }

    /// Delete a key from the subtree rooted at the given node.
    ///
    /// Except for the root, every node this descends into holds at least
    /// `order` keys, so removing one key can not underfill it.
    fn delete_from(&mut self, node_id: NodeId, key: K) -> Result<bool> {
        let mut node = self.nodes.get(node_id)?;
        match node.keys.binary_search(&key) {
            Ok(i) => {
                if node.is_leaf {
                    node.keys.remove(i);
                    self.nodes.put(&node)?;
                    self.nr_elements -= 1;
                    Ok(true)
                } else {
                    self.delete_inner_key(node, i, key)
                }
            }
            Err(i) => {
                if node.is_leaf {
                    return Ok(false);
                }
                let child_id = node.children[i];
                let child = self.nodes.get(child_id)?;
                let target = if child.keys.len() == self.config.order - 1 {
                    self.rebalance_child(node_id, i)?
                } else {
                    child_id
                };
                self.delete_from(target, key)
            }
        }
    }

    /// Delete the key at the given index of an inner node.
    fn delete_inner_key(&mut self, mut node: Node<K>, index: usize, key: K) -> Result<bool> {
        let left_id = node.children[index];
        let right_id = node.children[index + 1];

        let left = self.nodes.get(left_id)?;
        if left.keys.len() >= self.config.order {
            // Overwrite the key with its predecessor and remove that one from
            // the left subtree instead
            let predecessor = self.subtree_max(left_id)?;
            node.keys[index] = predecessor;
            self.nodes.put(&node)?;
            return self.delete_from(left_id, predecessor);
        }

        let right = self.nodes.get(right_id)?;
        if right.keys.len() >= self.config.order {
            let successor = self.subtree_min(right_id)?;
            node.keys[index] = successor;
            self.nodes.put(&node)?;
            return self.delete_from(right_id, successor);
        }

        // Neither neighbor can spare a key: merge both around the key and
        // delete it inside the merged node
        node.keys.remove(index);
        node.children.remove(index + 1);
        self.nodes.put(&node)?;
        let merged = self.merge_children(left_id, key, right_id, node.id)?;
        self.delete_from(merged, key)
    }

    /// Make sure the child at the given index of the parent can lose a key
    /// without underflowing, either by borrowing a key from a sibling or by
    /// merging it with one.
    ///
    /// Returns the id of the node that covers the key range of the child
    /// afterwards.
    fn rebalance_child(&mut self, parent_id: NodeId, index: usize) -> Result<NodeId> {
        let mut parent = self.nodes.get(parent_id)?;
        let child_id = parent.children[index];

        let left_id = if index > 0 {
            Some(parent.children[index - 1])
        } else {
            None
        };
        let right_id = if index < parent.keys.len() {
            Some(parent.children[index + 1])
        } else {
            None
        };

        // Borrow from a sibling with keys to spare, preferring the left one
        if let Some(left_id) = left_id {
            let left = self.nodes.get(left_id)?;
            if left.keys.len() >= self.config.order {
                self.borrow_from_left(child_id, parent, index)?;
                return Ok(child_id);
            }
        }
        if let Some(right_id) = right_id {
            let right = self.nodes.get(right_id)?;
            if right.keys.len() >= self.config.order {
                self.borrow_from_right(child_id, parent, index)?;
                return Ok(child_id);
            }
        }

        // No sibling has spare keys, merge with one, preferring the right one
        if let Some(right_id) = right_id {
            let separator = parent.keys.remove(index);
            parent.children.remove(index + 1);
            self.nodes.put(&parent)?;
            self.merge_children(child_id, separator, right_id, parent_id)
        } else if let Some(left_id) = left_id {
            let separator = parent.keys.remove(index - 1);
            parent.children.remove(index);
            self.nodes.put(&parent)?;
            self.merge_children(left_id, separator, child_id, parent_id)
        } else {
            Err(Error::CorruptedNode {
                node: parent_id.0,
                reason: "inner node has no siblings to rebalance with".to_string(),
            })
        }
    }

    /// Move the largest key of the left sibling up into the parent and the
    /// old separator down into the node.
    fn borrow_from_left(
        &mut self,
        node_id: NodeId,
        mut parent: Node<K>,
        index: usize,
    ) -> Result<()> {
        let mut node = self.nodes.get(node_id)?;
        let mut left = self.nodes.get(parent.children[index - 1])?;

        node.keys.insert(0, parent.keys[index - 1]);
        let moved_up = left.keys.pop().ok_or_else(|| Error::CorruptedNode {
            node: left.id.0,
            reason: "sibling to borrow from has no keys".to_string(),
        })?;
        parent.keys[index - 1] = moved_up;

        if !node.is_leaf {
            let moved_child_id = left.children.pop().ok_or_else(|| Error::CorruptedNode {
                node: left.id.0,
                reason: "sibling to borrow from has no children".to_string(),
            })?;
            node.children.insert(0, moved_child_id);
            let mut moved_child = self.nodes.get(moved_child_id)?;
            moved_child.parent = Some(node.id);
            self.nodes.put(&moved_child)?;
        }

        self.nodes.put(&left)?;
        self.nodes.put(&node)?;
        self.nodes.put(&parent)?;
        Ok(())
    }

    /// Move the smallest key of the right sibling up into the parent and the
    /// old separator down into the node.
    fn borrow_from_right(
        &mut self,
        node_id: NodeId,
        mut parent: Node<K>,
        index: usize,
    ) -> Result<()> {
        let mut node = self.nodes.get(node_id)?;
        let mut right = self.nodes.get(parent.children[index + 1])?;

        node.keys.push(parent.keys[index]);
        parent.keys[index] = right.keys.remove(0);

        if !node.is_leaf {
            let moved_child_id = right.children.remove(0);
            node.children.push(moved_child_id);
            let mut moved_child = self.nodes.get(moved_child_id)?;
            moved_child.parent = Some(node.id);
            self.nodes.put(&moved_child)?;
        }

        self.nodes.put(&right)?;
        self.nodes.put(&node)?;
        self.nodes.put(&parent)?;
        Ok(())
    }

    /// Merge the right node into the left one around the given separator key.
    ///
    /// The caller has already removed the separator and the child pointer to
    /// the right node from the parent and written the parent back. When this
    /// leaves the parent without keys the parent itself is removed from the
    /// tree, which shrinks the tree by one level once the root runs dry.
    fn merge_children(
        &mut self,
        lasting_id: NodeId,
        separator: K,
        merging_id: NodeId,
        parent_id: NodeId,
    ) -> Result<NodeId> {
        let mut lasting = self.nodes.get(lasting_id)?;
        let merging = self.nodes.get(merging_id)?;
        let parent = self.nodes.get(parent_id)?;

        lasting.keys.push(separator);
        lasting.keys.extend(merging.keys);
        lasting.children.extend(merging.children.iter().copied());
        if !lasting.is_leaf {
            for moved in &merging.children {
                let mut moved_child = self.nodes.get(*moved)?;
                moved_child.parent = Some(lasting_id);
                self.nodes.put(&moved_child)?;
            }
        }

        if parent.keys.is_empty() {
            // The parent has run dry, the merged node takes its place
            lasting.parent = parent.parent;
            self.nodes.put(&lasting)?;
            match parent.parent {
                Some(grandparent_id) => {
                    let mut grandparent = self.nodes.get(grandparent_id)?;
                    let parent_index = grandparent.child_index_of(parent_id)?;
                    grandparent.children[parent_index] = lasting_id;
                    self.nodes.put(&grandparent)?;
                }
                None => {
                    self.root_id = lasting_id;
                }
            }
            self.nodes.delete(parent_id)?;
        } else {
            self.nodes.put(&lasting)?;
        }

        self.nodes.delete(merging_id)?;
        Ok(lasting_id)
    }

    fn subtree_min(&self, root: NodeId) -> Result<K> {
        match cursor::descend_min(&self.nodes, root)? {
            Some(pos) => cursor::key_at(&self.nodes, pos),
            None => Err(Error::CorruptedNode {
                node: root.0,
                reason: "subtree does not contain any keys".to_string(),
            }),
        }
    }

    fn subtree_max(&self, root: NodeId) -> Result<K> {
        match cursor::descend_max(&self.nodes, root)? {
            Some(pos) => cursor::key_at(&self.nodes, pos),
            None => Err(Error::CorruptedNode {
                node: root.0,
                reason: "subtree does not contain any keys".to_string(),
            }),
        }
    }

    fn delete_subtree(&mut self, node_id: NodeId) -> Result<()> {
        let node = self.nodes.get(node_id)?;
        if !node.is_leaf {
            for child in &node.children {
                self.delete_subtree(*child)?;
            }
        }
        self.nodes.delete(node_id)
    }
}
