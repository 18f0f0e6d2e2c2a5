use crate::btree::node::{KeyType, NodeFile, NodeId};
use crate::btree::BtreeSet;
use crate::error::Result;
use crate::Error;

/// Position of a traversal inside the tree.
///
/// A position always names the next key that has not been visited yet, which
/// is the key at `index` in the node with the given id. Traversals that have
/// run past the largest key have no position at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Position {
    pub node: NodeId,
    pub index: usize,
}

/// Position of the smallest key in the subtree rooted at the given node, or
/// `None` if the subtree holds no keys.
pub(crate) fn descend_min<K>(nodes: &NodeFile<K>, root: NodeId) -> Result<Option<Position>>
where
    K: KeyType,
{
    let mut current = nodes.get(root)?;
    while !current.is_leaf {
        current = nodes.get(current.children[0])?;
    }
    if current.keys.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Position {
            node: current.id,
            index: 0,
        }))
    }
}

/// Position of the largest key in the subtree rooted at the given node, or
/// `None` if the subtree holds no keys.
pub(crate) fn descend_max<K>(nodes: &NodeFile<K>, root: NodeId) -> Result<Option<Position>>
where
    K: KeyType,
{
    let mut current = nodes.get(root)?;
    while !current.is_leaf {
        current = nodes.get(current.children[current.keys.len()])?;
    }
    match current.keys.len().checked_sub(1) {
        Some(index) => Ok(Some(Position {
            node: current.id,
            index,
        })),
        None => Ok(None),
    }
}

/// Position of the key that follows the given position in ascending order.
pub(crate) fn advance<K>(nodes: &NodeFile<K>, pos: Position) -> Result<Option<Position>>
where
    K: KeyType,
{
    let node = nodes.get(pos.node)?;
    if node.is_leaf {
        if pos.index + 1 < node.keys.len() {
            return Ok(Some(Position {
                node: pos.node,
                index: pos.index + 1,
            }));
        }
        // Climb up until an ancestor still has an unvisited separator key. The
        // child index in the parent is also the index of that separator.
        let mut current = node;
        while let Some(parent_id) = current.parent {
            let parent = nodes.get(parent_id)?;
            let child_index = parent.child_index_of(current.id)?;
            if child_index < parent.keys.len() {
                return Ok(Some(Position {
                    node: parent_id,
                    index: child_index,
                }));
            }
            current = parent;
        }
        Ok(None)
    } else {
        // The key after a separator is the smallest one of its right subtree
        descend_min(nodes, node.children[pos.index + 1])
    }
}

/// Position of the smallest key that is greater than or equal to the given
/// key, or `None` if all keys of the subtree are smaller.
pub(crate) fn seek<K>(nodes: &NodeFile<K>, root: NodeId, key: &K) -> Result<Option<Position>>
where
    K: KeyType,
{
    // Remember the closest separator that was larger than the key, it becomes
    // the position when the descent ends in a leaf without a larger key.
    let mut candidate = None;
    let mut current = nodes.get(root)?;
    loop {
        match current.keys.binary_search(key) {
            Ok(index) => {
                return Ok(Some(Position {
                    node: current.id,
                    index,
                }));
            }
            Err(index) => {
                if current.is_leaf {
                    if index < current.keys.len() {
                        return Ok(Some(Position {
                            node: current.id,
                            index,
                        }));
                    }
                    return Ok(candidate);
                }
                if index < current.keys.len() {
                    candidate = Some(Position {
                        node: current.id,
                        index,
                    });
                }
                current = nodes.get(current.children[index])?;
            }
        }
    }
}

/// Read the key a position refers to.
pub(crate) fn key_at<K>(nodes: &NodeFile<K>, pos: Position) -> Result<K>
where
    K: KeyType,
{
    let node = nodes.get(pos.node)?;
    node.keys
        .get(pos.index)
        .copied()
        .ok_or_else(|| Error::CorruptedNode {
            node: pos.node.0,
            reason: "position points beyond the keys of the node".to_string(),
        })
}

/// Stateful traversal over the keys of a set in ascending order.
///
/// A cursor borrows the set mutably so the key it currently points at can be
/// removed while traversing. Use [`BtreeSet::iter`] when the set is only read.
pub struct Cursor<'a, K>
where
    K: KeyType,
{
    set: &'a mut BtreeSet<K>,
    position: Option<Position>,
}

impl<'a, K> Cursor<'a, K>
where
    K: KeyType,
{
    pub(crate) fn new(set: &'a mut BtreeSet<K>, position: Option<Position>) -> Cursor<'a, K> {
        Cursor { set, position }
    }

    /// `true` if another call to [`next`](Cursor::next) will yield a key.
    pub fn has_next(&self) -> bool {
        self.position.is_some()
    }

    /// Return the key at the current position and advance the cursor.
    pub fn next(&mut self) -> Result<K> {
        let pos = self.position.ok_or(Error::ExhaustedCursor)?;
        let key = key_at(&self.set.nodes, pos)?;
        self.position = advance(&self.set.nodes, pos)?;
        Ok(key)
    }

    /// Move the cursor to the smallest key that is greater than or equal to
    /// the given key. The cursor becomes exhausted if there is no such key.
    pub fn seek(&mut self, key: K) -> Result<()> {
        self.position = seek(&self.set.nodes, self.set.root_id, &key)?;
        Ok(())
    }

    /// Remove the key at the current position from the set and reposition the
    /// cursor on the key that follows it.
    ///
    /// Returns `false` if the cursor was already exhausted. Removing a key
    /// restructures the tree, so the following key is looked up again by value
    /// instead of reusing the old position.
    pub fn remove_current(&mut self) -> Result<bool> {
        let pos = match self.position {
            Some(pos) => pos,
            None => return Ok(false),
        };
        let key = key_at(&self.set.nodes, pos)?;
        let next_key = match advance(&self.set.nodes, pos)? {
            Some(next) => Some(key_at(&self.set.nodes, next)?),
            None => None,
        };

        self.set.remove(&key)?;

        self.position = match next_key {
            Some(next_key) => seek(&self.set.nodes, self.set.root_id, &next_key)?,
            None => None,
        };
        Ok(true)
    }
}

/// Iterator over all keys of a set in ascending order.
pub struct Iter<'a, K>
where
    K: KeyType,
{
    nodes: &'a NodeFile<K>,
    position: Option<Position>,
}

impl<'a, K> Iter<'a, K>
where
    K: KeyType,
{
    pub(crate) fn new(nodes: &'a NodeFile<K>, position: Option<Position>) -> Iter<'a, K> {
        Iter { nodes, position }
    }
}

impl<'a, K> Iterator for Iter<'a, K>
where
    K: KeyType,
{
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.position?;
        let key = match key_at(self.nodes, pos) {
            Ok(key) => key,
            Err(e) => {
                self.position = None;
                return Some(Err(e));
            }
        };
        match advance(self.nodes, pos) {
            Ok(next) => {
                self.position = next;
                Some(Ok(key))
            }
            Err(e) => {
                self.position = None;
                Some(Err(e))
            }
        }
    }
}
