use std::fmt;

use crate::error::Result;
use crate::file::TemporaryBlockFile;
use crate::BtreeConfig;
use crate::Error;
use serde_derive::{Deserialize, Serialize};

/// Marker trait for all types that can be used as keys of the set.
///
/// Keys are serialized with bincode into the node records, so the trait also
/// states how many bytes a single encoded key occupies. It is implemented for
/// the integer primitive types.
pub trait KeyType: serde::Serialize + serde::de::DeserializeOwned + Ord + Copy + 'static {
    /// Number of bytes the bincode encoding of a key of this type occupies.
    const SERIALIZED_SIZE: usize;
}

macro_rules! impl_key_type {
    ( $type:ident ) => {
        impl KeyType for $type {
            const SERIALIZED_SIZE: usize = std::mem::size_of::<$type>();
        }
    };
}

impl_key_type!(u8);
impl_key_type!(u16);
impl_key_type!(u32);
impl_key_type!(u64);
impl_key_type!(i8);
impl_key_type!(i16);
impl_key_type!(i32);
impl_key_type!(i64);

/// Identifier of a single node.
///
/// Ids are stable for the lifetime of the node and can be reused after the
/// node has been deleted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single B-tree node as it is persisted in the node file.
///
/// Keys are kept sorted in strictly ascending order. An inner node with `n`
/// keys has `n + 1` children, a leaf node has no child entries at all. The
/// parent field links back to the node that currently holds a child pointer to
/// this node, the root has no parent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Node<K> {
    pub id: NodeId,
    pub order: u64,
    pub is_leaf: bool,
    pub keys: Vec<K>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl<K> Node<K>
where
    K: KeyType,
{
    /// Position of the given node in the child list.
    ///
    /// Used to locate a node inside its parent when walking upward. A missing
    /// entry means the parent back-reference and the child list disagree.
    pub fn child_index_of(&self, child: NodeId) -> Result<usize> {
        self.children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| Error::CorruptedNode {
                node: self.id.0,
                reason: format!("missing child pointer to node {}", child),
            })
    }
}

/// Maximum number of bytes the bincode encoding of a node with the given order
/// can occupy. Vectors are encoded with an 8 byte length prefix.
fn max_serialized_node_size(order: usize, key_size: usize) -> usize {
    let max_keys = 2 * order - 1;
    let max_children = 2 * order;
    // id + order + is_leaf + keys + children + optional parent
    8 + 8 + 1 + (8 + max_keys * key_size) + (8 + max_children * 8) + (1 + 8)
}

/// Storage for all nodes of a single tree.
///
/// Wraps the block file with the node record contract: records are validated
/// when they are read and a structurally invalid record is reported as
/// corruption instead of being handed to the tree logic.
pub struct NodeFile<K> {
    blocks: TemporaryBlockFile<Node<K>>,
    order: usize,
}

impl<K> NodeFile<K>
where
    K: KeyType,
{
    /// Create a new node file with enough capacity for the given number of nodes.
    pub fn with_capacity(capacity: usize, config: &BtreeConfig) -> Result<NodeFile<K>> {
        let blocks = TemporaryBlockFile::with_capacity(
            capacity,
            max_serialized_node_size(config.order, K::SERIALIZED_SIZE),
            config.block_cache_size,
        )?;
        Ok(NodeFile {
            blocks,
            order: config.order,
        })
    }

    /// Allocate a new empty leaf node with the given parent reference.
    ///
    /// The node is not linked into the tree yet and must be written with
    /// [`put`](Self::put) before it can be read back.
    pub fn allocate(&mut self, parent: Option<NodeId>) -> Result<Node<K>> {
        let block = self.blocks.allocate_block()?;
        Ok(Node {
            id: NodeId(block),
            order: self.order.try_into()?,
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            parent,
        })
    }

    pub fn get(&self, id: NodeId) -> Result<Node<K>> {
        let node: Node<K> = match self.blocks.get(id.0) {
            Ok(node) => node,
            Err(Error::Serialization(e)) => {
                return Err(Error::CorruptedNode {
                    node: id.0,
                    reason: format!("unreadable record: {}", e),
                })
            }
            Err(e) => return Err(e),
        };
        self.validate(&node, id)?;
        Ok(node)
    }

    pub fn put(&mut self, node: &Node<K>) -> Result<()> {
        self.blocks.put(node.id.0, node)
    }

    /// Reclaim the storage of a node. Deleting an unknown node has no effect.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        self.blocks.delete(id.0)
    }

    fn validate(&self, node: &Node<K>, id: NodeId) -> Result<()> {
        if node.id != id {
            return Err(Error::CorruptedNode {
                node: id.0,
                reason: format!("stored id {} does not match the block", node.id),
            });
        }
        if node.order != u64::try_from(self.order)? {
            return Err(Error::CorruptedNode {
                node: id.0,
                reason: format!("stored order {} does not match the tree", node.order),
            });
        }
        if !node.is_leaf && node.children.len() != node.keys.len() + 1 {
            return Err(Error::CorruptedNode {
                node: id.0,
                reason: format!(
                    "inner node with {} keys must have {} children, found {}",
                    node.keys.len(),
                    node.keys.len() + 1,
                    node.children.len()
                ),
            });
        }
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::CorruptedNode {
                node: id.0,
                reason: "keys are not sorted in strictly ascending order".to_string(),
            });
        }
        Ok(())
    }
}
