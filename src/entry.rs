//! Node entries: the tagged records stored on pages.

use crate::distance::{Distance, ObjectId};
use crate::page::PageId;

/// An entry of a tree node.
///
/// A leaf entry records one stored object. A directory entry routes into a
/// subtree: every object transitively reachable through `child_node_id` lies
/// within `covering_radius` of `routing_object_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry<D: Distance> {
    Leaf {
        object_id: ObjectId,
        /// Distance to the routing object of the parent entry; `None` for
        /// entries of the root.
        parent_distance: Option<D>,
    },
    Directory {
        routing_object_id: ObjectId,
        parent_distance: Option<D>,
        child_node_id: PageId,
        covering_radius: D,
    },
}

impl<D: Distance> Entry<D> {
    /// The object this entry stands for: the stored object of a leaf entry,
    /// the routing object of a directory entry.
    pub fn object_id(&self) -> ObjectId {
        match *self {
            Entry::Leaf { object_id, .. } => object_id,
            Entry::Directory {
                routing_object_id, ..
            } => routing_object_id,
        }
    }

    pub fn parent_distance(&self) -> Option<D> {
        match *self {
            Entry::Leaf {
                parent_distance, ..
            }
            | Entry::Directory {
                parent_distance, ..
            } => parent_distance,
        }
    }

    pub fn set_parent_distance(&mut self, distance: Option<D>) {
        match self {
            Entry::Leaf {
                parent_distance, ..
            }
            | Entry::Directory {
                parent_distance, ..
            } => *parent_distance = distance,
        }
    }

    pub fn is_leaf_entry(&self) -> bool {
        matches!(self, Entry::Leaf { .. })
    }

    /// Bytes of one leaf entry slot: object id plus parent distance.
    pub fn leaf_slot_size() -> usize {
        4 + D::SERIALIZED_SIZE
    }

    /// Bytes of one directory entry slot: routing object id, child node id,
    /// parent distance, covering radius.
    pub fn directory_slot_size() -> usize {
        4 + 4 + 2 * D::SERIALIZED_SIZE
    }

    /// Write this entry into its fixed-width slot. An unset parent distance
    /// is stored as zero; decoding restores `None` for root entries from
    /// context.
    pub fn encode(&self, buf: &mut [u8]) {
        match *self {
            Entry::Leaf {
                object_id,
                parent_distance,
            } => {
                buf[..4].copy_from_slice(&object_id.to_le_bytes());
                parent_distance
                    .unwrap_or_else(D::zero)
                    .encode(&mut buf[4..]);
            }
            Entry::Directory {
                routing_object_id,
                parent_distance,
                child_node_id,
                covering_radius,
            } => {
                let s = D::SERIALIZED_SIZE;
                buf[..4].copy_from_slice(&routing_object_id.to_le_bytes());
                buf[4..8].copy_from_slice(&child_node_id.to_le_bytes());
                parent_distance
                    .unwrap_or_else(D::zero)
                    .encode(&mut buf[8..8 + s]);
                covering_radius.encode(&mut buf[8 + s..8 + 2 * s]);
            }
        }
    }

    pub fn decode_leaf(buf: &[u8]) -> Self {
        Entry::Leaf {
            object_id: read_u32(buf, 0),
            parent_distance: Some(D::decode(&buf[4..])),
        }
    }

    pub fn decode_directory(buf: &[u8]) -> Self {
        let s = D::SERIALIZED_SIZE;
        Entry::Directory {
            routing_object_id: read_u32(buf, 0),
            child_node_id: read_u32(buf, 4),
            parent_distance: Some(D::decode(&buf[8..8 + s])),
            covering_radius: D::decode(&buf[8 + s..8 + 2 * s]),
        }
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}
