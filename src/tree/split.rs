//! Node splitting: promotion of two routing objects and partitioning of an
//! overflowing node's entries.
//!
//! Promotion reuses the routing object already stored in the parent entry as
//! the first promoted object, so every first-partition parent distance is
//! already known; the second promoted object is the entry farthest from it.
//! A root split has no parent entry and promotes a mutually farthest pair
//! instead, ties broken by entry order.

use crate::distance::{Distance, Metric, ObjectId};
use crate::entry::Entry;
use crate::node::Node;

/// The outcome of promotion and partitioning: two routing objects, the two
/// entry sets with refreshed parent distances, and their covering radii.
pub(crate) struct Assignments<D: Distance> {
    pub first_routing_object: ObjectId,
    pub second_routing_object: ObjectId,
    pub first_entries: Vec<Entry<D>>,
    pub second_entries: Vec<Entry<D>>,
    pub first_covering_radius: D,
    pub second_covering_radius: D,
}

pub(crate) fn promote_and_partition<M: Metric>(
    node: &Node<M::D>,
    parent_routing: Option<ObjectId>,
    metric: &M,
) -> Assignments<M::D> {
    let entries = node.entries();

    let (first, second) = match parent_routing {
        Some(first) => {
            let mut farthest: Option<(M::D, usize)> = None;
            for (index, entry) in entries.iter().enumerate() {
                let d = distance_to_parent(entry, first, metric);
                if farthest.map_or(true, |(best, _)| d > best) {
                    farthest = Some((d, index));
                }
            }
            let index = farthest.map(|(_, index)| index).unwrap_or(0);
            (first, entries[index].object_id())
        }
        None => {
            let mut farthest: Option<(M::D, usize, usize)> = None;
            for i in 0..entries.len() {
                for j in i + 1..entries.len() {
                    let d = metric.distance(entries[i].object_id(), entries[j].object_id());
                    if farthest.map_or(true, |(best, _, _)| d > best) {
                        farthest = Some((d, i, j));
                    }
                }
            }
            let (i, j) = farthest.map(|(_, i, j)| (i, j)).unwrap_or((0, 1));
            (entries[i].object_id(), entries[j].object_id())
        }
    };

    let mut first_entries = Vec::with_capacity(entries.len());
    let mut second_entries = Vec::with_capacity(entries.len());
    for entry in entries {
        let d_first = match parent_routing {
            Some(routing) => distance_to_parent(entry, routing, metric),
            None => metric.distance(entry.object_id(), first),
        };
        let d_second = metric.distance(entry.object_id(), second);

        let mut assigned = *entry;
        if d_first <= d_second {
            assigned.set_parent_distance(Some(d_first));
            first_entries.push(assigned);
        } else {
            assigned.set_parent_distance(Some(d_second));
            second_entries.push(assigned);
        }
    }

    // a one-sided partition would leave an empty node and make the split
    // unproductive; move one entry over, keeping the choice deterministic
    if second_entries.is_empty() {
        let index = argmin_by(&first_entries, |entry| metric.distance(entry.object_id(), second));
        let mut moved = first_entries.remove(index);
        moved.set_parent_distance(Some(metric.distance(moved.object_id(), second)));
        second_entries.push(moved);
    } else if first_entries.is_empty() {
        let index = argmin_by(&second_entries, |entry| metric.distance(entry.object_id(), first));
        let mut moved = second_entries.remove(index);
        moved.set_parent_distance(Some(metric.distance(moved.object_id(), first)));
        first_entries.push(moved);
    }

    let first_covering_radius = covering_radius_of(&first_entries);
    let second_covering_radius = covering_radius_of(&second_entries);

    Assignments {
        first_routing_object: first,
        second_routing_object: second,
        first_entries,
        second_entries,
        first_covering_radius,
        second_covering_radius,
    }
}

/// Distance from an entry's object to the parent routing object, taken from
/// the stored parent distance when present.
fn distance_to_parent<M: Metric>(entry: &Entry<M::D>, routing: ObjectId, metric: &M) -> M::D {
    entry
        .parent_distance()
        .unwrap_or_else(|| metric.distance(entry.object_id(), routing))
}

/// Covering radius of a partition whose parent distances are already set:
/// for a leaf entry its distance suffices; a directory entry's subtree
/// reaches its own covering radius further out.
fn covering_radius_of<D: Distance>(entries: &[Entry<D>]) -> D {
    let mut radius = D::zero();
    for entry in entries {
        let d = entry.parent_distance().unwrap_or_else(D::zero);
        let bound = match *entry {
            Entry::Directory {
                covering_radius, ..
            } => d.plus(covering_radius),
            Entry::Leaf { .. } => d,
        };
        if bound > radius {
            radius = bound;
        }
    }
    radius
}

fn argmin_by<D: Distance>(entries: &[Entry<D>], mut key: impl FnMut(&Entry<D>) -> D) -> usize {
    let mut best = 0;
    let mut best_key: Option<D> = None;
    for (index, entry) in entries.iter().enumerate() {
        let k = key(entry);
        if best_key.map_or(true, |b| k < b) {
            best = index;
            best_key = Some(k);
        }
    }
    best
}
