//! Query algorithms: range, k-nearest-neighbor and batch kNN.
//!
//! All three prune with the triangle inequality before computing a
//! distance: with `d1` the distance from the current routing object to the
//! query and `d2` the stored parent distance of an entry, `|d1 - d2|` is a
//! lower bound on the entry's distance to the query.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::distance::{abs_diff, Distance, Metric, ObjectId};
use crate::entry::Entry;
use crate::error::{MTreeError, Result};
use crate::node::Node;
use crate::page::ROOT_PAGE_ID;
use crate::tree::queue::{Candidate, CandidateHeap, KnnList};
use crate::tree::MTree;

/// A single query answer: an object id and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult<D: Distance> {
    pub object_id: ObjectId,
    pub distance: D,
}

impl<M: Metric> MTree<M> {
    /// All objects within `radius` of the query object, ascending by
    /// distance; equal distances keep their discovery order.
    pub fn range_query(
        &mut self,
        query: ObjectId,
        radius: M::D,
    ) -> Result<Vec<QueryResult<M::D>>> {
        self.ensure_open()?;
        let mut result = Vec::new();
        let root = self.file.read(ROOT_PAGE_ID)?;
        self.range_search(&root, query, radius, None, &mut result)?;
        result.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        Ok(result)
    }

    /// Range query with the radius given as text, run through the metric's
    /// parser.
    pub fn range_query_str(
        &mut self,
        query: ObjectId,
        radius: &str,
    ) -> Result<Vec<QueryResult<M::D>>> {
        let radius = self.metric.parse(radius)?;
        self.range_query(query, radius)
    }

    fn range_search(
        &mut self,
        node: &Node<M::D>,
        query: ObjectId,
        radius: M::D,
        routing_to_query: Option<M::D>,
        result: &mut Vec<QueryResult<M::D>>,
    ) -> Result<()> {
        let d1 = routing_to_query.unwrap_or_else(M::D::zero);

        if node.is_leaf() {
            for entry in node.entries() {
                let d2 = entry.parent_distance().unwrap_or_else(M::D::zero);
                if abs_diff(d1, d2) <= radius {
                    let d3 = self.metric.distance(entry.object_id(), query);
                    if d3 <= radius {
                        result.push(QueryResult {
                            object_id: entry.object_id(),
                            distance: d3,
                        });
                    }
                }
            }
            return Ok(());
        }

        for entry in node.entries() {
            let Entry::Directory {
                routing_object_id,
                parent_distance,
                child_node_id,
                covering_radius,
            } = *entry
            else {
                continue;
            };
            let d2 = parent_distance.unwrap_or_else(M::D::zero);
            let reach = radius.plus(covering_radius);
            if abs_diff(d1, d2) <= reach {
                let d3 = self.metric.distance(routing_object_id, query);
                if d3 <= reach {
                    let child = self.file.read(child_node_id)?;
                    self.range_search(&child, query, radius, Some(d3), result)?;
                }
            }
        }
        Ok(())
    }

    /// The `k` objects nearest to the query object, ascending by distance.
    pub fn knn_query(&mut self, query: ObjectId, k: usize) -> Result<Vec<QueryResult<M::D>>> {
        self.ensure_open()?;
        if k < 1 {
            return Err(MTreeError::InvalidArgument(format!(
                "at least one neighbor has to be requested, got k = {}",
                k
            )));
        }
        let mut knn = KnnList::new(k);
        self.knn_search(query, &mut knn)?;
        Ok(knn.into_sorted_vec())
    }

    /// Reverse kNN queries are not supported by the metric tree.
    pub fn reverse_knn_query(
        &mut self,
        _query: ObjectId,
        _k: usize,
    ) -> Result<Vec<QueryResult<M::D>>> {
        Err(MTreeError::Unsupported(
            "reverse kNN queries are not supported by the metric tree",
        ))
    }

    /// Best-first search over subtrees ordered by lower bound; stops once no
    /// remaining subtree can beat the current kth distance.
    fn knn_search(&mut self, query: ObjectId, knn: &mut KnnList<M::D>) -> Result<()> {
        let mut candidates = CandidateHeap::new();
        candidates.push(Candidate {
            lower_bound: M::D::zero(),
            node_id: ROOT_PAGE_ID,
            routing: None,
        });

        while let Some(candidate) = candidates.pop() {
            if candidate.lower_bound > knn.k_distance() {
                return Ok(());
            }
            let node = self.file.read(candidate.node_id)?;
            let d1 = candidate
                .routing
                .map(|(_, to_query)| to_query)
                .unwrap_or_else(M::D::zero);

            if node.is_leaf() {
                for entry in node.entries() {
                    let d2 = entry.parent_distance().unwrap_or_else(M::D::zero);
                    if abs_diff(d1, d2) <= knn.k_distance() {
                        let d3 = self.metric.distance(entry.object_id(), query);
                        if d3 <= knn.k_distance() {
                            knn.add(entry.object_id(), d3);
                        }
                    }
                }
            } else {
                for entry in node.entries() {
                    let Entry::Directory {
                        routing_object_id,
                        parent_distance,
                        child_node_id,
                        covering_radius,
                    } = *entry
                    else {
                        continue;
                    };
                    let d2 = parent_distance.unwrap_or_else(M::D::zero);
                    if abs_diff(d1, d2) <= knn.k_distance().plus(covering_radius) {
                        let d3 = self.metric.distance(routing_object_id, query);
                        let lower_bound = if d3 > covering_radius {
                            d3.minus(covering_radius)
                        } else {
                            M::D::zero()
                        };
                        if lower_bound <= knn.k_distance() {
                            candidates.push(Candidate {
                                lower_bound,
                                node_id: child_node_id,
                                routing: Some((routing_object_id, d3)),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// kNN for a whole set of query objects in one descent, sharing node
    /// reads between the queries.
    pub fn batch_knn(
        &mut self,
        queries: &[ObjectId],
        k: usize,
    ) -> Result<HashMap<ObjectId, Vec<QueryResult<M::D>>>> {
        self.ensure_open()?;
        if k < 1 {
            return Err(MTreeError::InvalidArgument(format!(
                "at least one neighbor has to be requested, got k = {}",
                k
            )));
        }
        let mut lists: HashMap<ObjectId, KnnList<M::D>> = queries
            .iter()
            .map(|&query| (query, KnnList::new(k)))
            .collect();
        let root = self.file.read(ROOT_PAGE_ID)?;
        self.batch_search(&root, queries, &mut lists)?;
        Ok(lists
            .into_iter()
            .map(|(query, list)| (query, list.into_sorted_vec()))
            .collect())
    }

    fn batch_search(
        &mut self,
        node: &Node<M::D>,
        queries: &[ObjectId],
        lists: &mut HashMap<ObjectId, KnnList<M::D>>,
    ) -> Result<()> {
        if node.is_leaf() {
            for entry in node.entries() {
                for &query in queries {
                    if let Some(list) = lists.get_mut(&query) {
                        let d = self.metric.distance(entry.object_id(), query);
                        if d <= list.k_distance() {
                            list.add(entry.object_id(), d);
                        }
                    }
                }
            }
            return Ok(());
        }

        // entries ascending by their smallest lower bound over all queries
        let mut order: Vec<(M::D, usize)> = Vec::with_capacity(node.num_entries());
        for (index, entry) in node.entries().iter().enumerate() {
            let Entry::Directory {
                routing_object_id,
                covering_radius,
                ..
            } = *entry
            else {
                continue;
            };
            let mut min_lower_bound = M::D::infinite();
            for &query in queries {
                let d = self.metric.distance(routing_object_id, query);
                let lower_bound = if covering_radius > d {
                    M::D::zero()
                } else {
                    d.minus(covering_radius)
                };
                if lower_bound < min_lower_bound {
                    min_lower_bound = lower_bound;
                }
            }
            order.push((min_lower_bound, index));
        }
        order.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (lower_bound, index) in order {
            let qualifies = queries.iter().any(|query| {
                lists
                    .get(query)
                    .map_or(false, |list| lower_bound <= list.k_distance())
            });
            if !qualifies {
                continue;
            }
            if let Entry::Directory { child_node_id, .. } = *node.entry(index) {
                let child = self.file.read(child_node_id)?;
                self.batch_search(&child, queries, lists)?;
            }
        }
        Ok(())
    }
}
