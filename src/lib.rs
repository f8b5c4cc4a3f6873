//! # metric-tree
//!
//! A paginated metric index: a balanced tree over objects drawn from an
//! arbitrary metric space, answering range and k-nearest-neighbor queries.
//! The tree exploits only the triangle inequality; no vector coordinates
//! are assumed.
//!
//! This library provides:
//! - A balanced, paged tree with routing objects and covering radii
//! - Memory- and file-backed page stores behind a bounded LRU cache
//! - Range, kNN and batch-kNN queries with distance-driven pruning
//! - A pluggable metric: implement [`Metric`] over your own object ids
//!
//! ## Example
//!
//! ```rust
//! use metric_tree::{EuclideanMetric, MTree};
//!
//! let points = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 2.0]];
//! let metric = EuclideanMetric::new(points);
//!
//! let mut tree = MTree::init_in_memory(metric, 128, 16).unwrap();
//! for id in 0..3 {
//!     tree.insert(id).unwrap();
//! }
//!
//! let nearest = tree.knn_query(0, 2).unwrap();
//! assert_eq!(nearest[0].object_id, 0);
//! assert_eq!(nearest[1].object_id, 1);
//! tree.close().unwrap();
//! ```

pub mod distance;
pub mod entry;
pub mod error;
pub mod node;
pub mod page;
pub mod tree;

pub use distance::{euclidean_distance, Distance, EuclideanMetric, ManhattanMetric, Metric, ObjectId};
pub use entry::Entry;
pub use error::{MTreeError, Result};
pub use node::Node;
pub use page::{
    FileStore, LruCache, MemoryStore, PageFile, PageId, PageLayout, PageStore, ROOT_PAGE_ID,
};
pub use tree::query::QueryResult;
pub use tree::queue::KnnList;
pub use tree::{MTree, TreeStats};
