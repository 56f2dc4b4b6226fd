//! Dependency ordering for a batch of binaries.
//!
//! Edges are resolved by case-insensitive file name match inside the batch
//! only. Names that do not resolve (system libraries, libraries living in
//! other directories) are left to the platform loader.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::binary::{strip_extension, BinaryDescriptor};
use crate::record::LoadOutcome;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Dependency graph over one discovery batch.
#[derive(Debug)]
pub struct DependencyGraph {
    /// For each descriptor, the batch indices of its resolved dependencies.
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph for `batch`, dropping edges to names outside it.
    pub fn build(batch: &[BinaryDescriptor]) -> Self {
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(batch.len());
        for (idx, descriptor) in batch.iter().enumerate() {
            // Recursive scans may repeat a name; the first discovered wins.
            by_name.entry(descriptor.name().to_lowercase()).or_insert(idx);
        }

        let edges = batch
            .iter()
            .enumerate()
            .map(|(idx, descriptor)| {
                let mut resolved = Vec::new();
                for dep in descriptor.dependencies() {
                    match by_name.get(&dep.to_lowercase()) {
                        Some(&target) if target != idx => {
                            if !resolved.contains(&target) {
                                resolved.push(target);
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!(binary = %descriptor.name(), dependency = %dep, "Dependency outside batch, leaving to platform loader");
                        }
                    }
                }
                resolved
            })
            .collect();

        Self { edges }
    }

    /// Resolved dependency indices of the descriptor at `idx`.
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        &self.edges[idx]
    }

    /// Compute a load order as indices into the batch.
    ///
    /// Depth-first in discovery order, emitting each node after its
    /// dependencies. A back-edge closes a cycle; it is skipped, so every node
    /// still appears exactly once.
    pub fn order(&self, names: &[&str]) -> Vec<usize> {
        let mut marks = vec![Mark::Unvisited; self.edges.len()];
        let mut order = Vec::with_capacity(self.edges.len());
        for idx in 0..self.edges.len() {
            self.visit(idx, names, &mut marks, &mut order);
        }
        order
    }

    fn visit(&self, idx: usize, names: &[&str], marks: &mut [Mark], order: &mut Vec<usize>) {
        if marks[idx] != Mark::Unvisited {
            return;
        }
        marks[idx] = Mark::Visiting;
        for &dep in &self.edges[idx] {
            match marks[dep] {
                Mark::Unvisited => self.visit(dep, names, marks, order),
                Mark::Visiting => {
                    warn!(
                        binary = %names.get(idx).copied().unwrap_or_default(),
                        dependency = %names.get(dep).copied().unwrap_or_default(),
                        "Dependency cycle detected, ignoring edge"
                    );
                }
                Mark::Done => {}
            }
        }
        marks[idx] = Mark::Done;
        order.push(idx);
    }
}

/// Sort a batch so every in-batch dependency precedes its dependents.
///
/// Unconstrained binaries keep their discovery order.
pub fn sort_by_dependencies(batch: Vec<BinaryDescriptor>) -> Vec<BinaryDescriptor> {
    let graph = DependencyGraph::build(&batch);
    let order = {
        let names: Vec<&str> = batch.iter().map(BinaryDescriptor::name).collect();
        graph.order(&names)
    };

    let mut slots: Vec<Option<BinaryDescriptor>> = batch.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}

/// Check that every declared dependency of every record names a loaded record.
///
/// Matching is case-insensitive on extension-stripped identifiers. Returns one
/// diagnostic per missing dependency; purely advisory.
pub fn validate_dependencies(batch: &[LoadOutcome]) -> Vec<String> {
    validate_dependencies_with(batch, std::iter::empty::<&str>())
}

/// Like [`validate_dependencies`], also accepting identifiers loaded by
/// earlier batches.
pub fn validate_dependencies_with<I, S>(batch: &[LoadOutcome], available: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let loaded: Vec<String> = batch
        .iter()
        .filter(|record| record.is_loaded())
        .map(|record| strip_extension(record.identifier()).to_lowercase())
        .chain(
            available
                .into_iter()
                .map(|id| strip_extension(id.as_ref()).to_lowercase()),
        )
        .collect();

    let mut diagnostics = Vec::new();
    for record in batch {
        for dep in record.descriptor().dependencies() {
            let wanted = strip_extension(dep).to_lowercase();
            if !loaded.iter().any(|id| *id == wanted) {
                diagnostics.push(format!(
                    "{} is missing dependency {}",
                    record.descriptor().name(),
                    dep
                ));
            }
        }
    }
    diagnostics
}
