//! Target registry: the validated, immutable set of sync targets.
//!
//! Registration is all-or-nothing: a duplicate key, a prerequisite that names
//! an unknown target, or a dependency cycle rejects the whole batch and leaves
//! any previously registered set untouched.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::types::{Platform, PriorityTier, SyncTarget, TargetKey};

/// Registered sync targets, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<SyncTarget>,
    index: HashMap<TargetKey, usize>,
}

impl TargetRegistry {
    /// Validate `targets` and build a registry from them.
    pub fn new(targets: Vec<SyncTarget>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(targets.len());
        for (position, target) in targets.iter().enumerate() {
            if index.insert(target.key.clone(), position).is_some() {
                return Err(ConfigError::DuplicateTarget {
                    key: target.key.to_string(),
                });
            }
        }

        for target in &targets {
            for dependency in &target.depends_on {
                if !index.contains_key(dependency) {
                    return Err(ConfigError::UnknownDependency {
                        target: target.key.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        let registry = Self { targets, index };
        if let Some(cycle) = registry.find_cycle() {
            let rendered: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(ConfigError::DependencyCycle {
                cycle: rendered.join(" -> "),
            });
        }
        Ok(registry)
    }

    /// Replace the registered set. On error the current set is kept.
    pub fn register(&mut self, targets: Vec<SyncTarget>) -> Result<(), ConfigError> {
        *self = Self::new(targets)?;
        Ok(())
    }

    pub fn get(&self, key: &TargetKey) -> Option<&SyncTarget> {
        self.index.get(key).map(|&position| &self.targets[position])
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.index.contains_key(key)
    }

    /// All targets in registration order.
    pub fn targets(&self) -> &[SyncTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets of one tier, in registration order.
    pub fn targets_by_tier(&self, tier: PriorityTier) -> Vec<&SyncTarget> {
        self.targets
            .iter()
            .filter(|target| target.priority == tier)
            .collect()
    }

    /// Direct prerequisites of `key`; empty for unknown keys.
    pub fn dependencies(&self, key: &TargetKey) -> Vec<&SyncTarget> {
        self.get(key)
            .map(|target| {
                target
                    .depends_on
                    .iter()
                    .filter_map(|dependency| self.get(dependency))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Platforms ordered by their best tier, then by first registration.
    ///
    /// Used to break ties between otherwise equivalent conflicting payloads.
    pub fn platform_priority(&self) -> Vec<Platform> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for tier in PriorityTier::ALL {
            for target in self.targets_by_tier(tier) {
                if seen.insert(target.key.platform.clone()) {
                    ordered.push(target.key.platform.clone());
                }
            }
        }
        ordered
    }

    /// Iterative three-colour DFS; returns the first cycle found, closed on its start node.
    fn find_cycle(&self) -> Option<Vec<TargetKey>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.targets.len()];
        for root in 0..self.targets.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, index of the next edge to follow)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(&(node, next_edge)) = stack.last() {
                let edges = &self.targets[node].depends_on;
                if next_edge == edges.len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let child = self.index[&edges[next_edge]];

                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::InProgress;
                        stack.push((child, 0));
                    }
                    Mark::InProgress => {
                        let start = stack
                            .iter()
                            .position(|&(entry, _)| entry == child)
                            .unwrap_or(0);
                        let mut cycle: Vec<TargetKey> = stack[start..]
                            .iter()
                            .map(|&(entry, _)| self.targets[entry].key.clone())
                            .collect();
                        cycle.push(self.targets[child].key.clone());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
