// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Settled composition results and their chainable helpers.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::FlowError;

/// Aggregate counts for a parallel composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of a composition that rejects on the first failure.
#[derive(Clone)]
pub struct ParallelOutcome<T> {
    pub results: Vec<Arc<T>>,
    pub stats: FlowStats,
}

/// One sibling's settled outcome, position-preserving.
#[derive(Clone)]
pub enum SettledResult<T> {
    Fulfilled(Arc<T>),
    Rejected(FlowError),
}

impl<T> SettledResult<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, SettledResult::Fulfilled(_))
    }
}

/// All siblings' outcomes from a settled composition. Never constructed from
/// a rejection: composition failures are the handle's rejection instead.
#[derive(Clone)]
pub struct SettledBatch<T> {
    results: Vec<SettledResult<T>>,
}

impl<T> SettledBatch<T> {
    pub(crate) fn new(results: Vec<SettledResult<T>>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[SettledResult<T>] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Fulfilled values in sibling order.
    pub fn fulfilled(&self) -> Vec<Arc<T>> {
        self.results
            .iter()
            .filter_map(|result| match result {
                SettledResult::Fulfilled(value) => Some(value.clone()),
                SettledResult::Rejected(_) => None,
            })
            .collect()
    }

    /// Rejection errors in sibling order.
    pub fn rejected(&self) -> Vec<FlowError> {
        self.results
            .iter()
            .filter_map(|result| match result {
                SettledResult::Fulfilled(_) => None,
                SettledResult::Rejected(error) => Some(error.clone()),
            })
            .collect()
    }

    /// Both lists at once, positions preserved within each.
    pub fn partition(&self) -> (Vec<Arc<T>>, Vec<FlowError>) {
        (self.fulfilled(), self.rejected())
    }

    pub fn first_fulfilled(&self) -> Option<Arc<T>> {
        self.results.iter().find_map(|result| match result {
            SettledResult::Fulfilled(value) => Some(value.clone()),
            SettledResult::Rejected(_) => None,
        })
    }

    pub fn first_rejected(&self) -> Option<FlowError> {
        self.results.iter().find_map(|result| match result {
            SettledResult::Fulfilled(_) => None,
            SettledResult::Rejected(error) => Some(error.clone()),
        })
    }

    pub fn find_fulfilled(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.results.iter().find_map(|result| match result {
            SettledResult::Fulfilled(value) if predicate(value) => Some(value.clone()),
            _ => None,
        })
    }

    pub fn map_fulfilled<U>(&self, f: impl Fn(&T) -> U) -> Vec<U> {
        self.results
            .iter()
            .filter_map(|result| match result {
                SettledResult::Fulfilled(value) => Some(f(value)),
                SettledResult::Rejected(_) => None,
            })
            .collect()
    }

    /// All fulfilled values, or an error naming how many rejected.
    pub fn assert_all_fulfilled(&self) -> Result<Vec<Arc<T>>, FlowError> {
        let rejected = self.stats().failed;
        if rejected > 0 {
            Err(FlowError::Unfulfilled { rejected })
        } else {
            Ok(self.fulfilled())
        }
    }

    pub fn stats(&self) -> FlowStats {
        let succeeded = self
            .results
            .iter()
            .filter(|result| result.is_fulfilled())
            .count();
        FlowStats {
            total: self.results.len(),
            succeeded,
            failed: self.results.len() - succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> SettledBatch<u32> {
        SettledBatch::new(vec![
            SettledResult::Fulfilled(Arc::new(1)),
            SettledResult::Rejected(FlowError::handler("mid", anyhow::anyhow!("nope"))),
            SettledResult::Fulfilled(Arc::new(3)),
        ])
    }

    #[test]
    fn partition_preserves_positions_within_lists() {
        let (fulfilled, rejected) = batch().partition();
        let values: Vec<u32> = fulfilled.iter().map(|v| **v).collect();
        assert_eq!(values, vec![1, 3]);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn stats_count_both_sides() {
        let stats = batch().stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn assert_all_fulfilled_reports_rejections() {
        assert!(matches!(
            batch().assert_all_fulfilled(),
            Err(FlowError::Unfulfilled { rejected: 1 })
        ));

        let clean = SettledBatch::new(vec![SettledResult::Fulfilled(Arc::new(9u32))]);
        assert_eq!(clean.assert_all_fulfilled().unwrap().len(), 1);
    }

    #[test]
    fn find_and_map_operate_on_fulfilled_only() {
        let batch = batch();
        assert_eq!(*batch.find_fulfilled(|v| *v > 1).unwrap(), 3);
        assert_eq!(batch.map_fulfilled(|v| v * 10), vec![10, 30]);
        assert_eq!(*batch.first_fulfilled().unwrap(), 1);
        assert!(batch.first_rejected().is_some());
    }
}
