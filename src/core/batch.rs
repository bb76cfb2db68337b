//! Aggregation of multi-item (batch and bulk) call results.

use serde::Deserialize;

use crate::core::error::ServiceError;

/// The outcome of one item in a batch call.
#[derive(Debug)]
pub enum BatchItemResult<T> {
    Success(T),
    Failure(ServiceError),
}

impl<T> BatchItemResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemResult::Success(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            BatchItemResult::Success(value) => Some(value),
            BatchItemResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            BatchItemResult::Success(_) => None,
            BatchItemResult::Failure(err) => Some(err),
        }
    }
}

/// Per-item results of a batch call, in request order, with derived counts.
#[derive(Debug)]
pub struct BatchResponse<T> {
    responses: Vec<BatchItemResult<T>>,
    success_count: usize,
}

impl<T> BatchResponse<T> {
    pub fn aggregate(responses: Vec<BatchItemResult<T>>) -> Self {
        let success_count = responses.iter().filter(|r| r.is_success()).count();
        Self {
            responses,
            success_count,
        }
    }

    pub fn responses(&self) -> &[BatchItemResult<T>] {
        &self.responses
    }

    pub fn into_responses(self) -> Vec<BatchItemResult<T>> {
        self.responses
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count
    }
}

impl<T> Default for BatchResponse<T> {
    fn default() -> Self {
        Self::aggregate(Vec::new())
    }
}

impl<T> FromIterator<BatchItemResult<T>> for BatchResponse<T> {
    fn from_iter<I: IntoIterator<Item = BatchItemResult<T>>>(iter: I) -> Self {
        Self::aggregate(iter.into_iter().collect())
    }
}

/// A per-item failure reported by a bulk endpoint, keyed by request position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendItemError {
    pub index: usize,
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// A failed item of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedError {
    /// Position of the item in the caller's input.
    pub index: usize,
    pub reason: String,
}

/// Maps backend messages to `IndexedError` reasons, in index order.
///
/// `reason` returns the public reason for a backend message, or `None` to
/// keep the message verbatim.
pub fn build_indexed_errors<F>(errors: Vec<BackendItemError>, reason: F) -> Vec<IndexedError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut indexed: Vec<IndexedError> = errors
        .into_iter()
        .map(|err| IndexedError {
            index: err.index,
            reason: reason(&err.message).unwrap_or(err.message),
        })
        .collect();
    indexed.sort_by_key(|err| err.index);
    indexed
}

/// Summary of a bulk operation over `total` items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<IndexedError>,
}

impl BulkResult {
    pub fn new(total: usize, errors: Vec<IndexedError>) -> Self {
        Self {
            success_count: total.saturating_sub(errors.len()),
            failure_count: errors.len(),
            errors,
        }
    }
}
