//! Per-execution id correlation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::batch::{Batch, BatchEntry};
use crate::error::RpcError;
use crate::shape::ResultShape;

/// Correlation maps for one batch execution: id → item and id → expected
/// result shape. Built once from the batch, consumed while responses are
/// demultiplexed, then dropped.
#[derive(Default)]
pub struct CallContext {
    items: HashMap<u64, Arc<dyn BatchEntry>>,
    shapes: HashMap<u64, ResultShape>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every item of `batch`.
    pub fn from_batch(batch: &Batch) -> Result<Self, RpcError> {
        let mut context = Self {
            items: HashMap::with_capacity(batch.len()),
            shapes: HashMap::with_capacity(batch.len()),
        };
        for item in batch.items() {
            context.register(Arc::clone(item))?;
        }
        Ok(context)
    }

    /// Index `item` by its id. A duplicate id is a broken invariant and is
    /// reported as an internal error.
    pub fn register(&mut self, item: Arc<dyn BatchEntry>) -> Result<(), RpcError> {
        let id = item.id();
        if self.items.contains_key(&id) {
            return Err(RpcError::Internal(format!(
                "duplicate batch id {id} ({})",
                item.method()
            )));
        }
        self.shapes.insert(id, item.shape().clone());
        self.items.insert(id, item);
        Ok(())
    }

    pub fn resolver_for(&self, id: u64) -> Option<&Arc<dyn BatchEntry>> {
        self.items.get(&id)
    }

    pub fn expected_shape_for(&self, id: u64) -> Option<&ResultShape> {
        self.shapes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;

    #[test]
    fn indexes_items_and_shapes() {
        let mut batch = Batch::new();
        batch.add(Call::string("eth_blockNumber", vec![]).unwrap());
        batch.add(Call::new("eth_getBlockByNumber", vec![]).unwrap());
        let context = CallContext::from_batch(&batch).unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.resolver_for(0).unwrap().method(), "eth_blockNumber");
        assert_eq!(context.expected_shape_for(0), Some(&ResultShape::String));
        assert_eq!(context.expected_shape_for(1), Some(&ResultShape::Any));
    }

    #[test]
    fn absent_id_is_none() {
        let batch = Batch::new();
        let context = CallContext::from_batch(&batch).unwrap();
        assert!(context.is_empty());
        assert!(context.resolver_for(9).is_none());
        assert!(context.expected_shape_for(9).is_none());
    }

    #[test]
    fn duplicate_id_fails_fast() {
        let mut batch = Batch::new();
        batch.add(Call::string("eth_blockNumber", vec![]).unwrap());
        let item = Arc::clone(&batch.items()[0]);
        let mut context = CallContext::new();
        context.register(Arc::clone(&item)).unwrap();
        let err = context.register(item).unwrap_err();
        assert!(matches!(err, RpcError::Internal(_)));
    }
}
