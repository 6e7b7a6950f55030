use crate::domain::batch::Batch;

/// Turns a completed batch into the shape a downstream consumer wants.
pub trait AggregationStrategy<T> {
    type Output;
    fn aggregate(&self, batch: &Batch<T>) -> Self::Output;
}

/// Plain list batching: the items, in admission order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListStrategy;

impl<T: Clone> AggregationStrategy<T> for ListStrategy {
    type Output = Vec<T>;

    fn aggregate(&self, batch: &Batch<T>) -> Vec<T> {
        batch.items().to_vec()
    }
}

/// Correlation-based concatenation: renders each item and joins them.
pub struct ConcatStrategy<F> {
    separator: String,
    render: F,
}

impl<F> ConcatStrategy<F> {
    pub fn new(separator: impl Into<String>, render: F) -> Self {
        Self {
            separator: separator.into(),
            render,
        }
    }
}

impl<T, F> AggregationStrategy<T> for ConcatStrategy<F>
where
    F: Fn(&T) -> String,
{
    type Output = String;

    fn aggregate(&self, batch: &Batch<T>) -> String {
        batch
            .items()
            .iter()
            .map(&self.render)
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}
