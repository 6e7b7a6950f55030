use crate::application::strategy::{AggregationStrategy, ConcatStrategy};
use crate::domain::batch::{Batch, CompletionReason};
use crate::domain::message::PaymentMessage;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct BatchRow<'a> {
    correlation_key: &'a str,
    reason: CompletionReason,
    items: usize,
    total: Decimal,
    message_ids: String,
}

/// Writes completed batches as CSV, one row per batch.
pub struct BatchWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BatchWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_batch(&mut self, batch: &Batch<PaymentMessage>) -> Result<()> {
        let ids = ConcatStrategy::new(";", |m: &PaymentMessage| m.message_id.clone());
        let total: Decimal = batch.items().iter().filter_map(|m| m.amount).sum();
        self.writer.serialize(BatchRow {
            correlation_key: &batch.correlation_key,
            reason: batch.reason,
            items: batch.len(),
            total: total.normalize(),
            message_ids: ids.aggregate(batch),
        })?;
        Ok(())
    }

    pub fn write_batches<'a, I>(&mut self, batches: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Batch<PaymentMessage>>,
    {
        for batch in batches {
            self.write_batch(batch)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
