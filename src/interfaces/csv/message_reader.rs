use crate::domain::message::PaymentMessage;
use crate::error::{CoreError, Result};
use std::io::Read;

/// Reads already-classified payment messages from a CSV source.
///
/// Expects the header `message_id,identifier,identifier_type,correlation_key,amount`.
/// Fields are trimmed and rows may omit the trailing `amount`.
pub struct MessageReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> MessageReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an error and the stream continues.
    pub fn messages(self) -> impl Iterator<Item = Result<PaymentMessage>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CoreError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "message_id, identifier, identifier_type, correlation_key, amount\n\
                    M1, INSTR-1, InstrId, BATCH-A, 10.00\n\
                    M2, E2E-9, EndToEndId, BATCH-B";
        let reader = MessageReader::new(data.as_bytes());
        let results: Vec<Result<PaymentMessage>> = reader.messages().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.identifier, "INSTR-1");
        assert_eq!(first.amount, Some(dec!(10.00)));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.identifier_type, "EndToEndId");
        assert_eq!(second.amount, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "message_id, identifier, identifier_type, correlation_key, amount\n\
                    M1, INSTR-1, InstrId, BATCH-A, not-a-number\n\
                    M2, INSTR-2, InstrId, BATCH-A, 1.00";
        let results: Vec<_> = MessageReader::new(data.as_bytes()).messages().collect();

        assert!(matches!(results[0], Err(CoreError::CsvError(_))));
        assert!(results[1].is_ok());
    }
}
