pub mod batch_writer;
pub mod message_reader;
