pub mod row_writer;
