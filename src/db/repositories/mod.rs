pub mod duration_records;
