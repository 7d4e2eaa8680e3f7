pub mod duration_record;

pub use duration_record::DurationRecord;
