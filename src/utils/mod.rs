pub mod dtr_report;
pub mod username_index;
