pub mod table;

pub use table::TableData;
