pub mod csv_dataset;

pub use csv_dataset::{read_dataset, DatasetReaderConfig};
