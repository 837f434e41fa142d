pub mod candle_store;

pub use candle_store::{CandleStore, SeriesKey};
