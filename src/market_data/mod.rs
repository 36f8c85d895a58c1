pub mod bar_cache;

pub use bar_cache::BarCache;
