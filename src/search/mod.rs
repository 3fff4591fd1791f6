pub mod bm25;
pub mod boost;
pub mod cache;
pub mod expand;
pub mod fusion;
pub mod hybrid;
