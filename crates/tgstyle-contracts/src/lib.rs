pub mod classification;
pub mod events;
pub mod storage;
