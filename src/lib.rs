pub mod cli;
pub mod engine;
pub mod recovery;
pub mod stages;
pub mod storage;
pub mod textgen;
