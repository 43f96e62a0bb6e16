pub mod completion;
pub mod session;
pub mod sql_policy;
pub mod synthesizer;
