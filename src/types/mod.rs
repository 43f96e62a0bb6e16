pub mod mistral;
pub mod query;
