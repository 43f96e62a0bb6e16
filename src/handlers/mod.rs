pub mod chat;
pub mod completions;
pub mod querydb;
pub mod settings;
