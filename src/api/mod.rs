pub mod mistral_api;
