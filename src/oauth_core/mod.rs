pub mod types;
pub mod error;
pub mod oauth_provider;
pub mod crypto;
pub mod jwt;
pub mod enhancer;
pub mod memory;
pub mod config;
pub mod authorization;
pub mod http_client;
pub mod verifier;
pub mod endpoint;
