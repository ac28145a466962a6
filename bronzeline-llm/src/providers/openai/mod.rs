//! OpenAI and Azure OpenAI chat-completions provider

pub mod analyzer;
pub mod client;
pub mod types;

pub use analyzer::OpenAILineageAnalyzer;
pub use client::OpenAIClient;
