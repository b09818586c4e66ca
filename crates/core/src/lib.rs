//! Core library: safety triage, corpus building, vector index and the answering pipeline.

pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod safety;
pub mod search;
pub mod vectorstore;
