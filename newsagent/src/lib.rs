// Library interface for newsagent modules
// This allows tests and the binary to import modules

pub mod feishu;
pub mod filter;
pub mod history;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod scraping;
pub mod sink;
pub mod social;
pub mod sources;
