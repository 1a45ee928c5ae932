//! Vesper chat: authenticates a one-time code, decrypts the client's message
//! and stored history, calls the model, and persists the encrypted exchange.

pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod sanitize;
pub mod wire;

pub use config::{Config, ConfigError};
pub use context::RequestContext;
pub use error::{ChatError, ErrorKind};
pub use health::{check_all, ComponentHealth, HealthCheck, HealthReport, HealthStatus};
pub use history::{decrypt_history, CandidatePlan, DecryptedHistory};
pub use model::{ModelClient, ModelError, ModelTurn};
pub use orchestrator::{ChatPhase, ChatService, PhaseTrace};
pub use wire::{ChatRequest, ChatResponse, DecryptedTurn, HistoryFailure, HistoryView};
