// Resilience for calls to the remote OCR and translation engines

pub mod api_key_pool;
pub mod circuit_breaker;

pub use api_key_pool::{ApiKeyPool, KeyHealth, KeyLease, KeyStats};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
