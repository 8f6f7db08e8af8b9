//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms: None,
            details,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
    gateway_name: Option<&'static str>,
}

impl HealthChecker {
    pub fn new(db_pool: sqlx::PgPool, gateway_name: Option<&'static str>) -> Self {
        Self {
            db_pool,
            gateway_name,
        }
    }

    /// Check the database and report the gateway mode. The gateway is never
    /// pinged here; an unconfigured gateway degrades the service (manual
    /// payments only) but does not make it unhealthy.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let started = Instant::now();
        match timeout(
            Duration::from_secs(5),
            crate::database::health_check(&self.db_pool),
        )
        .await
        {
            Ok(Ok(())) => {
                let elapsed = started.elapsed().as_millis();
                health_status
                    .checks
                    .insert("database".to_string(), ComponentHealth::up(Some(elapsed)));
                info!("Database health check: OK ({}ms)", elapsed);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Database health check failed");
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
            }
            Err(_) => {
                warn!("Database health check timed out");
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("health check timed out".to_string())),
                );
            }
        }

        match self.gateway_name {
            Some(name) => {
                health_status.checks.insert(
                    "payment_gateway".to_string(),
                    ComponentHealth::up(None).with_details(name.to_string()),
                );
            }
            None => {
                if health_status.status == HealthState::Healthy {
                    health_status.status = HealthState::Degraded;
                }
                health_status.checks.insert(
                    "payment_gateway".to_string(),
                    ComponentHealth::warning(Some(
                        "gateway unconfigured, manual payment mode".to_string(),
                    )),
                );
            }
        }

        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_health_constructors() {
        let up = ComponentHealth::up(Some(12));
        assert!(matches!(up.status, ComponentState::Up));
        assert_eq!(up.response_time_ms, Some(12));

        let down = ComponentHealth::down(Some("boom".to_string()));
        assert!(matches!(down.status, ComponentState::Down));
        assert_eq!(down.details.as_deref(), Some("boom"));
    }

    #[test]
    fn fresh_status_is_healthy() {
        assert!(HealthStatus::new().is_healthy());
    }
}
