use std::collections::HashMap;
use std::env;

use tracing_subscriber::EnvFilter;
use trellis_application::ExecutionMode;
use trellis_core::{AppError, AppResult};

/// API process configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Optional Redis connection string for leases and event fanout.
    pub redis_url: Option<String>,
    /// Listen address, host:port.
    pub bind_addr: String,
    /// How freshly created executions are driven.
    pub execution_mode: ExecutionMode,
    /// Bound on concurrently running parallel-step branches.
    pub parallel_branch_limit: usize,
    /// Role-to-address notification routing for approvals.
    pub approver_addresses: HashMap<String, String>,
}

impl ApiConfig {
    /// Loads and validates the configuration.
    pub fn load() -> AppResult<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Validation("DATABASE_URL is required".to_owned()))?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let bind_addr =
            env::var("API_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_owned());
        let execution_mode = parse_execution_mode(
            env::var("EXECUTION_MODE")
                .unwrap_or_else(|_| "inline".to_owned())
                .as_str(),
        )?;
        let parallel_branch_limit = match env::var("PARALLEL_BRANCH_LIMIT") {
            Ok(value) => value.parse::<usize>().map_err(|error| {
                AppError::Validation(format!(
                    "invalid PARALLEL_BRANCH_LIMIT value '{value}': {error}"
                ))
            })?,
            Err(_) => 16,
        };

        Ok(Self {
            database_url,
            redis_url,
            bind_addr,
            execution_mode,
            parallel_branch_limit,
            approver_addresses: approver_addresses_from_env(),
        })
    }
}

fn parse_execution_mode(value: &str) -> AppResult<ExecutionMode> {
    if value.eq_ignore_ascii_case("inline") {
        return Ok(ExecutionMode::Inline);
    }

    if value.eq_ignore_ascii_case("queued") {
        return Ok(ExecutionMode::Queued);
    }

    Err(AppError::Validation(format!(
        "EXECUTION_MODE must be either 'inline' or 'queued', got '{value}'"
    )))
}

/// Parses `APPROVER_ADDRESSES` as `role=address` pairs separated by commas.
fn approver_addresses_from_env() -> HashMap<String, String> {
    env::var("APPROVER_ADDRESSES")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| {
                    let (role, address) = pair.split_once('=')?;
                    let role = role.trim();
                    let address = address.trim();
                    (!role.is_empty() && !address.is_empty())
                        .then(|| (role.to_owned(), address.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Initializes the process tracing subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
