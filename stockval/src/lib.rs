//! Stockval Library
//!
//! Keeps a watchlist of stocks valued with a Gordon growth model and refreshes
//! their market data on demand or on a schedule.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      stockval (Rust Service)                     │
//! │                              :5000                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  HTTP routes ──┐                                                 │
//! │  Scheduler ────┼──▶ Orchestrator ──▶ RefreshJob ──▶ Valuation    │
//! │  CLI ──────────┘         │               │                       │
//! │                     StatusStore    MarketDataSource / Repository │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Valuation
//! - Gordon growth price from book value, ROE and the growth/return assumptions
//! - Lower/mid/upper bands from a relative ROE perturbation
//!
//! ## Refresh runs
//! - One run per market segment at a time
//! - Bounded parallel refresh jobs with retries and a per-job timeout
//! - Progress and terminal outcome published to a shared status store

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod orchestrator;
pub mod refresh;
pub mod routes;
pub mod scheduler;
pub mod screening;
pub mod valuation;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use stockval_common::config::Config;
use tower_http::cors::{Any, CorsLayer};

use crate::data::{MarketDataSource, SqliteRepository, StockRepository, XueqiuSource};
use crate::orchestrator::{MarketUpdateOrchestrator, StatusStore};
use crate::refresh::RefreshJob;
use crate::scheduler::RefreshScheduler;
use crate::valuation::{SensitivityPolicy, ValuationEngine};

/// Shared service state
pub struct ServiceState {
    /// Configuration
    pub config: Config,
    /// Stock record store
    pub repository: Arc<dyn StockRepository>,
    /// Single-symbol refresh, shared with the orchestrator
    pub job: RefreshJob,
    /// Refresh run coordinator
    pub orchestrator: MarketUpdateOrchestrator,
    pub engine: ValuationEngine,
}

impl ServiceState {
    /// Wire the valuation and refresh components over the given collaborators.
    pub fn new(
        config: Config,
        repository: Arc<dyn StockRepository>,
        source: Arc<dyn MarketDataSource>,
    ) -> Self {
        let engine = ValuationEngine::new(SensitivityPolicy::from(&config.valuation));
        let job = RefreshJob::new(source, Arc::clone(&repository), engine)
            .with_config(&config.refresh);
        let orchestrator = MarketUpdateOrchestrator::new(
            Arc::clone(&repository),
            job.clone(),
            StatusStore::new(),
            config.refresh.worker_pool_size,
        );

        Self {
            config,
            repository,
            job,
            orchestrator,
            engine,
        }
    }

    /// Production wiring: SQLite records and Xueqiu quotes.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = config.storage.resolved_db_path();
        let repository = SqliteRepository::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let source = XueqiuSource::new(&config.market_data);

        Ok(Self::new(config, Arc::new(repository), Arc::new(source)))
    }
}

/// Build the CORS layer from configured origins. An empty list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

/// Main valuation service
pub struct StockvalService {
    state: Arc<ServiceState>,
}

impl StockvalService {
    /// Create the service with production collaborators
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(ServiceState::open(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<ServiceState> {
        Arc::clone(&self.state)
    }

    /// Start the scheduler and serve HTTP until shutdown
    pub async fn start(self) -> Result<()> {
        let server = &self.state.config.server;
        let app = routes::build_router(self.state.clone()).layer(cors_layer(&server.cors_origins));

        // Start the refresh scheduler
        let scheduler = Arc::new(RefreshScheduler::new(
            &self.state.config.schedule,
            self.state.orchestrator.clone(),
        )?);
        {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                if let Err(e) = scheduler.run().await {
                    tracing::error!(error = %e, "Refresh scheduler failed");
                }
            });
        }

        // Start HTTP server
        let addr: SocketAddr = format!("{}:{}", server.host, server.port).parse()?;
        tracing::info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // No new scheduled runs once the server is down
        scheduler.stop().await;

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

