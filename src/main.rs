// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use jobrelay::config::settings::Settings;
use jobrelay::domain::models::payload::{JobPayload, WebhookDelivery};
use jobrelay::domain::repositories::job_repository::JobRepository;
use jobrelay::domain::services::completion_service::CompletionTracker;
use jobrelay::handlers::{HandlerRegistry, WebhookHandler};
use jobrelay::infrastructure::database::connection;
use jobrelay::infrastructure::metrics;
use jobrelay::infrastructure::repositories::job_repo_impl::JobRepositoryImpl;
use jobrelay::infrastructure::repositories::parent_completion_repo_impl::ParentCompletionRepositoryImpl;
use jobrelay::presentation::middleware::auth_middleware::AuthState;
use jobrelay::presentation::routes::{self, AdminServices};
use jobrelay::queue::immediate::ImmediateDelivery;
use jobrelay::queue::job_queue::DatabaseJobQueue;
use jobrelay::queue::scheduler::LaneScheduler;
use jobrelay::utils::telemetry;
use jobrelay::workers::dispatcher::{Dispatcher, DispatcherConfig};
use jobrelay::workers::manager::WorkerManager;
use jobrelay::workers::retention_worker::RetentionWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting jobrelay...");

    // 2. Load configuration
    let settings = Arc::new(Settings::new()?);
    info!("Configuration loaded");

    metrics::init_metrics(&settings.metrics);

    // 3. Connect to database
    let db = connection::create_pool(&settings.database).await?;
    let db = Arc::new(db);
    info!("Database connection established");

    connection::run_migrations(db.as_ref()).await?;

    // 4. Initialize components
    let lanes = Arc::new(settings.lane_table());
    let jobs: Arc<dyn JobRepository> = Arc::new(JobRepositoryImpl::new(db.clone()));
    let completions = Arc::new(ParentCompletionRepositoryImpl::new(db.clone()));
    let tracker = Arc::new(CompletionTracker::new(jobs.clone(), completions));

    let mut registry = HandlerRegistry::new();
    registry.register(
        WebhookDelivery::KIND,
        Arc::new(WebhookHandler::new(
            settings.webhook.secret.clone(),
            Duration::from_secs(settings.webhook.timeout_secs),
        )?),
    );
    let registry = Arc::new(registry);
    info!("Registered handlers: {:?}", registry.kinds());

    let queue = DatabaseJobQueue::new(jobs.clone(), tracker.clone(), lanes.clone());
    let immediate = ImmediateDelivery::new(
        queue.clone(),
        registry.clone(),
        Duration::from_secs(settings.webhook.timeout_secs),
    );

    let instance_id = settings.dispatcher.instance_id.unwrap_or_else(Uuid::new_v4);
    info!("Dispatcher instance {}", instance_id);
    let dispatcher = Arc::new(Dispatcher::new(
        jobs.clone(),
        registry,
        tracker.clone(),
        lanes,
        DispatcherConfig {
            instance_id,
            lease_timeout: settings.dispatcher.lease_timeout(),
        },
    ));

    // 5. Start workers
    let mut worker_manager = WorkerManager::new();
    worker_manager.start_lanes(&LaneScheduler::new(dispatcher.clone()));
    worker_manager.start_retention(RetentionWorker::new(
        jobs.clone(),
        tracker,
        settings.dispatcher.retention_days,
        settings.dispatcher.lease_timeout(),
        settings.dispatcher.retention_interval(),
    ));

    // 6. Start HTTP server
    let app = routes::app(AdminServices {
        queue: Arc::new(queue),
        immediate: Arc::new(immediate),
        dispatcher,
        jobs,
        auth: AuthState::new(settings.server.admin_token.clone()),
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    worker_manager.track(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server stopped: {}", e);
        }
    }));

    worker_manager.wait_for_shutdown().await;

    Ok(())
}
