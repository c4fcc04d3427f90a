mod config;
mod error;
mod filename;
mod job_controller;
mod pipeline;
mod server;
mod services;

use crate::config::Config;
use crate::job_controller::runner::JobRunner;
use crate::job_controller::state::{JobStore, JobsState};
use crate::pipeline::engine::Toolchain;
use crate::pipeline::Pipeline;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();
    for dir in [config.uploads_dir(), config.outputs_dir(), config.scratch_dir()] {
        std::fs::create_dir_all(&dir)?;
    }

    // Initialize job controller state
    let store = JobStore::new();
    let pipeline = Pipeline::new(Toolchain::system(&config.tools), config.scratch_dir());
    let runner = JobRunner::new(store.clone(), pipeline, config.outputs_dir(), &config.jobs);
    let jobs_state = JobsState::new(runner.clone(), &config);

    // Start job sweeper task
    tokio::spawn(job_controller::sweeper::start_job_sweeper(
        store,
        config.jobs.ttl,
        config.jobs.sweep_interval,
    ));

    info!(
        "OCR service listening on {}:{} (work dir {}, {} concurrent job(s), {} admitted)",
        config.server.host,
        config.server.port,
        config.server.work_dir.display(),
        config.jobs.max_running,
        config.jobs.max_pending
    );

    let http = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(jobs_state.clone()))
            .configure(server::routes)
    })
    .disable_signals()
    .bind((config.server.host.as_str(), config.server.port))?
    .run();

    let abandoned = server::serve(
        http,
        runner,
        config.jobs.shutdown_grace,
        server::shutdown_signal(),
    )
    .await?;
    if abandoned > 0 {
        warn!("Exiting with {} job(s) still running", abandoned);
    }
    Ok(())
}
