//! Serving HTTP and stopping in the right order.
//!
//! On a stop request, admission closes first and running jobs get their
//! grace period while the server still answers status polls and downloads.
//! Only after that are the HTTP workers stopped.

use crate::job_controller::runner::JobRunner;
use crate::services;
use actix_web::dev::Server;
use actix_web::web;
use log::{error, info};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::signal;

/// Every route the service exposes.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(services::jobs::configure_routes())
        .service(services::jobs::configure_process_route())
        .service(services::health::configure_routes());
}

/// Runs `server` until `stop` resolves, drains the runner, then stops the
/// server gracefully. Returns how many jobs were abandoned.
pub async fn serve<F>(server: Server, runner: JobRunner, grace: Duration, stop: F) -> io::Result<usize>
where
    F: Future<Output = ()>,
{
    let handle = server.handle();
    let mut running = actix_web::rt::spawn(server);

    tokio::select! {
        finished = &mut running => {
            finished.map_err(io::Error::other)??;
            return Ok(runner.shutdown(grace).await);
        }
        _ = stop => {}
    }

    info!("Stop requested, no longer accepting jobs");
    let abandoned = runner.shutdown(grace).await;
    handle.stop(true).await;
    running.await.map_err(io::Error::other)??;
    Ok(abandoned)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ServiceError;
    use crate::job_controller::state::{JobStore, JobsState};
    use crate::pipeline::testing::{FakeTools, PDF_BYTES};
    use crate::pipeline::Pipeline;
    use actix_web::{App, HttpServer};
    use common::jobs::{CreateJobResponse, JobStatus};
    use std::net::TcpListener;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct Running {
        _dir: TempDir,
        runner: JobRunner,
        base: String,
        stop: oneshot::Sender<()>,
        serving: JoinHandle<io::Result<usize>>,
    }

    fn running_server(tools: FakeTools, grace: Duration) -> Running {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.work_dir = dir.path().to_path_buf();
        for sub in [config.uploads_dir(), config.outputs_dir(), config.scratch_dir()] {
            std::fs::create_dir_all(sub).unwrap();
        }

        let tools = Arc::new(tools);
        let pipeline = Pipeline::new(FakeTools::toolchain(&tools), config.scratch_dir());
        let runner = JobRunner::new(JobStore::new(), pipeline, config.outputs_dir(), &config.jobs);
        let state = JobsState::new(runner.clone(), &config);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(routes)
        })
        .workers(1)
        .shutdown_timeout(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = actix_web::rt::spawn(serve(server, runner.clone(), grace, async move {
            let _ = stop_rx.await;
        }));
        Running {
            _dir: dir,
            runner,
            base,
            stop: stop_tx,
            serving,
        }
    }

    async fn submit(base: &str) -> CreateJobResponse {
        let part = reqwest::multipart::Part::bytes(PDF_BYTES.to_vec())
            .file_name("scan.pdf")
            .mime_str("application/pdf")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = reqwest::Client::new()
            .post(format!("{}/jobs", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        resp.json().await.unwrap()
    }

    #[actix_web::test]
    async fn stop_lets_jobs_accepted_by_workers_finish() {
        let srv = running_server(
            FakeTools::with_pages(1).slow(Duration::from_millis(300)),
            Duration::from_secs(5),
        );
        let created = submit(&srv.base).await;

        srv.stop.send(()).unwrap();
        let abandoned = srv.serving.await.unwrap().unwrap();

        assert_eq!(abandoned, 0);
        let job = srv.runner.store().get(created.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.output_location.unwrap().exists());
        assert!(matches!(srv.runner.try_admit(), Err(ServiceError::ShuttingDown)));
    }

    #[actix_web::test]
    async fn stop_reports_jobs_that_outrun_the_grace_period() {
        let srv = running_server(
            FakeTools::with_pages(1).slow(Duration::from_millis(800)),
            Duration::from_millis(50),
        );
        let created = submit(&srv.base).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        srv.stop.send(()).unwrap();
        assert_eq!(srv.serving.await.unwrap().unwrap(), 1);
        let job = srv.runner.store().get(created.job_id).await.unwrap();
        assert!(!job.status.is_terminal());
    }
}
