//! Command channel: request-reply over length-delimited MessagePack
//! frames.
//!
//! Each connection is strict one-request-one-response turn-taking. A
//! malformed payload gets an `Error` response; it never breaks the
//! accept loop or the connection.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use spriteforge_core::{JobSpec, JobStatus};
use spriteforge_protocol::{codec, Request, Response, PROTOCOL_VERSION};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry;
use crate::state::ServerState;

/// Accept command connections until shutdown.
pub async fn run_command_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "command connection accepted");
                    tokio::spawn(handle_connection(stream, Arc::clone(&state), shutdown.clone()));
                }
                Err(err) => error!(error = %err, "command accept failed"),
            },
        }
    }
    info!("command loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = framed.next() => frame,
        };
        let bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                warn!(error = %err, "command frame error");
                break;
            }
            None => break,
        };

        let response = match codec::decode_request(&bytes) {
            Ok(request) => handle_request(&state, request).await,
            Err(err) => {
                warn!(error = %err, "malformed command payload");
                Response::Error {
                    message: err.to_string(),
                }
            }
        };

        let encoded = match codec::encode(&response) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(error = %err, "failed to encode response");
                break;
            }
        };
        if let Err(err) = framed.send(encoded.into()).await {
            warn!(error = %err, "failed to send response");
            break;
        }
    }
}

/// Dispatch one decoded request. Never blocks on job execution.
pub async fn handle_request(state: &ServerState, request: Request) -> Response {
    match request {
        Request::Generate {
            id,
            prompt,
            model,
            size,
            steps,
            cfg_scale,
            lora,
        } => {
            let spec = JobSpec {
                id: Some(id.clone()),
                prompt,
                model,
                size,
                steps,
                cfg_scale,
                lora,
            };
            if let Err(err) = spec.validate() {
                return Response::JobError {
                    job_id: id,
                    error: err.to_string(),
                };
            }

            let mut queue = state.queue.lock().await;
            let estimated_time_s = queue.estimate_time(steps);
            let job = queue.add(spec);
            info!(job_id = %job.id, "job accepted");
            Response::JobAccepted {
                job_id: job.id,
                estimated_time_s,
            }
        }

        Request::Cancel { job_id } => {
            let mut queue = state.queue.lock().await;
            match queue.get(&job_id).map(|j| j.status) {
                Some(JobStatus::Queued) => {
                    queue.cancel(&job_id);
                    info!(job_id = %job_id, "queued job cancelled");
                    Response::JobCancelled { job_id }
                }
                Some(JobStatus::Running) => {
                    // The worker observes the flag at its next poll tick
                    // and settles the terminal state itself.
                    state.request_cancel(&job_id);
                    info!(job_id = %job_id, "cancellation requested for running job");
                    Response::JobCancelled { job_id }
                }
                _ => Response::JobError {
                    job_id,
                    error: "job not found or already finished".into(),
                },
            }
        }

        Request::ListModels => {
            let models = registry::scan_models(&state.config.model_dir);
            debug!(count = models.len(), "model registry scanned");
            Response::ModelList { models }
        }

        Request::Status => {
            let queue = state.queue.lock().await;
            Response::StatusInfo {
                version: PROTOCOL_VERSION.to_string(),
                queue_size: queue.queue_size(),
                active_jobs: queue.active_jobs(),
                uptime_s: state.uptime_secs(),
            }
        }

        Request::Ping => Response::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;
    use assert_matches::assert_matches;

    fn state() -> ServerState {
        let dir = tempfile::tempdir().unwrap();
        ServerState::new(test_config(dir.path()))
    }

    fn generate(id: &str, steps: u32) -> Request {
        Request::Generate {
            id: id.into(),
            prompt: "pixel art slime".into(),
            model: "sdxl.safetensors".into(),
            size: (512, 512),
            steps,
            cfg_scale: 7.0,
            lora: None,
        }
    }

    #[tokio::test]
    async fn generate_enqueues_and_returns_estimate() {
        let state = state();
        let response = handle_request(&state, generate("j1", 20)).await;

        assert_matches!(
            response,
            Response::JobAccepted { job_id, estimated_time_s }
                if job_id == "j1" && (estimated_time_s - 2.0).abs() < f64::EPSILON
        );
        assert_eq!(state.queue.lock().await.queue_size(), 1);
    }

    #[tokio::test]
    async fn generate_with_invalid_steps_is_rejected() {
        let state = state();
        let response = handle_request(&state, generate("j1", 0)).await;

        assert_matches!(response, Response::JobError { job_id, .. } if job_id == "j1");
        assert_eq!(state.queue.lock().await.queue_size(), 0);
    }

    #[tokio::test]
    async fn cancel_queued_job_succeeds_synchronously() {
        let state = state();
        handle_request(&state, generate("j1", 10)).await;

        let response = handle_request(
            &state,
            Request::Cancel {
                job_id: "j1".into(),
            },
        )
        .await;

        assert_matches!(response, Response::JobCancelled { job_id } if job_id == "j1");
        assert!(state.queue.lock().await.next().is_none());
    }

    #[tokio::test]
    async fn cancel_running_job_sets_the_flag() {
        let state = state();
        handle_request(&state, generate("j1", 10)).await;
        state.queue.lock().await.next();

        let response = handle_request(
            &state,
            Request::Cancel {
                job_id: "j1".into(),
            },
        )
        .await;

        assert_matches!(response, Response::JobCancelled { .. });
        assert!(state.cancel_requested("j1"));
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_an_error() {
        let state = state();
        let response = handle_request(
            &state,
            Request::Cancel {
                job_id: "ghost".into(),
            },
        )
        .await;
        assert_matches!(response, Response::JobError { .. });
    }

    #[tokio::test]
    async fn status_reports_queue_depth_and_version() {
        let state = state();
        handle_request(&state, generate("j1", 10)).await;
        handle_request(&state, generate("j2", 10)).await;
        state.queue.lock().await.next();

        let response = handle_request(&state, Request::Status).await;
        assert_matches!(
            response,
            Response::StatusInfo { version, queue_size: 1, active_jobs: 1, .. }
                if version == PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn list_models_with_missing_directory_is_empty() {
        let state = state();
        let response = handle_request(&state, Request::ListModels).await;
        assert_matches!(response, Response::ModelList { models } if models.is_empty());
    }

    #[tokio::test]
    async fn ping_pongs() {
        let state = state();
        assert_matches!(handle_request(&state, Request::Ping).await, Response::Pong);
    }
}
