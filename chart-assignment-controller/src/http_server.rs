use std::{fmt::Display, net::SocketAddr, sync::Arc};

use chart_assignment_apis::ChartAssignment;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, Response, StatusCode,
    body::{Body, Bytes},
    header::CONTENT_TYPE,
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use kube::core::admission::AdmissionReview;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::admission::AssignmentValidator;

struct ServerState {
    registry: Registry,
    validator: AssignmentValidator,
}

fn text(status: StatusCode, body: &'static str) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
}

fn metrics(registry: &Registry) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut result = Vec::new();
    match encoder.encode(&metric_families, &mut result) {
        Ok(_) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, encoder.format_type())
            .body(Full::new(Bytes::from(result))),
        Err(e) => {
            error!("{}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}

async fn validate<B>(
    req: Request<B>,
    validator: &AssignmentValidator,
) -> Result<Response<Full<Bytes>>, hyper::http::Error>
where
    B: Body,
    B::Error: Display,
{
    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => {
            warn!("failed to read admission request: {}", e);
            return text(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };
    let review: AdmissionReview<ChartAssignment> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!("failed to decode AdmissionReview: {}", e);
            return text(StatusCode::BAD_REQUEST, "invalid AdmissionReview");
        }
    };
    match serde_json::to_vec(&validator.review(review)) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body))),
        Err(e) => {
            error!("failed to encode AdmissionReview: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}

async fn serve_req<B>(
    req: Request<B>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error>
where
    B: Body,
    B::Error: Display,
{
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => metrics(&state.registry),
        (&Method::GET, "/healthz") => text(StatusCode::OK, "ok"),
        (&Method::POST, "/validate") => validate(req, &state.validator).await,
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Serves Prometheus metrics, the health check and the ChartAssignment
/// admission webhook on `addr`.
pub(crate) async fn start_http_server(
    addr: SocketAddr,
    registry: Registry,
    validator: AssignmentValidator,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    let state = Arc::new(ServerState {
        registry,
        validator,
    });
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| serve_req(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("http connection failed: {}", e);
            }
        });
    }
}
