use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    body::{Body, Bytes},
    extract::MatchedPath,
    response::Response,
};
use futures_util::future::BoxFuture;
use http::{Method, Request, StatusCode};
use http_body::{Body as _, Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, MetricRegistry, Observation};

/// Route label used when no route matched the request.
pub const UNKNOWN_ROUTE: &str = "unknown_route";

/// Per-request timing state, created when the request enters the layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    route: String,
    start: Instant,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| UNKNOWN_ROUTE.to_string());
        Self {
            method: req.method().clone(),
            route,
            start: Instant::now(),
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Map the finished request to its duration and counter observations.
    ///
    /// `None` means the inner service failed without producing a response and
    /// is labelled as a 500.
    pub fn finish(&self, status: Option<StatusCode>) -> (Observation, Observation) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let labels = vec![self.method.to_string(), self.route.clone(), status.as_u16().to_string()];
        (
            Observation::new(HTTP_REQUEST_DURATION_SECONDS, labels.clone(), elapsed),
            Observation::new(HTTP_REQUESTS_TOTAL, labels, 1.0),
        )
    }
}

/// Records `http_request_duration_seconds` and `http_requests_total` for every request.
///
/// The duration runs until the response body has been sent in full (or
/// dropped), so streamed bodies are timed end to end. Metrics are best effort: a rejected observation is logged and the response
/// passes through untouched.
#[derive(Clone)]
pub struct RequestTimingLayer {
    registry: Arc<MetricRegistry>,
}

impl RequestTimingLayer {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for RequestTimingLayer {
    type Service = RequestTimingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTimingService {
            inner,
            registry: self.registry.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestTimingService<S> {
    inner: S,
    registry: Arc<MetricRegistry>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RequestTimingService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let ctx = RequestContext::from_request(&request);
        let future = self.inner.call(request);
        let registry = self.registry.clone();

        Box::pin(async move {
            match future.await {
                Ok(res) => {
                    let recorder = Recorder {
                        ctx,
                        status: Some(res.status()),
                        registry,
                    };
                    Ok(res.map(|inner| {
                        Body::new(TimedBody {
                            inner,
                            recorder: Some(recorder),
                        })
                    }))
                }
                Err(e) => {
                    drop(Recorder { ctx, status: None, registry });
                    Err(e)
                }
            }
        })
    }
}

/// Writes the request's observations when dropped.
struct Recorder {
    ctx: RequestContext,
    status: Option<StatusCode>,
    registry: Arc<MetricRegistry>,
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let (duration, count) = self.ctx.finish(self.status);
        for observation in [duration, count] {
            if let Err(e) = self.registry.record(&observation) {
                log::warn!("dropped request metric: {e}");
            }
        }
    }
}

pin_project! {
    /// Response body that records its request once the last frame is out.
    struct TimedBody {
        #[pin]
        inner: Body,
        recorder: Option<Recorder>,
    }
}

impl http_body::Body for TimedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.project();
        let frame = this.inner.poll_frame(cx);
        if matches!(frame, Poll::Ready(None | Some(Err(_)))) {
            this.recorder.take();
        }
        frame
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
