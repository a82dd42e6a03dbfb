//! Streaming relay of upstream response bodies.
//!
//! # Responsibilities
//! - Relay response frames to the caller as they arrive, in order
//! - Keep the per-request deadline running while the body streams
//! - Hold the upstream connection slot until the body is done or dropped
//! - Report the outcome exactly once: complete, failed, or cancelled
//! - Bound the request body upload by the same deadline, which may still be
//!   running after response headers arrived
//!
//! # Design Decisions
//! - Once headers are out, a failure cannot become an error response; the
//!   body yields an error so hyper aborts the caller's connection rather
//!   than appending anything to the partial response
//! - A body dropped before its end means the caller left; that is reported
//!   as `ClientCancelled` and does not count against the upstream

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::time::{Instant, Sleep};

use crate::error::GatewayError;
use crate::health::passive::{is_failure_status, HealthPolicy};
use crate::hooks::{ForwardFailure, ForwardResult, Hooks};
use crate::load_balancer::{ConnectionSlot, UpstreamAddr, UpstreamTarget};
use crate::resilience::Deadline;

/// Carries what is needed to report one forwarding outcome.
///
/// Every reporting method consumes the tracker, so an outcome is reported
/// at most once. A tracker dropped unreported means the caller went away
/// before the response started.
pub(crate) struct ForwardTracker {
    hooks: Arc<Hooks>,
    health: HealthPolicy,
    target: Arc<UpstreamTarget>,
    request_id: Arc<str>,
    route_id: Arc<str>,
    started: Instant,
    status: Option<StatusCode>,
    reported: bool,
}

impl ForwardTracker {
    pub(crate) fn new(
        hooks: Arc<Hooks>,
        health: HealthPolicy,
        target: Arc<UpstreamTarget>,
        request_id: Arc<str>,
        route_id: Arc<str>,
        started: Instant,
    ) -> Self {
        Self {
            hooks,
            health,
            target,
            request_id,
            route_id,
            started,
            status: None,
            reported: false,
        }
    }

    /// Record the upstream's response status.
    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub(crate) fn complete(mut self, bytes_streamed: u64) {
        self.reported = true;
        let status = self.status.unwrap_or(StatusCode::OK);
        if !is_failure_status(status) {
            self.target.report_success();
        }

        let result = ForwardResult {
            request_id: Arc::clone(&self.request_id),
            route_id: Arc::clone(&self.route_id),
            status_code: status,
            bytes_streamed,
            upstream_used: self.target.addr().clone(),
            duration: self.started.elapsed(),
        };
        tracing::debug!(
            request_id = %result.request_id,
            route = %result.route_id,
            upstream = %result.upstream_used,
            status = result.status_code.as_u16(),
            bytes = bytes_streamed,
            "Forward complete"
        );
        self.hooks.forward_complete(&result);
    }

    pub(crate) fn fail(mut self, error: GatewayError, bytes_streamed: u64, response_started: bool) {
        self.report_failure(error, bytes_streamed, response_started);
    }

    fn report_failure(&mut self, error: GatewayError, bytes_streamed: u64, response_started: bool) {
        self.reported = true;
        if error.counts_against_upstream() && self.target.report_failure(&self.health) {
            tracing::warn!(
                upstream = %self.target.addr(),
                cooldown_ms = self.health.cooldown.as_millis() as u64,
                "Upstream marked unhealthy"
            );
        }

        let failure = ForwardFailure {
            request_id: Arc::clone(&self.request_id),
            route_id: Some(Arc::clone(&self.route_id)),
            upstream: Some(self.target.addr().clone()),
            error,
            response_started,
            bytes_streamed,
            duration: self.started.elapsed(),
        };
        self.hooks.forward_error(&failure);
    }
}

impl Drop for ForwardTracker {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        let upstream = self.target.addr().to_string();
        tracing::debug!(
            request_id = %self.request_id,
            upstream = %upstream,
            "Client went away before the response started"
        );
        self.report_failure(GatewayError::ClientCancelled { upstream }, 0, false);
    }
}

/// Response body relayed from an upstream.
pub(crate) struct ObservedBody {
    inner: Body,
    deadline: Deadline,
    timer: Pin<Box<Sleep>>,
    tracker: Option<ForwardTracker>,
    bytes: u64,
    _slot: ConnectionSlot,
}

impl ObservedBody {
    pub(crate) fn new(inner: Body, deadline: Deadline, tracker: ForwardTracker, slot: ConnectionSlot) -> Self {
        Self {
            inner,
            timer: Box::pin(deadline.sleep()),
            deadline,
            tracker: Some(tracker),
            bytes: 0,
            _slot: slot,
        }
    }

    fn fail(&mut self, error: GatewayError) -> axum::Error {
        let err = axum::Error::new(error.clone());
        if let Some(tracker) = self.tracker.take() {
            tracing::warn!(
                request_id = %tracker.request_id,
                upstream = %tracker.target.addr(),
                bytes = self.bytes,
                error = %error,
                "Response already started, aborting client connection"
            );
            tracker.fail(error, self.bytes, true);
        }
        err
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        if this.tracker.is_none() {
            return Poll::Ready(None);
        }

        if this.timer.as_mut().poll(cx).is_ready() {
            let upstream = match &this.tracker {
                Some(tracker) => tracker.target.addr().clone(),
                None => return Poll::Ready(None),
            };
            let error = this.deadline.elapsed(&upstream);
            return Poll::Ready(Some(Err(this.fail(error))));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
                // hyper stops polling once a known length is written
                if this.inner.is_end_stream() {
                    if let Some(tracker) = this.tracker.take() {
                        tracker.complete(this.bytes);
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let upstream = this
                    .tracker
                    .as_ref()
                    .map(|t| t.target.addr().to_string())
                    .unwrap_or_default();
                let reason = crate::error::error_chain(&e);
                Poll::Ready(Some(Err(this.fail(GatewayError::StreamingError { upstream, reason }))))
            }
            Poll::Ready(None) => {
                if let Some(tracker) = this.tracker.take() {
                    tracker.complete(this.bytes);
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.tracker.is_none() || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            if self.inner.is_end_stream() {
                tracker.complete(self.bytes);
                return;
            }
            let upstream = tracker.target.addr().to_string();
            tracing::debug!(
                request_id = %tracker.request_id,
                upstream = %upstream,
                bytes = self.bytes,
                "Client went away mid-response"
            );
            tracker.fail(GatewayError::ClientCancelled { upstream }, self.bytes, true);
        }
    }
}

/// Request body sent upstream, cut off when the deadline elapses.
///
/// hyper keeps uploading after the response head arrived; the error makes
/// it abandon that connection instead of writing past the deadline.
pub(crate) struct DeadlineBody {
    inner: Body,
    deadline: Deadline,
    timer: Pin<Box<Sleep>>,
    upstream: UpstreamAddr,
}

impl DeadlineBody {
    pub(crate) fn new(inner: Body, deadline: Deadline, upstream: UpstreamAddr) -> Self {
        Self {
            inner,
            timer: Box::pin(deadline.sleep()),
            deadline,
            upstream,
        }
    }
}

impl HttpBody for DeadlineBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        if this.inner.is_end_stream() {
            return Poll::Ready(None);
        }
        if this.timer.as_mut().poll(cx).is_ready() {
            tracing::debug!(upstream = %this.upstream, "Deadline elapsed while uploading the request body");
            return Poll::Ready(Some(Err(axum::Error::new(this.deadline.elapsed(&this.upstream)))));
        }
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
