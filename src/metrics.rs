//! prometheus meters shared by the http boundary and the forwarder
use axum::http::StatusCode;
use prometheus::{histogram_opts, opts, Histogram, HistogramTimer, IntCounterVec, Registry};

/// prometheus meters for the forwarding pipeline
///
/// constructed once at startup against the process-wide [Registry] and shared
/// by reference with everything that records
#[derive(Debug)]
pub struct Metrics {
    /// duration of end-to-end forward calls
    pub(crate) http_duration: Histogram,
    /// total number of http requests, by response code
    pub(crate) http_requests: IntCounterVec,
    /// total number of publish attempts to the broker, by result
    pub(crate) broker_requests: IntCounterVec,
}

impl Metrics {
    /// construct and register the prometheus meters
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let http_duration = Histogram::with_opts(
            histogram_opts!(
                "http_response_time_seconds",
                "duration of forwarded webhook requests"
            )
            .namespace("stomp_forwarder"),
        )?;

        let http_requests = IntCounterVec::new(
            opts!("http_requests_total", "total number of http requests")
                .namespace("stomp_forwarder"),
            &["response_code"],
        )?;

        let broker_requests = IntCounterVec::new(
            opts!(
                "broker_requests_total",
                "total number of publish attempts to the broker"
            )
            .namespace("stomp_forwarder"),
            &["result"],
        )?;

        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(broker_requests.clone()))?;

        Ok(Self {
            http_duration,
            http_requests,
            broker_requests,
        })
    }

    /// times one end-to-end forward call, observed when the returned timer is
    /// dropped
    pub fn forward_timer(&self) -> HistogramTimer {
        self.http_duration.start_timer()
    }

    /// counts one finished http request
    pub fn record_http_response(&self, status: StatusCode) {
        self.http_requests.with_label_values(&[status.as_str()]).inc();
    }

    /// counts one successfully published alert
    pub fn record_publish_success(&self) {
        self.broker_requests.with_label_values(&["ok"]).inc();
    }

    /// counts one failed publish attempt
    pub fn record_publish_failure(&self) {
        self.broker_requests.with_label_values(&["not_ok"]).inc();
    }
}
