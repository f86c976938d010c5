use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family, histogram::Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct RequestLabels {
    pub method: String,
    pub endpoint: String,
    pub status: String,
}

/// Request counters/duration histogram for the Storm REST client, registered
/// on the operator's shared `prometheus_client::Registry` alongside the
/// reconciliation metrics.
#[derive(Clone)]
pub struct ApiMetrics {
    requests_total: Family<RequestLabels, Counter>,
    request_duration: Family<EndpointLabel, Histogram>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct EndpointLabel {
    pub endpoint: String,
}

impl ApiMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration = Family::<EndpointLabel, Histogram>::new_with_constructor(|| {
            Histogram::new([0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10.].into_iter())
        });
        registry.register(
            "storm_api_requests",
            "Total Storm REST API requests by method, endpoint and status",
            requests_total.clone(),
        );
        registry.register(
            "storm_api_request_duration_seconds",
            "Storm REST API request duration",
            request_duration.clone(),
        );
        Self {
            requests_total,
            request_duration,
        }
    }

    pub fn observe(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        self.requests_total
            .get_or_create(&RequestLabels {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                status: status.to_string(),
            })
            .inc();
        self.request_duration
            .get_or_create(&EndpointLabel {
                endpoint: endpoint.to_string(),
            })
            .observe(duration_secs);
    }
}
