use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use edi_common::models::{GatewayKind, LinkState};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder,
    register_histogram_vec, register_int_counter_vec,
};
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;

const METRIC_PREFIX: &str = "edi_control";

/// Metrics 注册结果，可能包含注册错误
type MetricRegistration<T> = Result<T, prometheus::Error>;

fn http_requests_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_http_requests_total"),
                "运维接口 HTTP 请求总数"
            ),
            &["method", "path", "status"]
        )
    })
}

fn http_request_duration_seconds() -> &'static MetricRegistration<HistogramVec> {
    static METRIC: OnceLock<MetricRegistration<HistogramVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        let opts = HistogramOpts::new(
            format!("{METRIC_PREFIX}_http_request_duration_seconds"),
            "运维接口 HTTP 请求耗时（秒）",
        );
        register_histogram_vec!(opts, &["method", "path"])
    })
}

fn gateway_updates_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_gateway_updates_total"),
                "网关配置更新次数，按类型和探测结果"
            ),
            &["kind", "link_state"]
        )
    })
}

fn export_records_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_export_records_total"),
                "排队导出的作业指令条数"
            ),
            &["kind"]
        )
    })
}

pub fn record_gateway_update(kind: GatewayKind, link_state: LinkState) {
    let link_state = match link_state {
        LinkState::Linked => "linked",
        LinkState::Unlinked => "unlinked",
    };
    if let Ok(counter) = gateway_updates_total() {
        counter
            .with_label_values(&[kind.as_str(), link_state])
            .inc();
    }
}

pub fn record_export(kind: GatewayKind, records: usize) {
    if let Ok(counter) = export_records_total() {
        counter
            .with_label_values(&[kind.as_str()])
            .inc_by(records as u64);
    }
}

const MAX_LABEL_SEGMENTS: usize = 5;

/// 未匹配路由的标签：设施 ID 和网关类型折叠为模板段，避免标签基数失控
fn route_label(path: &str) -> String {
    if !path.starts_with("/api/") {
        return "<unmatched>".to_string();
    }
    let mut label = String::new();
    for (index, segment) in path.split('/').filter(|s| !s.is_empty()).enumerate() {
        if index == MAX_LABEL_SEGMENTS {
            label.push_str("/*");
            break;
        }
        let segment = if Uuid::parse_str(segment).is_ok() {
            "{facility_id}"
        } else if GatewayKind::parse(segment).is_some() {
            "{kind}"
        } else if segment.len() <= 32
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            segment
        } else {
            "*"
        };
        label.push('/');
        label.push_str(segment);
    }
    label
}

pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => route_label(req.uri().path()),
    };

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    if let Ok(counter) = http_requests_total() {
        counter.with_label_values(&[&method, &path, &status]).inc();
    }
    if let Ok(histogram) = http_request_duration_seconds() {
        histogram
            .with_label_values(&[&method, &path])
            .observe(elapsed);
    }

    response
}

pub fn render_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(encoder.format_type())
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain; version=0.0.4")),
            );
            resp
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Metrics encoding failed",
            )
                .into_response()
        }
    }
}
