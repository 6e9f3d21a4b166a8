use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge_vec,
};
use std::sync::OnceLock;

const METRIC_PREFIX: &str = "edi_sync";

/// Metrics 注册结果，可能包含注册错误
type MetricRegistration<T> = Result<T, prometheus::Error>;

fn cycles_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(format!("{METRIC_PREFIX}_cycles_total"), "同步周期总数"),
            &["trigger"]
        )
    })
}

fn cycle_duration_seconds() -> &'static MetricRegistration<Histogram> {
    static METRIC: OnceLock<MetricRegistration<Histogram>> = OnceLock::new();
    METRIC.get_or_init(|| {
        let opts = HistogramOpts::new(
            format!("{METRIC_PREFIX}_cycle_duration_seconds"),
            "同步周期耗时（秒）",
        );
        register_histogram!(opts)
    })
}

fn files_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_files_total"),
                "入站文件处理结果总数（archived/failed/skipped）"
            ),
            &["kind", "result"]
        )
    })
}

fn gateway_linked() -> &'static MetricRegistration<IntGaugeVec> {
    static METRIC: OnceLock<MetricRegistration<IntGaugeVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_gateway_linked"),
                "网关链路状态（1=LINKED，0=UNLINKED）"
            ),
            &["facility", "kind"]
        )
    })
}

fn gateway_failures_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_gateway_failures_total"),
                "网关同步失败总数"
            ),
            &["reason"]
        )
    })
}

fn signals_dropped_total() -> &'static MetricRegistration<IntCounter> {
    static METRIC: OnceLock<MetricRegistration<IntCounter>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter!(
            format!("{METRIC_PREFIX}_signals_dropped_total"),
            "信号队列已满时丢弃的最旧信号数"
        )
    })
}

fn exports_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(format!("{METRIC_PREFIX}_exports_total"), "出站文件导出总数"),
            &["result"]
        )
    })
}

pub fn observe_cycle(trigger: &str, seconds: f64) {
    if let Ok(counter) = cycles_total() {
        counter.with_label_values(&[trigger]).inc();
    }
    if let Ok(histogram) = cycle_duration_seconds() {
        histogram.observe(seconds);
    }
}

pub fn inc_file(kind: &str, result: &str) {
    if let Ok(counter) = files_total() {
        counter.with_label_values(&[kind, result]).inc();
    }
}

pub fn set_gateway_linked(facility: &str, kind: &str, linked: bool) {
    if let Ok(gauge) = gateway_linked() {
        gauge
            .with_label_values(&[facility, kind])
            .set(if linked { 1 } else { 0 });
    }
}

pub fn inc_gateway_failure(reason: &str) {
    if let Ok(counter) = gateway_failures_total() {
        counter.with_label_values(&[reason]).inc();
    }
}

pub fn inc_signal_dropped() {
    if let Ok(counter) = signals_dropped_total() {
        counter.inc();
    }
}

pub fn inc_export(result: &str) {
    if let Ok(counter) = exports_total() {
        counter.with_label_values(&[result]).inc();
    }
}
