//! Fan-out 指标记录模块
//!
//! 分发循环与保留压缩器通过这些函数上报 Prometheus 指标。
//! 未安装 recorder 时全部为 no-op。

use metrics::{counter, gauge, histogram};

/// 投递结果标签
pub const DELIVERY_STATUSES: [&str; 4] = ["delivered", "failed", "timeout", "persist_error"];

/// 记录一次投递尝试的结果
///
/// `status` 取值见 [`DELIVERY_STATUSES`]。
pub fn record_delivery(sink: &str, status: &'static str) {
    counter!(
        "fanout_deliveries_total",
        "sink" => sink.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录本轮选出的待投递记录数
pub fn record_pending_records(count: usize) {
    gauge!("fanout_pending_records").set(count as f64);
}

/// 记录一次轮询耗时
pub fn record_poll_duration_ms(duration_ms: f64) {
    histogram!("fanout_poll_duration_ms").record(duration_ms);
}

/// 记录活跃 sink 数量
pub fn record_active_sinks(count: usize) {
    gauge!("fanout_active_sinks").set(count as f64);
}

/// 记录被排除的 sink (未知类型 / 配置错误 / 非法标志位)
pub fn record_sink_rejected(instance_id: &str) {
    counter!(
        "fanout_sinks_rejected_total",
        "sink" => instance_id.to_string()
    )
    .increment(1);
}

/// 记录归档的记录数
pub fn record_records_archived(count: usize) {
    if count > 0 {
        counter!("fanout_records_archived_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_are_noop_without_exporter() {
        for status in DELIVERY_STATUSES {
            record_delivery("cache-primary", status);
        }
        record_pending_records(3);
        record_poll_duration_ms(1.5);
        record_active_sinks(2);
        record_sink_rejected("mystery");
        record_records_archived(0);
        record_records_archived(5);
    }
}
