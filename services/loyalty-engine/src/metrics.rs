use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // Order admission
    pub static ref ORDERS_UPLOADED: IntCounterVec = register_int_counter_vec!(
        "loyalty_orders_uploaded_total",
        "Order uploads by outcome",
        &["outcome"]
    ).expect("metric can be created");

    // Ledger
    pub static ref WITHDRAWALS: IntCounterVec = register_int_counter_vec!(
        "loyalty_withdrawals_total",
        "Withdrawal attempts by outcome",
        &["outcome"]
    ).expect("metric can be created");

    pub static ref ORDERS_RECONCILED: IntCounter = register_int_counter!(
        "loyalty_orders_reconciled_total",
        "Order status updates written from accrual responses"
    ).expect("metric can be created");

    // Accrual service
    pub static ref ACCRUAL_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "loyalty_accrual_requests_total",
        "Accrual service requests by outcome",
        &["outcome"]
    ).expect("metric can be created");
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
