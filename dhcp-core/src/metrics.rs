#![allow(missing_docs)] // proc macros don't play nicely with docstrings

//! # metrics
//!
//! Process-wide Prometheus collectors, registered once at first use.

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGauge, register_gauge_vec,
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum MsgType {
        discover,
        request,
        release,
        offer,
        ack,
        nak,
        inform,
        unknown,
    }
    pub struct RecvStats: IntCounter {
        "message_type" => MsgType
    }
    pub struct SentStats: IntCounter {
        "message_type" => MsgType
    }
}

lazy_static! {
    /// when the server started, used to derive uptime
    pub static ref START_TIME: Instant = Instant::now();

    pub static ref RECV_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "dhcp_recv_type_counts",
        "count of received packets by DHCP message type",
        &["message_type"]
    )
    .unwrap();
    pub static ref SENT_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "dhcp_sent_type_counts",
        "count of sent packets by DHCP message type",
        &["message_type"]
    )
    .unwrap();

    /// aggregate count of all recv'd message types
    pub static ref RECV_TYPE_COUNT: RecvStats = RecvStats::from(&RECV_COUNT_VEC);
    /// aggregate count of all sent message types
    pub static ref SENT_TYPE_COUNT: SentStats = SentStats::from(&SENT_COUNT_VEC);

    /// histogram of handler transaction durations, labelled by message type
    pub static ref HANDLER_DURATION: HistogramVec = register_histogram_vec!(
        "dhcp_handler_duration_seconds",
        "time spent inside the handler per transaction",
        &["type"]
    )
    .unwrap();

    /// count of currently in-flight transactions
    pub static ref IN_FLIGHT: IntGauge =
        register_int_gauge!("dhcp_in_flight", "count of currently processing transactions").unwrap();

    /// count of total addresses available across all pools
    pub static ref TOTAL_AVAILABLE_ADDRS: IntGauge = register_int_gauge!(
        "dhcp_total_available_addrs",
        "count of total addresses available across configured pools"
    )
    .unwrap();

    /// server uptime in seconds
    pub static ref UPTIME: IntGauge = register_int_gauge!("dhcp_uptime", "server uptime (seconds)").unwrap();

    /// seconds until each active lease expires, labelled by its fields
    pub static ref LEASE_EXPIRATION: GaugeVec = register_gauge_vec!(
        "lease_expiration",
        "seconds remaining until a lease's expiry (ends - now)",
        &["ip", "mac", "pool", "hostname"]
    )
    .unwrap();

    /// count of times allocation failed with no free address in any candidate pool
    pub static ref ALLOCATION_EXHAUSTED: IntCounter = register_int_counter!(
        "dhcp_allocation_exhausted_total",
        "count of DISCOVER/REQUEST packets dropped for lack of a free address"
    )
    .unwrap();
}
