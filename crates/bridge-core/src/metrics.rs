//! Metrics instrumentation for the bridge.
//!
//! Uses the `metrics` facade; nothing is recorded unless the embedding
//! binary installs a recorder (the daemon exports to Prometheus).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "slobridge_messages_total";
    pub const UNBRIDGED_TOTAL: &str = "slobridge_unbridged_total";
    pub const DELIVERIES_TOTAL: &str = "slobridge_deliveries_total";
    pub const DELIVERY_ERRORS_TOTAL: &str = "slobridge_delivery_errors_total";
    pub const PRESENCE_UPDATES_TOTAL: &str = "slobridge_presence_updates_total";
    pub const SOCKETS_CONNECTED: &str = "slobridge_sockets_connected";
    pub const RECONNECTS_TOTAL: &str = "slobridge_reconnects_total";
}

/// Describe every metric.
pub fn describe() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Messages received on bridged rooms");
    metrics::describe_counter!(
        names::UNBRIDGED_TOTAL,
        "Messages dropped because their room is not bridged"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Relays offered to a socket, by kind and outcome"
    );
    metrics::describe_counter!(
        names::DELIVERY_ERRORS_TOTAL,
        "Relays that could not be delivered"
    );
    metrics::describe_counter!(
        names::PRESENCE_UPDATES_TOTAL,
        "Presence listings pushed into bridged rooms"
    );
    metrics::describe_gauge!(names::SOCKETS_CONNECTED, "Sockets currently connected");
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Reconnection attempts");
}

/// Record an inbound message on a route.
pub fn record_message(route: &str) {
    counter!(names::MESSAGES_TOTAL, "route" => route.to_string()).increment(1);
}

/// Record a message from a room that belongs to no route.
pub fn record_unbridged() {
    counter!(names::UNBRIDGED_TOTAL).increment(1);
}

/// Record a relay offered to a socket.
///
/// `outcome` is `queued` when the socket took it, `rejected` otherwise.
pub fn record_delivery(kind: &'static str, outcome: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a failed relay.
pub fn record_delivery_error(code: &'static str) {
    counter!(names::DELIVERY_ERRORS_TOTAL, "code" => code).increment(1);
}

/// Record a presence listing push.
pub fn record_presence_update(route: &str) {
    counter!(names::PRESENCE_UPDATES_TOTAL, "route" => route.to_string()).increment(1);
}

/// Update the connected socket count.
pub fn set_sockets_connected(count: usize) {
    gauge!(names::SOCKETS_CONNECTED).set(count as f64);
}

/// Record a reconnection attempt.
pub fn record_reconnect(socket: &str) {
    counter!(names::RECONNECTS_TOTAL, "socket" => socket.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::Mutex;

    #[derive(Default)]
    struct KeyCapture(Mutex<Vec<Key>>);

    impl Recorder for KeyCapture {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            self.0.lock().unwrap().push(key.clone());
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_delivery_labels() {
        let recorder = KeyCapture::default();
        metrics::with_local_recorder(&recorder, || {
            record_delivery("message", "queued");
            record_delivery("presence", "rejected");
        });

        let keys = recorder.0.lock().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.name() == names::DELIVERIES_TOTAL));
        let labels: Vec<Vec<(&str, &str)>> = keys
            .iter()
            .map(|k| k.labels().map(|l| (l.key(), l.value())).collect())
            .collect();
        assert_eq!(
            labels,
            vec![
                vec![("kind", "message"), ("outcome", "queued")],
                vec![("kind", "presence"), ("outcome", "rejected")],
            ]
        );
    }
}
