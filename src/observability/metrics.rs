use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_created_total: IntCounter,
    pub booking_transitions_total: IntCounterVec,
    pub route_fetches_total: IntCounterVec,
    pub workers_online: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_created_total =
            IntCounter::new("bookings_created_total", "Total bookings created")
                .expect("valid bookings_created_total metric");

        let booking_transitions_total = IntCounterVec::new(
            Opts::new(
                "booking_transitions_total",
                "Booking lifecycle transitions by outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid booking_transitions_total metric");

        let route_fetches_total = IntCounterVec::new(
            Opts::new("route_fetches_total", "Route fetches by resolution source"),
            &["source"],
        )
        .expect("valid route_fetches_total metric");

        let workers_online = IntGauge::new("workers_online", "Workers currently online")
            .expect("valid workers_online metric");

        registry
            .register(Box::new(bookings_created_total.clone()))
            .expect("register bookings_created_total");
        registry
            .register(Box::new(booking_transitions_total.clone()))
            .expect("register booking_transitions_total");
        registry
            .register(Box::new(route_fetches_total.clone()))
            .expect("register route_fetches_total");
        registry
            .register(Box::new(workers_online.clone()))
            .expect("register workers_online");

        Self {
            registry,
            bookings_created_total,
            booking_transitions_total,
            route_fetches_total,
            workers_online,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
