/// Naming for a derived quantity across the protocol and the metrics registry.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub unit: &'static str,
}

pub const INPUT_POWER_W: Tag = Tag {
    key: "input_power_w",
    metric: "shutdown_rig_input_power_watts",
    unit: "W",
};

pub const OUTPUT_POWER_W: Tag = Tag {
    key: "output_power_w",
    metric: "shutdown_rig_output_power_watts",
    unit: "W",
};

pub const EFFICIENCY_PERCENT: Tag = Tag {
    key: "efficiency_percent",
    metric: "shutdown_rig_efficiency_percent",
    unit: "%",
};

pub const SHUTDOWN_LATENCY_MS: Tag = Tag {
    key: "shutdown_latency_ms",
    metric: "shutdown_rig_shutdown_latency_milliseconds",
    unit: "ms",
};

pub const POWER_LOSS_W: Tag = Tag {
    key: "power_loss_w",
    metric: "shutdown_rig_power_loss_watts",
    unit: "W",
};

pub const PHASE: Tag = Tag {
    key: "phase",
    metric: "shutdown_rig_phase",
    unit: "",
};

pub const POWER_TAGS: &[Tag] = &[INPUT_POWER_W, OUTPUT_POWER_W, EFFICIENCY_PERCENT];
