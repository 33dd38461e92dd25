use shutdown_core::SimulationParameters;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub scenario: bool,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub record_store: Option<PathBuf>,
    pub shutdown_delay_ms: u64,
    pub persist_timeout_ms: u64,
    pub seed: Option<u64>,
    /// Unvalidated; checked once at startup.
    pub params: SimulationParameters,
    /// Flags whose value could not be parsed, as `--flag value`.
    pub rejected: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            scenario: false,
            run_seconds: None,
            bind_addr: "127.0.0.1:7100".to_string(),
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            record_store: None,
            shutdown_delay_ms: 1000,
            persist_timeout_ms: 5000,
            seed: None,
            params: SimulationParameters::default(),
            rejected: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--scenario" => {
                    cfg.scenario = true;
                }
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        cfg.bind_addr = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if i + 1 < args.len() {
                        cfg.log_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--record-store" => {
                    if i + 1 < args.len() {
                        cfg.record_store = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--shutdown-delay-ms" => {
                    if i + 1 < args.len() {
                        match parse_millis(&args[i], &args[i + 1]) {
                            Ok(ms) => cfg.shutdown_delay_ms = ms,
                            Err(rejected) => cfg.rejected.push(rejected),
                        }
                        i += 1;
                    }
                }
                "--persist-timeout-ms" => {
                    if i + 1 < args.len() {
                        match parse_millis(&args[i], &args[i + 1]) {
                            Ok(ms) => cfg.persist_timeout_ms = ms,
                            Err(rejected) => cfg.rejected.push(rejected),
                        }
                        i += 1;
                    }
                }
                "--seed" => {
                    if i + 1 < args.len() {
                        cfg.seed = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                // Unparseable numbers become NaN so validation rejects them
                // instead of silently keeping the default.
                "--voltage" => {
                    if i + 1 < args.len() {
                        cfg.params.input_voltage = parse_number(&args[i + 1]);
                        i += 1;
                    }
                }
                "--current" => {
                    if i + 1 < args.len() {
                        cfg.params.input_current = parse_number(&args[i + 1]);
                        i += 1;
                    }
                }
                "--temperature" => {
                    if i + 1 < args.len() {
                        cfg.params.temperature = parse_number(&args[i + 1]);
                        i += 1;
                    }
                }
                "--irradiance" => {
                    if i + 1 < args.len() {
                        cfg.params.light_intensity = parse_number(&args[i + 1]);
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn print_help() {
        println!(
            r#"shutdown-rig - PV rapid-shutdown device test rig simulator

USAGE:
    shutdown-rig [OPTIONS]

OPTIONS:
    --bind <ADDR>               Control bridge TCP bind address [default: 127.0.0.1:7100]
    --scenario                  Run one start/shutdown scenario in process, print the result and exit
    --run-seconds <SECS>        Serve the bridge for a fixed duration then exit
    --json-logs                 Output logs in JSON format (for log aggregation)
    --log-dir <DIR>             Also write JSON logs to a daily-rolling file in DIR
    --metrics-addr <ADDR>       Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --record-store <PATH>       Persist completed shutdowns to a JSONL file (default: log only)
    --shutdown-delay-ms <MS>    Delay between the shutdown command and its resolution [default: 1000]
    --persist-timeout-ms <MS>   Upper bound on a single record write [default: 5000]
    --seed <N>                  Seed the noise source for reproducible runs
    --voltage <V>               Input voltage, 0-1000 [default: 600]
    --current <A>               Input current, 0-100 [default: 10]
    --temperature <C>           Ambient temperature, -40-85 [default: 25]
    --irradiance <W/M2>         Light intensity, 0-1000 [default: 800]
    -h, --help                  Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                    Set log filter (e.g., RUST_LOG=debug,shutdown_io=trace)

EXAMPLES:
    # Serve the control bridge with metrics
    shutdown-rig --metrics-addr 0.0.0.0:9090 --record-store ./records/shutdowns.jsonl

    # Reproducible single scenario at 750 V / 12 A
    shutdown-rig --scenario --seed 42 --voltage 750 --current 12
"#
        );
    }
}

fn parse_number(raw: &str) -> f64 {
    raw.parse::<f64>().unwrap_or(f64::NAN)
}

fn parse_millis(flag: &str, raw: &str) -> Result<u64, String> {
    raw.parse::<u64>().map_err(|_| format!("{flag} {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("shutdown-rig")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        assert!(!cfg.scenario);
        assert_eq!(cfg.bind_addr, "127.0.0.1:7100");
        assert_eq!(cfg.shutdown_delay(), Duration::from_secs(1));
        assert_eq!(cfg.persist_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.params, SimulationParameters::default());
        assert!(cfg.rejected.is_empty());
    }

    #[test]
    fn parses_scenario_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--scenario",
            "--seed",
            "42",
            "--voltage",
            "750",
            "--current",
            "12.5",
            "--irradiance",
            "950",
            "--record-store",
            "/tmp/records.jsonl",
            "--shutdown-delay-ms",
            "20",
        ]));
        assert!(cfg.scenario);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.params.input_voltage, 750.0);
        assert_eq!(cfg.params.input_current, 12.5);
        assert_eq!(cfg.params.light_intensity, 950.0);
        assert_eq!(cfg.params.temperature, 25.0);
        assert_eq!(cfg.record_store, Some(PathBuf::from("/tmp/records.jsonl")));
        assert_eq!(cfg.shutdown_delay_ms, 20);
    }

    #[test]
    fn garbage_parameter_fails_validation() {
        let cfg = RuntimeConfig::from_args(&args(&["--temperature", "warm"]));
        assert!(cfg.params.temperature.is_nan());
        assert!(cfg.params.validate().is_err());
    }

    #[test]
    fn unparseable_durations_are_rejected() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--shutdown-delay-ms",
            "soon",
            "--persist-timeout-ms",
            "-5",
        ]));
        assert_eq!(cfg.rejected, ["--shutdown-delay-ms soon", "--persist-timeout-ms -5"]);
        assert_eq!(cfg.shutdown_delay_ms, 1000);
        assert_eq!(cfg.persist_timeout_ms, 5000);
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--scenario"]));
        assert!(cfg.show_help);
        assert!(!cfg.scenario);
    }
}
