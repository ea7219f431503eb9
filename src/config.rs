use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::warn;

use crate::angle::{DialConvention, ZeroPosition};
use crate::ccd::{CcdConfig, DEFAULT_DAMPING, DEFAULT_ITERATIONS, MAX_ITERATIONS};
use crate::chain::ArmConvention;
use crate::reconcile::DEFAULT_EMIT_INTERVAL;

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_BIND_PORT: u16 = 8790;
pub const DEFAULT_BRIDGE_URL: &str = "ws://192.168.1.14:81/";
const PORT_FALLBACK_ATTEMPTS: u16 = 32;
const MIN_EMIT_INTERVAL_MS: u64 = 5;
const MAX_EMIT_INTERVAL_MS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq)]
pub struct RigConfig {
    pub bridge_url: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub convention: ArmConvention,
    pub ik: CcdConfig,
    pub emit_interval: Duration,
    pub dial: DialConvention,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            convention: ArmConvention::ForwardNegative,
            ik: CcdConfig::default(),
            emit_interval: DEFAULT_EMIT_INTERVAL,
            dial: DialConvention::default(),
        }
    }
}

impl RigConfig {
    /// Resolve from `ARM_*` variables, then let `--bridge <url>` override the bridge.
    pub fn from_env_and_args(args: &[String]) -> Self {
        Self::resolve(|name| std::env::var(name).ok(), args)
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>, args: &[String]) -> Self {
        let defaults = DialConvention::default();
        let bridge_url = parse_bridge_arg(args)
            .or_else(|| lookup("ARM_BRIDGE_URL").filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string());
        Self {
            bridge_url,
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: resolve_bind_port(&lookup),
            convention: resolve_convention(&lookup),
            ik: CcdConfig {
                iterations: resolve_ik_iterations(&lookup),
                damping: resolve_ik_damping(&lookup),
            },
            emit_interval: resolve_emit_interval(&lookup),
            dial: DialConvention {
                zero: resolve_dial_zero(&lookup).unwrap_or(defaults.zero),
                clockwise: resolve_dial_clockwise(&lookup).unwrap_or(defaults.clockwise),
                step: resolve_dial_step(&lookup).unwrap_or(defaults.step),
            },
        }
    }
}

fn parse_bridge_arg(args: &[String]) -> Option<String> {
    args.iter()
        .position(|arg| arg == "--bridge")
        .and_then(|index| args.get(index + 1))
        .cloned()
}

fn resolve_bind_port(lookup: &impl Fn(&str) -> Option<String>) -> u16 {
    const ENV_VAR: &str = "ARM_PORT";
    if let Some(raw_value) = lookup(ENV_VAR) {
        match raw_value.parse::<u16>() {
            Ok(parsed) if parsed > 0 => return parsed,
            _ => warn!(
                "{ENV_VAR} must be an integer in range 1-65535; got '{raw_value}'. Using default {DEFAULT_BIND_PORT}"
            ),
        }
    }
    DEFAULT_BIND_PORT
}

fn resolve_convention(lookup: &impl Fn(&str) -> Option<String>) -> ArmConvention {
    const ENV_VAR: &str = "ARM_CONVENTION";
    let fallback = ArmConvention::ForwardNegative;
    if let Some(raw_value) = lookup(ENV_VAR) {
        match ArmConvention::parse(&raw_value) {
            Some(convention) => return convention,
            None => warn!(
                "{ENV_VAR} must be forward-negative or forward-positive; got '{raw_value}'. Using {}",
                fallback.label()
            ),
        }
    }
    fallback
}

fn resolve_ik_iterations(lookup: &impl Fn(&str) -> Option<String>) -> usize {
    const ENV_VAR: &str = "ARM_IK_ITERATIONS";
    if let Some(raw_value) = lookup(ENV_VAR) {
        match raw_value.parse::<usize>() {
            Ok(parsed) if parsed <= MAX_ITERATIONS => return parsed,
            _ => warn!(
                "{ENV_VAR} must be an integer in range 0-{MAX_ITERATIONS}; got '{raw_value}'. Using default {DEFAULT_ITERATIONS}"
            ),
        }
    }
    DEFAULT_ITERATIONS
}

fn resolve_ik_damping(lookup: &impl Fn(&str) -> Option<String>) -> f32 {
    const ENV_VAR: &str = "ARM_IK_DAMPING";
    if let Some(raw_value) = lookup(ENV_VAR) {
        match raw_value.parse::<f32>() {
            Ok(parsed) if parsed > 0.0 && parsed <= 1.0 => return parsed,
            _ => warn!(
                "{ENV_VAR} must be a number in (0, 1]; got '{raw_value}'. Using default {DEFAULT_DAMPING}"
            ),
        }
    }
    DEFAULT_DAMPING
}

fn resolve_emit_interval(lookup: &impl Fn(&str) -> Option<String>) -> Duration {
    const ENV_VAR: &str = "ARM_EMIT_INTERVAL_MS";
    if let Some(raw_value) = lookup(ENV_VAR) {
        match raw_value.parse::<u64>() {
            Ok(parsed) if (MIN_EMIT_INTERVAL_MS..=MAX_EMIT_INTERVAL_MS).contains(&parsed) => {
                return Duration::from_millis(parsed);
            }
            _ => warn!(
                "{ENV_VAR} must be an integer in range {MIN_EMIT_INTERVAL_MS}-{MAX_EMIT_INTERVAL_MS}; got '{raw_value}'. Using default {}",
                DEFAULT_EMIT_INTERVAL.as_millis()
            ),
        }
    }
    DEFAULT_EMIT_INTERVAL
}

fn resolve_dial_zero(lookup: &impl Fn(&str) -> Option<String>) -> Option<ZeroPosition> {
    const ENV_VAR: &str = "ARM_DIAL_ZERO";
    let raw_value = lookup(ENV_VAR)?;
    let parsed = ZeroPosition::parse(&raw_value);
    if parsed.is_none() {
        warn!("{ENV_VAR} must be one of top, right, bottom, left; got '{raw_value}'");
    }
    parsed
}

fn resolve_dial_clockwise(lookup: &impl Fn(&str) -> Option<String>) -> Option<bool> {
    const ENV_VAR: &str = "ARM_DIAL_CLOCKWISE";
    let raw_value = lookup(ENV_VAR)?;
    match raw_value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("{ENV_VAR} must be true or false; got '{raw_value}'");
            None
        }
    }
}

fn resolve_dial_step(lookup: &impl Fn(&str) -> Option<String>) -> Option<f32> {
    const ENV_VAR: &str = "ARM_DIAL_STEP";
    let raw_value = lookup(ENV_VAR)?;
    match raw_value.parse::<f32>() {
        Ok(parsed) if parsed.is_finite() && parsed > 0.0 && parsed <= 90.0 => Some(parsed),
        _ => {
            warn!("{ENV_VAR} must be a number in (0, 90]; got '{raw_value}'");
            None
        }
    }
}

/// Bind the view server. A taken default port falls through to the next free one; an
/// explicitly chosen port never moves.
pub async fn bind_listener(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), String> {
    let attempts = if port == DEFAULT_BIND_PORT {
        PORT_FALLBACK_ATTEMPTS
    } else {
        0
    };
    bind_with_fallback(host, port, attempts).await
}

async fn bind_with_fallback(
    host: &str,
    port: u16,
    attempts: u16,
) -> Result<(TcpListener, SocketAddr), String> {
    let mut in_use = None;
    for candidate in (0..=attempts).filter_map(|offset| port.checked_add(offset)) {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|err| format!("no local address for {host}:{candidate}: {err}"))?;
                if candidate != port {
                    warn!("port {port} is taken, serving on http://{addr}; set ARM_PORT to pin one");
                }
                return Ok((listener, addr));
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse => in_use = Some(err),
            Err(err) => return Err(format!("failed to bind {host}:{candidate}: {err}")),
        }
    }
    let reason = in_use.map_or_else(|| "no candidate port".to_string(), |err| err.to_string());
    Err(format!(
        "port {port} on {host} and the {attempts} after it are unavailable ({reason}); set ARM_PORT"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)], args: &[&str]) -> RigConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        RigConfig::resolve(|name| vars.get(name).cloned(), &args)
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(resolve(&[], &["arm-rig"]), RigConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = resolve(
            &[
                ("ARM_BRIDGE_URL", "ws://10.0.0.2:81/"),
                ("ARM_PORT", "9000"),
                ("ARM_CONVENTION", "forward-positive"),
                ("ARM_IK_ITERATIONS", "25"),
                ("ARM_IK_DAMPING", "0.8"),
                ("ARM_EMIT_INTERVAL_MS", "100"),
                ("ARM_DIAL_ZERO", "top"),
                ("ARM_DIAL_CLOCKWISE", "false"),
                ("ARM_DIAL_STEP", "1"),
            ],
            &["arm-rig"],
        );
        assert_eq!(config.bridge_url, "ws://10.0.0.2:81/");
        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.convention, ArmConvention::ForwardPositive);
        assert_eq!(config.ik, CcdConfig { iterations: 25, damping: 0.8 });
        assert_eq!(config.emit_interval, Duration::from_millis(100));
        assert_eq!(
            config.dial,
            DialConvention { zero: ZeroPosition::Top, clockwise: false, step: 1.0 }
        );
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = resolve(
            &[
                ("ARM_PORT", "0"),
                ("ARM_CONVENTION", "upside-down"),
                ("ARM_IK_ITERATIONS", "5000"),
                ("ARM_IK_DAMPING", "1.5"),
                ("ARM_EMIT_INTERVAL_MS", "soon"),
                ("ARM_DIAL_ZERO", "north"),
                ("ARM_DIAL_CLOCKWISE", "maybe"),
                ("ARM_DIAL_STEP", "-5"),
            ],
            &["arm-rig"],
        );
        assert_eq!(config, RigConfig::default());
    }

    #[test]
    fn bridge_argument_beats_environment() {
        let config = resolve(
            &[("ARM_BRIDGE_URL", "ws://env/")],
            &["arm-rig", "--bridge", "ws://cli:81/"],
        );
        assert_eq!(config.bridge_url, "ws://cli:81/");
        let dangling = resolve(&[], &["arm-rig", "--bridge"]);
        assert_eq!(dangling.bridge_url, DEFAULT_BRIDGE_URL);
    }

    #[tokio::test]
    async fn explicit_port_in_use_is_an_error() {
        let (held, addr) = bind_listener("127.0.0.1", 0).await.unwrap();
        let taken = addr.port();
        assert!(bind_listener("127.0.0.1", taken).await.is_err());
        drop(held);
    }

    #[tokio::test]
    async fn taken_port_falls_through_to_a_later_one() {
        let (held, addr) = bind_listener("127.0.0.1", 0).await.unwrap();
        let taken = addr.port();
        let (_listener, fallback) = bind_with_fallback("127.0.0.1", taken, 8).await.unwrap();
        assert!(fallback.port() > taken && fallback.port() <= taken + 8);
        drop(held);
    }
}
