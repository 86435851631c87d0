//! CPU provider configuration.
//!
//! Library-level defaults live on the factory. Each session can override them
//! with `ep.cpu.*` entries in its [`SessionConfig`].

use epkit_core::{DataLayout, DeviceType, EpError, Result, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::kernels::ElementwiseOp;

/// Prefix of session entries read by the CPU provider.
pub const CONFIG_PREFIX: &str = "ep.cpu.";

/// Configuration for the CPU execution provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuProviderConfig {
    /// Operator types claimed during the capability pass.
    pub supported_ops: Vec<String>,
    /// Device kinds the factory claims.
    pub device_types: Vec<DeviceType>,
    /// Emit a rate-limited debug event per claimed node.
    pub log_claims: bool,
    /// Layout reported to the host.
    pub preferred_layout: DataLayout,
}

impl Default for CpuProviderConfig {
    fn default() -> Self {
        Self {
            supported_ops: vec!["Add".to_string(), "Mul".to_string()],
            device_types: vec![DeviceType::Cpu],
            log_claims: true,
            preferred_layout: DataLayout::Nchw,
        }
    }
}

impl CpuProviderConfig {
    /// Restrict claiming to `ops`.
    ///
    /// Fails with `Unsupported` if an op has no CPU kernel.
    pub fn with_supported_ops(mut self, ops: &[&str]) -> Result<Self> {
        self.supported_ops = parse_ops(ops.iter().copied())?;
        Ok(self)
    }

    /// Claim devices of the given kinds.
    pub fn with_device_types(mut self, device_types: &[DeviceType]) -> Self {
        self.device_types = device_types.to_vec();
        self
    }

    /// Whether nodes of `op_type` are claimed.
    pub fn supports_op(&self, op_type: &str) -> bool {
        self.supported_ops.iter().any(|op| op == op_type)
    }

    /// Whether devices of `device_type` are claimed.
    pub fn supports_device(&self, device_type: DeviceType) -> bool {
        self.device_types.contains(&device_type)
    }

    /// Apply `ep.cpu.*` overrides from a session configuration.
    ///
    /// Unknown keys are logged and ignored. Values that do not parse are
    /// `InvalidArgument`.
    pub fn with_session_overrides(mut self, session_config: &SessionConfig) -> Result<Self> {
        for (key, value) in session_config.entries_with_prefix(CONFIG_PREFIX) {
            match key {
                "supported_ops" => {
                    self.supported_ops = parse_ops(value.split(','))?;
                }
                "log_claims" => {
                    self.log_claims = value.trim().parse::<bool>().map_err(|_| {
                        EpError::InvalidArgument(format!(
                            "{}log_claims expects true or false, got '{}'",
                            CONFIG_PREFIX, value
                        ))
                    })?;
                }
                "preferred_layout" => {
                    self.preferred_layout = value.trim().parse()?;
                }
                _ => {
                    warn!("Unknown CPU provider option: {}{}", CONFIG_PREFIX, key);
                }
            }
        }
        Ok(self)
    }
}

fn parse_ops<'s>(ops: impl Iterator<Item = &'s str>) -> Result<Vec<String>> {
    let mut parsed = Vec::new();
    for op in ops.map(str::trim).filter(|op| !op.is_empty()) {
        if ElementwiseOp::from_op_type(op).is_none() {
            return Err(EpError::Unsupported(format!(
                "no CPU kernel for operator '{}'",
                op
            )));
        }
        if !parsed.iter().any(|p: &String| p == op) {
            parsed.push(op.to_string());
        }
    }
    Ok(parsed)
}
