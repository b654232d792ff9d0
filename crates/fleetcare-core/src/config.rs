use std::time::Duration;

use crate::issue::PaymentMethod;

/// One step of the per-device diagnostic pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticStage {
    pub name: String,
    pub duration: Duration,
}

impl DiagnosticStage {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub stages: Vec<DiagnosticStage>,
    pub max_parallel_devices: usize,
    pub scan_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                DiagnosticStage::new("System Diagnostics", Duration::from_millis(1500)),
                DiagnosticStage::new("Motor Performance Analysis", Duration::from_millis(2000)),
                DiagnosticStage::new("Sensor Calibration Check", Duration::from_millis(1800)),
                DiagnosticStage::new("Movement Pattern Analysis", Duration::from_millis(2200)),
                DiagnosticStage::new("Predictive Failure Modeling", Duration::from_millis(2500)),
                DiagnosticStage::new("AI Risk Assessment", Duration::from_millis(3000)),
            ],
            max_parallel_devices: 1,
            scan_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub payment_lead_time: Duration,
    pub default_payment_amount: f64,
    pub default_payment_method: PaymentMethod,
    /// Enables the operator-only `Revert` from `PaymentScheduled` back to `Pending`.
    pub allow_admin_override: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            payment_lead_time: Duration::from_secs(7 * 24 * 60 * 60),
            default_payment_amount: 100.0,
            default_payment_method: PaymentMethod::Invoice,
            allow_admin_override: false,
        }
    }
}
