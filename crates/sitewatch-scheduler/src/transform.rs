//! Numeric extraction and the per-service transforms.
//!
//! Every function here is pure. A value that cannot be read as a finite
//! number is reported as `None` so callers skip the cycle instead of writing
//! a false zero into the time series.

use serde_json::Value;

/// Read a finite number at `key` inside a device payload.
///
/// `key` may be dot-separated (`"meter.kwh"`) to reach nested objects.
/// Numbers encoded as strings (`"12.5"`) are accepted; booleans, nulls,
/// empty strings and non-finite values are not.
pub fn extract_number(payload: &Value, key: &str) -> Option<f64> {
    let mut node = payload;
    for part in key.split('.') {
        node = node.as_object()?.get(part)?;
    }
    let n = match node {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Linear scale used by the logging service. A missing multiplier is 1.
pub fn scale(raw: f64, multiplier: Option<f64>) -> f64 {
    raw * multiplier.unwrap_or(1.0)
}

/// Cost of a reading at `rate` per unit.
pub fn bill(reading: f64, rate: f64) -> f64 {
    reading * rate
}

/// Power derived from a power-analyzer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub apparent_kva: f64,
    pub real_kw: f64,
}

/// Compute apparent and real power.
///
/// Three-phase jobs assume a balanced load measured line-to-line, so the
/// product is scaled by √3. A missing power factor is treated as 1.
pub fn power(voltage: f64, current: f64, power_factor: Option<f64>, phases: u8) -> PowerReading {
    let phase_factor = if phases == 3 { 3f64.sqrt() } else { 1.0 };
    let apparent_kva = voltage * current * phase_factor / 1000.0;
    PowerReading {
        apparent_kva,
        real_kw: apparent_kva * power_factor.unwrap_or(1.0),
    }
}
