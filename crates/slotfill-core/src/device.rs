//! Device resolution from configuration strings.

use candle_core::Device;

use crate::error::{Result, SlotFillError};

/// Resolve a device name into a candle [`Device`].
///
/// Accepted forms:
/// * `"cpu"` or a negative integer such as `"-1"`
/// * `"cuda"`, `"cuda:N"`, or a non-negative integer `"N"`
/// * `"metal"` or `"metal:N"`
pub fn resolve_device(name: &str) -> Result<Device> {
    let name = name.trim().to_lowercase();

    if name.is_empty() || name == "cpu" {
        return Ok(Device::Cpu);
    }

    if let Ok(ordinal) = name.parse::<i64>() {
        if ordinal < 0 {
            return Ok(Device::Cpu);
        }
        return cuda(ordinal as usize);
    }

    let (backend, ordinal) = match name.split_once(':') {
        Some((backend, ordinal)) => {
            let ordinal = ordinal.parse::<usize>().map_err(|_| {
                SlotFillError::Device(format!("invalid device ordinal in {name:?}"))
            })?;
            (backend, ordinal)
        }
        None => (name.as_str(), 0),
    };

    match backend {
        "cuda" => cuda(ordinal),
        "metal" => Device::new_metal(ordinal)
            .map_err(|e| SlotFillError::Device(format!("metal:{ordinal} unavailable: {e}"))),
        _ => Err(SlotFillError::Device(format!(
            "unrecognized device name {name:?}"
        ))),
    }
}

fn cuda(ordinal: usize) -> Result<Device> {
    Device::new_cuda(ordinal)
        .map_err(|e| SlotFillError::Device(format!("cuda:{ordinal} unavailable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_specifiers() {
        assert!(resolve_device("cpu").unwrap().is_cpu());
        assert!(resolve_device(" CPU ").unwrap().is_cpu());
        assert!(resolve_device("-1").unwrap().is_cpu());
        assert!(resolve_device("").unwrap().is_cpu());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            resolve_device("tpu"),
            Err(SlotFillError::Device(_))
        ));
        assert!(matches!(
            resolve_device("cuda:x"),
            Err(SlotFillError::Device(_))
        ));
    }
}
