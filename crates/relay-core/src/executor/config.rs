use crate::error::RelayError;

/// Tunables for the call pipeline. `max_module_repeat == 0` disables the
/// per-trace frequency check entirely; a negative value at construction is
/// rejected rather than silently clamped.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub default_timeout_ms: u64,
    pub max_call_depth: usize,
    pub max_module_repeat: usize,
}

impl ExecutorConfig {
    pub fn new(default_timeout_ms: u64, max_call_depth: usize, max_module_repeat: i64) -> Result<Self, RelayError> {
        if max_module_repeat < 0 {
            return Err(RelayError::ConfigInvalid(
                "max_module_repeat must not be negative".to_string(),
            ));
        }
        Ok(Self { default_timeout_ms, max_call_depth, max_module_repeat: max_module_repeat as usize })
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 30_000, max_call_depth: 32, max_module_repeat: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_max_module_repeat() {
        assert!(ExecutorConfig::new(1000, 5, -1).is_err());
    }

    #[test]
    fn zero_is_accepted_as_disabled() {
        let cfg = ExecutorConfig::new(1000, 5, 0).unwrap();
        assert_eq!(cfg.max_module_repeat, 0);
    }
}
