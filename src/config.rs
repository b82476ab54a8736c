//! Configuration knobs for the undo request manager.

use crate::error::{UndoError, UndoResult};

/// Construction-time configuration for [`crate::UndoRequestManager`].
#[derive(Debug, Clone, Copy)]
pub struct UndoManagerConfig {
    /// Hard upper bound on simultaneous non-FREE requests.
    pub capacity: u32,
    /// When `utilization > soft_limit`, `performInBackground(force=false)`
    /// refuses and the caller must process the undo in the foreground.
    pub soft_limit: u32,
}

impl UndoManagerConfig {
    pub fn new(capacity: u32, soft_limit: u32) -> Self {
        Self {
            capacity,
            soft_limit,
        }
    }

    pub(crate) fn validate(&self) -> UndoResult<()> {
        if self.capacity == 0 {
            return Err(UndoError::InvalidConfig {
                reason: "capacity must be greater than zero".to_string(),
            });
        }
        if self.soft_limit > self.capacity {
            return Err(UndoError::InvalidConfig {
                reason: format!(
                    "soft_limit ({}) must not exceed capacity ({})",
                    self.soft_limit, self.capacity
                ),
            });
        }
        Ok(())
    }

    /// Bytes required for the manager's two arenas at this capacity.
    /// Informational in this implementation: the manager sizes its own
    /// `Vec`s at construction rather than being handed a pre-allocated
    /// region.
    pub fn estimate_size(capacity: u32) -> usize {
        crate::arena::Arenas::estimate_size(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        let cfg = UndoManagerConfig::new(0, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_soft_limit_above_capacity() {
        let cfg = UndoManagerConfig::new(4, 5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_soft_limit_equal_to_capacity() {
        let cfg = UndoManagerConfig::new(4, 4);
        assert!(cfg.validate().is_ok());
    }
}
