use serde::{Deserialize, Serialize};

/// Daily vectorization usage of one user. `limit == 0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub used: u32,
    pub limit: u32,
}

impl QuotaUsage {
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    /// Submissions still allowed today, None when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.limit.saturating_sub(self.used))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_underflows() {
        assert_eq!(QuotaUsage { used: 3, limit: 10 }.remaining(), Some(7));
        assert_eq!(QuotaUsage { used: 12, limit: 10 }.remaining(), Some(0));
        assert_eq!(QuotaUsage { used: 12, limit: 0 }.remaining(), None);
    }
}
