//! Approval oracle consulted before voting

use async_trait::async_trait;

/// Decides whether this participant agrees to give up its resources
///
/// May block for as long as it likes (for example on a human operator);
/// the coordinator's vote timeout bounds the transaction regardless.
#[async_trait]
pub trait ApprovalOracle: Send + Sync {
    async fn ask_approval(&self, payload: &[u8], resources: &[String]) -> bool;
}

/// Oracle that always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle {
    approve: bool,
}

impl FixedOracle {
    pub fn approve() -> Self {
        Self { approve: true }
    }

    pub fn refuse() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalOracle for FixedOracle {
    async fn ask_approval(&self, _payload: &[u8], _resources: &[String]) -> bool {
        self.approve
    }
}
