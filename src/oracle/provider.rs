use async_trait::async_trait;

use crate::agent::history::ConversationMessage;
use crate::oracle::retry::OracleError;
use crate::oracle::types::Decision;

/// The decision oracle boundary. One call per iteration: the fixed system
/// prompt, the full (masked) message history, and the newest observation.
/// Transport and provider failures come back pre-classified as
/// `OracleError` so the loop can split terminal from retryable.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        system_prompt: &str,
        history: &[ConversationMessage],
        observation: &str,
    ) -> Result<Decision, OracleError>;
}
