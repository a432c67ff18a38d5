//! Order lifecycle records: proposals, pending orders, trigger sources.

use serde::{Deserialize, Serialize};

use super::{Address, Asset, Side, TimeMs};

/// What caused a rule evaluation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    ChainEvent,
    FullSweep,
    NewUser,
}

impl TriggerSource {
    /// Parse the trigger-source name used in rule files.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chain_event" => Some(TriggerSource::ChainEvent),
            "full_sweep" => Some(TriggerSource::FullSweep),
            "new_user" => Some(TriggerSource::NewUser),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerSource::ChainEvent => "chain_event",
            TriggerSource::FullSweep => "full_sweep",
            TriggerSource::NewUser => "new_user",
        };
        write!(f, "{}", s)
    }
}

/// A not-yet-executed intent to buy or sell, produced by a rule action.
///
/// `holder` is required for sells (a sell debits a specific position) and
/// absent for buys, where key selection is deferred to execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedOrder {
    pub asset: Asset,
    pub side: Side,
    pub quantity: u64,
    pub rule_id: String,
    pub trigger: TriggerSource,
    pub holder: Option<Address>,
    pub created_ms: TimeMs,
}

/// Confirmation state of an in-flight transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Mined,
    Expired,
}

/// The durable record that a holder has an in-flight transaction.
///
/// At most one of these exists per holder; its presence is what makes the
/// holder's slot busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub holder: Address,
    pub asset: Asset,
    pub side: Side,
    pub quantity: u64,
    pub tx_hash: String,
    /// The holder's transaction count at submit time.
    pub nonce: u64,
    pub submitted_ms: TimeMs,
    pub status: PendingStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_parse() {
        assert_eq!(
            TriggerSource::parse("chain_event"),
            Some(TriggerSource::ChainEvent)
        );
        assert_eq!(
            TriggerSource::parse("full_sweep"),
            Some(TriggerSource::FullSweep)
        );
        assert_eq!(TriggerSource::parse("bogus"), None);
    }

    #[test]
    fn test_pending_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PendingStatus::Mined).unwrap(),
            "\"mined\""
        );
    }
}
