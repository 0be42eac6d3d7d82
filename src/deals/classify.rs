use regex::Regex;
use std::sync::LazyLock;

const DUPLICATE_MARKER: &str = "deal proposal is identical to deal";
const NOT_YET_SEALABLE_MARKER: &str = "cannot seal a sector before";
// Spade's own backend crashing; says nothing about the piece.
const TRANSIENT_REMOTE_MARKER: &str = "PHP Fatal error";

static DEAL_ID_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12}")
        .expect("deal id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// Boost already holds an equivalent deal; `deal_id` is the one to cancel.
    Duplicate { deal_id: String },
    NotYetSealable,
    TransientRemote,
    Other,
}

pub fn classify(message: &str) -> FailureClass {
    if message.contains(DUPLICATE_MARKER)
        && let Some(m) = DEAL_ID_TOKEN.find(message)
    {
        return FailureClass::Duplicate {
            deal_id: m.as_str().to_string(),
        };
    }
    if message.contains(NOT_YET_SEALABLE_MARKER) {
        return FailureClass::NotYetSealable;
    }
    if message.contains(TRANSIENT_REMOTE_MARKER) {
        return FailureClass::TransientRemote;
    }
    FailureClass::Other
}
