//! Application-wide constants

/// Predefined sequence identifiers.
pub(crate) const SEQ_WELCOME: &str = "SEQ-WELCOME-001";
pub(crate) const SEQ_ENGAGEMENT: &str = "SEQ-ENGAGEMENT-001";
pub(crate) const SEQ_URGENCY: &str = "SEQ-URGENCY-001";
pub(crate) const SEQ_LAST_CHANCE: &str = "SEQ-LASTCHANCE-001";

/// Tag that marks a contact as enrolled in the welcome sequence.
///
/// Tag membership doubles as sequence state, so the start-eligibility rules
/// key off this value.
pub(crate) const TAG_WELCOME_SEQUENCE: &str = "Secuencia Welcome";

/// Default buffer size for the scheduled-work queue.
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default interval between scheduler polls for due work, in seconds.
pub(crate) const DEFAULT_SCHEDULER_POLL_SECS: u64 = 10;
