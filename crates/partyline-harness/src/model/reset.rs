//! Expected engine traffic of a full session reset.

/// Engine calls that make up a reset, as recorded by [`crate::SimEngine`].
pub const RESET_CALLS: &[&str] = &[
    "leave_network",
    "cleanup",
    "initialize",
    "create_local_user",
    "create_chat_control",
    "connect_to_network",
    "authenticate_local_user",
    "create_endpoint",
    "connect_chat_control",
];

/// Reset calls expected, in order, for a session that was connected (and
/// rejoins) or not.
pub fn expected_reset_calls(connected: bool) -> Vec<&'static str> {
    if connected {
        RESET_CALLS.to_vec()
    } else {
        vec!["cleanup", "initialize"]
    }
}

/// Keep only the calls that belong to a reset.
pub fn reset_calls<'a>(calls: &[&'a str]) -> Vec<&'a str> {
    calls.iter().copied().filter(|call| RESET_CALLS.contains(call)).collect()
}
