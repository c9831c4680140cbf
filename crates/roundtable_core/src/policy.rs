//! Room policy: the rules that are product decisions rather than mechanism.
//!
//! Each rule is a single named function so it can be tested on its own and
//! changed in one place.

use crate::state::Player;
use roundtable_events::PlayerId;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 24;

/// Whether a round may start from the lobby.
///
/// Only connected players count. A lone player may always start. Otherwise at
/// least half of the connected players (rounded up) must be ready, and never
/// fewer than two. An empty room is never eligible.
///
/// ```rust
/// use roundtable_core::policy::start_eligible;
///
/// assert!(start_eligible(1, 0));
/// assert!(!start_eligible(2, 1));
/// assert!(start_eligible(2, 2));
/// assert!(start_eligible(5, 3));
/// ```
pub fn start_eligible(connected: usize, ready: usize) -> bool {
    match connected {
        0 => false,
        1 => true,
        n => ready >= n.div_ceil(2).max(2),
    }
}

/// Picks the host after any membership or connection change.
///
/// A current host that is still present and connected keeps the role. Failing
/// that, the earliest-joined connected player takes over. When nobody is
/// connected the current host is kept for reconnection as long as they are
/// still a member who has not left; otherwise the role is cleared.
pub fn select_host(current: Option<PlayerId>, players: &[Player]) -> Option<PlayerId> {
    let current_entry = current.and_then(|id| players.iter().find(|p| p.id == id));
    if let Some(host) = current_entry {
        if host.is_connected() {
            return Some(host.id);
        }
    }

    if let Some(next) = players.iter().find(|p| p.is_connected()) {
        return Some(next.id);
    }

    current_entry.filter(|p| !p.left).map(|p| p.id)
}

/// Trims a display name and strips control characters.
///
/// Returns `None` if nothing printable is left or the result is too long.
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_LEN {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_events::ConnectionId;

    fn player(token: &str, connection: Option<u64>) -> Player {
        let mut p = Player::new(PlayerId::from_identity(token), token.to_string());
        p.connection = connection.map(ConnectionId);
        p
    }

    #[test]
    fn test_start_eligibility_table() {
        assert!(!start_eligible(0, 0));
        assert!(start_eligible(1, 0));
        assert!(start_eligible(1, 1));
        assert!(!start_eligible(2, 0));
        assert!(!start_eligible(2, 1));
        assert!(start_eligible(2, 2));
        assert!(!start_eligible(3, 1));
        assert!(start_eligible(3, 2));
        assert!(!start_eligible(4, 1));
        assert!(start_eligible(4, 2));
        assert!(!start_eligible(5, 2));
        assert!(start_eligible(5, 3));
        assert!(start_eligible(8, 4));
        assert!(!start_eligible(9, 4));
    }

    #[test]
    fn test_connected_host_is_kept() {
        let players = vec![player("a", Some(1)), player("b", Some(2))];
        let b = players[1].id;
        assert_eq!(select_host(Some(b), &players), Some(b));
    }

    #[test]
    fn test_host_migrates_to_earliest_connected() {
        let players = vec![player("a", None), player("b", Some(2)), player("c", Some(3))];
        let a = players[0].id;
        let b = players[1].id;
        assert_eq!(select_host(Some(a), &players), Some(b));
        assert_eq!(select_host(None, &players), Some(b));
    }

    #[test]
    fn test_host_retained_when_nobody_connected() {
        let mut players = vec![player("a", None), player("b", None)];
        let b = players[1].id;
        assert_eq!(select_host(Some(b), &players), Some(b));

        players[1].left = true;
        assert_eq!(select_host(Some(b), &players), None);

        let gone = PlayerId::from_identity("gone");
        assert_eq!(select_host(Some(gone), &players), None);
    }

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name("  Ada  ").as_deref(), Some("Ada"));
        assert_eq!(sanitize_display_name("Bo\u{0007}b").as_deref(), Some("Bob"));
        assert_eq!(sanitize_display_name("   "), None);
        assert_eq!(sanitize_display_name(&"x".repeat(25)), None);
        assert_eq!(sanitize_display_name(&"é".repeat(24)).map(|s| s.chars().count()), Some(24));
    }
}
