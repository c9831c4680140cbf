//! Runtime settings for rooms.
//!
//! [`RoomSettings`] is the server-wide configuration, built by the binary
//! from its config file. [`RoomRules`] is what one room actually plays by,
//! resolved once from the settings and the options of the join that created
//! the room.

use roundtable_events::{GameMode, RoomOptions};
use std::time::Duration;

/// Bounds applied to per-room overrides and per-question time limits.
pub(crate) const MIN_ROUND_DURATION_SECS: u64 = 5;
pub(crate) const MAX_ROUND_DURATION_SECS: u64 = 600;

/// Server-wide room configuration.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Default length of a round.
    pub round_duration: Duration,
    pub max_players: usize,
    /// How long a room with nobody connected survives.
    pub idle_timeout: Duration,
    /// How often the directory looks for idle rooms.
    pub reap_interval: Duration,
    /// Bounded inbox size of each room actor.
    pub inbox_capacity: usize,
    /// Word-mode categories when the creating join names none.
    pub default_categories: Vec<String>,
    /// Word-mode rounds per game.
    pub word_rounds: usize,
    /// Letters never drawn in word mode.
    pub excluded_letters: Vec<char>,
    /// Points for a correct quiz answer.
    pub quiz_points: u32,
    pub word_anyone_can_start: bool,
    pub quiz_anyone_can_start: bool,
    /// Deadline for a single scorer call.
    pub scoring_timeout: Duration,
    /// Extra time after `scoring_timeout` before the room stops waiting.
    pub scoring_grace: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(60),
            max_players: 12,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            inbox_capacity: 256,
            default_categories: ["Name", "City", "Animal", "Food", "Thing"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            word_rounds: 5,
            excluded_letters: vec!['Q', 'X', 'Y'],
            quiz_points: 100,
            word_anyone_can_start: true,
            quiz_anyone_can_start: false,
            scoring_timeout: Duration::from_secs(5),
            scoring_grace: Duration::from_secs(2),
        }
    }
}

/// The rules one room plays by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRules {
    pub mode: GameMode,
    /// Any connected player may start, advance and reset, not only the host.
    pub anyone_can_start: bool,
    pub round_duration: Duration,
    pub max_players: usize,
    pub quiz_points: u32,
    pub scoring_timeout: Duration,
    pub scoring_grace: Duration,
}

impl RoomSettings {
    /// Resolves the rules for a new room. Out-of-range durations are clamped.
    pub fn rules_for(&self, options: &RoomOptions) -> RoomRules {
        let anyone_can_start = options.anyone_can_start.unwrap_or(match options.mode {
            GameMode::Word => self.word_anyone_can_start,
            GameMode::Quiz => self.quiz_anyone_can_start,
        });
        let round_duration = options
            .round_duration_secs
            .map(|secs| Duration::from_secs(secs.clamp(MIN_ROUND_DURATION_SECS, MAX_ROUND_DURATION_SECS)))
            .unwrap_or(self.round_duration);

        RoomRules {
            mode: options.mode,
            anyone_can_start,
            round_duration,
            max_players: self.max_players,
            quiz_points: self.quiz_points,
            scoring_timeout: self.scoring_timeout,
            scoring_grace: self.scoring_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_for_anyone_can_start() {
        let settings = RoomSettings::default();
        let word = settings.rules_for(&RoomOptions::default());
        assert!(word.anyone_can_start);

        let quiz = settings.rules_for(&RoomOptions {
            mode: GameMode::Quiz,
            ..Default::default()
        });
        assert!(!quiz.anyone_can_start);

        let open_quiz = settings.rules_for(&RoomOptions {
            mode: GameMode::Quiz,
            anyone_can_start: Some(true),
            ..Default::default()
        });
        assert!(open_quiz.anyone_can_start);
    }

    #[test]
    fn test_round_duration_is_clamped() {
        let settings = RoomSettings::default();
        let short = settings.rules_for(&RoomOptions {
            round_duration_secs: Some(1),
            ..Default::default()
        });
        assert_eq!(short.round_duration, Duration::from_secs(5));

        let long = settings.rules_for(&RoomOptions {
            round_duration_secs: Some(10_000),
            ..Default::default()
        });
        assert_eq!(long.round_duration, Duration::from_secs(600));

        let default = settings.rules_for(&RoomOptions::default());
        assert_eq!(default.round_duration, settings.round_duration);
    }
}
