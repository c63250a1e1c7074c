//! Decision logic a worker runs for its player each tick

use rand::seq::SliceRandom;
use shared::PlayerId;

/// Actions the built-in policy picks from when the player has no code loaded
pub const DEFAULT_ACTIONS: [&str; 5] = ["north", "south", "east", "west", "wait"];

/// What a policy decided for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Vec<u8>,
    pub log: String,
}

/// Turns a game state into an action for one player
///
/// `code` is the player's current program as last loaded into the worker.
/// Returning `Err` makes the worker reply with a turn failure instead of an action.
pub trait Policy: Send + Sync {
    fn decide(
        &self,
        player_id: PlayerId,
        tick: u64,
        code: &[u8],
        game_state: &[u8],
    ) -> Result<Decision, String>;
}

/// Picks uniformly at random among the actions named in the player's code
///
/// The code blob is read as whitespace separated action names. Empty or
/// non-UTF-8 code falls back to [`DEFAULT_ACTIONS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomWalk;

impl Policy for RandomWalk {
    fn decide(
        &self,
        player_id: PlayerId,
        tick: u64,
        code: &[u8],
        _game_state: &[u8],
    ) -> Result<Decision, String> {
        let scripted: Vec<&str> = std::str::from_utf8(code)
            .map(|text| text.split_whitespace().collect())
            .unwrap_or_default();

        let choices: &[&str] = if scripted.is_empty() {
            &DEFAULT_ACTIONS
        } else {
            &scripted
        };

        let action = choices
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| "no actions available".to_string())?;

        Ok(Decision {
            action: action.as_bytes().to_vec(),
            log: format!("{} tick {}: chose {}", player_id, tick, action),
        })
    }
}
