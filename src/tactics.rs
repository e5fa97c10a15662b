//! Coach-facing tactical schemas: a team's playing-style signature and the
//! counter-strategy plan built against it.

use serde::{Deserialize, Serialize};

use crate::overlay::{strip_code_fences, ParseFailure};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TacticalDna {
    pub team_name: String,
    pub formation: String,
    pub playing_style: PlayingStyle,
    pub tactical_tendencies: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub player_movement: PlayerMovement,
    pub dna_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingStyle {
    pub tempo: String,
    pub possession: String,
    pub pressing: String,
    pub width: String,
    pub verticality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMovement {
    pub defensive: String,
    pub offensive: String,
    pub transitions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterPlan {
    pub counter_strategies: Vec<CounterStrategy>,
    pub formation_recommendation: String,
    pub key_tactical_adjustments: Vec<String>,
    pub player_instructions: PlayerInstructions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterStrategy {
    pub strategy: String,
    pub description: String,
    pub implementation: String,
    pub target_weakness: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInstructions {
    pub defense: String,
    pub midfield: String,
    pub attack: String,
}

pub fn parse_dna(reply: &str) -> Result<TacticalDna, ParseFailure> {
    parse_reply(reply)
}

pub fn parse_counter(reply: &str) -> Result<CounterPlan, ParseFailure> {
    parse_reply(reply)
}

fn parse_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, ParseFailure> {
    serde_json::from_str(&strip_code_fences(reply)).map_err(|e| ParseFailure {
        reason: e.to_string(),
        raw: reply.to_string(),
    })
}
