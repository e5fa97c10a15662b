//! Chat-vision requests and the hand-written prompts behind each analysis
//! mode.

use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;

const REQUEST_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(300);
const MAX_REPLY_TOKENS: u32 = 2048;

/// Send the prompt plus inline frames to the model and return the reply text.
pub(crate) async fn describe_frames(
    model: &str,
    prompt: &str,
    frames: Vec<String>,
) -> anyhow::Result<String> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .max_tokens(MAX_REPLY_TOKENS)
        .messages([ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(
                    [
                        vec![ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(prompt)
                                .build()?,
                        )],
                        frames
                            .into_iter()
                            .map(|frame| -> Result<_, OpenAIError> {
                                Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                    ChatCompletionRequestMessageContentPartImageArgs::default()
                                        .image_url(ImageUrlArgs::default().url(frame).build()?)
                                        .build()?,
                                ))
                            })
                            .collect::<Result<_, _>>()?,
                    ]
                    .concat(),
                ))
                .build()?,
        )])
        .build()?;

    send(request).await
}

/// Text-only variant for modes with no media payload.
pub(crate) async fn complete_text(model: &str, prompt: &str) -> anyhow::Result<String> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .max_tokens(MAX_REPLY_TOKENS)
        .messages([ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?,
        )])
        .build()?;

    send(request).await
}

async fn send(
    request: async_openai::types::CreateChatCompletionRequest,
) -> anyhow::Result<String> {
    let ai_client = Client::new();
    let response =
        tokio::time::timeout(REQUEST_TIMEOUT, ai_client.chat().create(request)).await??;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(anyhow::anyhow!("no content in model reply"))
}

pub(crate) fn overlay_prompt(duration_secs: f64) -> String {
    format!(
        r#"You are analyzing a football play video to create accessible text overlays for beginners and deaf viewers.

Analyze this video and generate synchronized text overlays that explain what's happening at key moments. Focus on:
- Pre-snap: Offense expectations, defensive look, primary responsibilities
- Mid-play: Coverage shifts, pressure sources, window changes
- Post-play: Outcome summary, main reason

Provide your response as a JSON array of overlay objects. Each overlay should have:
- timestamp: number (in seconds, when this overlay should appear)
- phase: "pre-snap" | "mid-play" | "post-play"
- text: string (short, clear sentence explaining what matters - one idea per line, no jargon)

Generate 6-10 overlays spread across the video duration ({duration_secs} seconds). Make them evenly distributed and focus on the most important moments.

Return ONLY valid JSON array, no markdown formatting. Example format:
[
  {{"timestamp": 0, "phase": "pre-snap", "text": "Offense lines up in spread formation."}},
  {{"timestamp": 2, "phase": "pre-snap", "text": "Defense shows zone coverage look."}},
  {{"timestamp": 5, "phase": "mid-play", "text": "Quarterback drops back to pass."}},
  {{"timestamp": 8, "phase": "mid-play", "text": "Defensive pressure forces quick throw."}},
  {{"timestamp": 12, "phase": "post-play", "text": "Pass incomplete due to pressure."}}
]"#
    )
}

pub(crate) fn dna_prompt(team_name: &str) -> String {
    format!(
        r#"You are a tactical sports analyst. Analyze this game footage/image and extract the team's "Tactical DNA" - their unique playing style signature.

Provide a detailed analysis in JSON format with the following structure:
{{
  "teamName": "{team_name}",
  "formation": "description of formation (e.g., '4-3-3', '3-5-2')",
  "playingStyle": {{
    "tempo": "fast/medium/slow",
    "possession": "high/medium/low",
    "pressing": "aggressive/moderate/passive",
    "width": "wide/narrow/balanced",
    "verticality": "direct/patient/balanced"
  }},
  "tacticalTendencies": ["specific tendency 1", "specific tendency 2", "specific tendency 3"],
  "strengths": ["strength 1", "strength 2", "strength 3"],
  "weaknesses": ["weakness 1", "weakness 2", "weakness 3"],
  "playerMovement": {{
    "defensive": "description of defensive movement patterns",
    "offensive": "description of offensive movement patterns",
    "transitions": "description of transition patterns"
  }},
  "dnaSignature": "A unique 2-3 sentence description of this team's tactical DNA that captures their essence"
}}

Focus on:
- Player positioning and spacing
- Movement patterns and rotations
- Ball circulation patterns
- Defensive shape and pressing triggers
- Attacking patterns and preferred areas
- Transition behavior (defense to attack, attack to defense)

Be specific and tactical. Return ONLY valid JSON, no markdown formatting."#
    )
}

pub(crate) fn counter_prompt(opponent_dna: &str) -> String {
    format!(
        r#"You are a tactical sports analyst. Based on the opponent's Tactical DNA provided below, analyze this game footage and generate specific counter-strategies.

Opponent DNA:
{opponent_dna}

Analyze this footage and provide counter-strategies in JSON format:
{{
  "counterStrategies": [
    {{
      "strategy": "strategy name",
      "description": "detailed description",
      "implementation": "how to execute this",
      "targetWeakness": "which opponent weakness this exploits"
    }}
  ],
  "formationRecommendation": "recommended formation to counter",
  "keyTacticalAdjustments": ["adjustment 1", "adjustment 2", "adjustment 3"],
  "playerInstructions": {{
    "defense": "specific defensive instructions",
    "midfield": "specific midfield instructions",
    "attack": "specific attacking instructions"
  }}
}}

Return ONLY valid JSON, no markdown formatting."#
    )
}

pub(crate) fn youtube_dna_prompt(youtube_url: &str, team_name: &str) -> String {
    format!(
        "You are a tactical sports analyst. Based on the game footage at {youtube_url}, extract the team's \"Tactical DNA\".\n\n{}",
        dna_prompt(team_name)
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
    )
}

pub(crate) fn youtube_counter_prompt(youtube_url: &str, opponent_dna: &str) -> String {
    format!(
        "You are a tactical sports analyst. Analyze the game footage at {youtube_url}.\n\n{}",
        counter_prompt(opponent_dna)
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
    )
}
