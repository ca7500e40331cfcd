use std::env;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use rizz_contracts::events::{Event, EventWriter};
use rizz_contracts::profiles::{
    Language, PartnerProfile, Politeness, UserProfile, ALL_PERSONALITY_CODES,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Ordered fallback list. Flash-Lite first for cost; heavier models only
/// when a cheaper attempt fails outright.
pub const DEFAULT_MODEL_FALLBACK: [&str; 3] = [
    "gemini-flash-lite-latest",
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash",
];

/// Wall-clock budget for one user-initiated generation, all fallback
/// attempts included.
pub const DEFAULT_CLIENT_BUDGET: Duration = Duration::from_secs(45);

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const ATTEMPT_PAUSE: Duration = Duration::from_millis(750);
const SAMPLING_TEMPERATURE: f64 = 0.8;

// Flash-Lite list pricing, USD per million tokens.
const INPUT_COST_PER_MTOK_USD: f64 = 0.075;
const OUTPUT_COST_PER_MTOK_USD: f64 = 0.30;

/// User-facing failure taxonomy for a generation call.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Credential missing. Fatal, never retried; the UI shows a
    /// contact-support message.
    #[error("generation credential missing; set GEMINI_API_KEY or GOOGLE_API_KEY")]
    Configuration,
    /// Every configured model failed. Carries the last underlying cause
    /// for diagnostics.
    #[error("all {attempts} configured models failed; last error: {last}")]
    ExhaustedFallback { attempts: usize, last: String },
    /// The overall operation blew its wall-clock budget. The in-flight
    /// request is abandoned, not cancelled.
    #[error("generation took longer than {budget_s:.0}s; try again")]
    ClientTimeout { budget_s: f64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Opaque screenshot bytes plus the declared mime type. Any resizing or
/// compression happens before this point.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub user: UserProfile,
    pub partner: PartnerProfile,
    pub image: ImageAttachment,
    pub ui_language: Language,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySuggestion {
    pub tone: String,
    pub text: String,
    /// Present only when the partner's language differs from the UI
    /// language; omitted otherwise to avoid paying for redundant output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    pub explanation: String,
}

/// One normalized generation result. Transient: held in UI state for one
/// screen, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    /// 0..=100 read of how the conversation is going.
    pub attraction_score: u8,
    /// One-line commentary on the situation, in the UI language.
    pub commentary: String,
    /// Exactly three, in order. The third is the premium "masterpiece"
    /// reply the presentation layer gates positionally.
    pub replies: Vec<ReplySuggestion>,
}

#[derive(Debug, Clone, Copy, Default)]
struct UsageCounts {
    prompt_tokens: u64,
    output_tokens: u64,
}

/// Transport seam for the hosted `generateContent` endpoint, so tests can
/// script per-model outcomes without a network.
pub trait GenerateTransport: Send + Sync {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

/// Blocking HTTP transport against the real endpoint.
pub struct HttpTransport {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl HttpTransport {
    /// Fails fast with a configuration error when no credential is set;
    /// nothing downstream retries that.
    pub fn from_env() -> Result<Self, GenerateError> {
        let api_key = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"));
        let api_base = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        Self::new(api_base, api_key)
    }

    pub fn new(api_base: Option<String>, api_key: Option<String>) -> Result<Self, GenerateError> {
        let Some(api_key) = api_key.filter(|value| !value.trim().is_empty()) else {
            return Err(GenerateError::Configuration);
        };
        Ok(Self {
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key,
            http: HttpClient::new(),
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerateTransport for HttpTransport {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(ATTEMPT_TIMEOUT)
            .json(payload)
            .send()
            .with_context(|| format!("generateContent request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

/// Turns (user, partner, screenshot, UI language) into a
/// [`SuggestionResult`] by calling the hosted model, falling back across
/// an ordered model list and sanitizing whatever comes back.
pub struct SuggestionClient {
    transport: Arc<dyn GenerateTransport>,
    models: Vec<String>,
    attempt_pause: Duration,
    events: Option<EventWriter>,
}

impl SuggestionClient {
    pub fn new(transport: Arc<dyn GenerateTransport>) -> Self {
        Self {
            transport,
            models: DEFAULT_MODEL_FALLBACK
                .iter()
                .map(|name| name.to_string())
                .collect(),
            attempt_pause: ATTEMPT_PAUSE,
            events: None,
        }
    }

    pub fn from_env() -> Result<Self, GenerateError> {
        Ok(Self::new(Arc::new(HttpTransport::from_env()?)))
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        if !models.is_empty() {
            self.models = models;
        }
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_attempt_pause(mut self, pause: Duration) -> Self {
        self.attempt_pause = pause;
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// One user-initiated generation. Attempts each configured model in
    /// order, advancing only when an attempt errors or returns something
    /// that fails structural validation; a small fixed pause separates
    /// attempts. No caching, no cross-request state.
    pub fn generate(&self, request: &SuggestionRequest) -> Result<SuggestionResult, GenerateError> {
        let same_language = request.ui_language == request.partner.language;
        let payload = build_payload(request)?;

        self.emit(Event::GenerationStarted {
            models: self.models.clone(),
            partner_language: request.partner.language.code().to_string(),
            ui_language: request.ui_language.code().to_string(),
            same_language,
        });

        let mut last_error: Option<anyhow::Error> = None;
        for (attempt, model) in self.models.iter().enumerate() {
            if attempt > 0 {
                thread::sleep(self.attempt_pause);
            }
            match self.attempt(model, &payload, same_language) {
                Ok((result, usage)) => {
                    self.emit(Event::GenerationSucceeded {
                        model: model.clone(),
                        attempt: attempt + 1,
                    });
                    if let Some(usage) = usage {
                        self.emit_cost(model, usage);
                    }
                    self.check_masterpiece_weight(&result);
                    return Ok(result);
                }
                Err(err) => {
                    self.emit(Event::ModelAttemptFailed {
                        model: model.clone(),
                        attempt: attempt + 1,
                        error: error_chain_text(&err, 512),
                    });
                    last_error = Some(err);
                }
            }
        }

        Err(GenerateError::ExhaustedFallback {
            attempts: self.models.len(),
            last: last_error
                .map(|err| error_chain_text(&err, 512))
                .unwrap_or_else(|| "no models configured".to_string()),
        })
    }

    fn attempt(
        &self,
        model: &str,
        payload: &Value,
        same_language: bool,
    ) -> Result<(SuggestionResult, Option<UsageCounts>)> {
        let response = self.transport.generate_content(model, payload)?;
        let text = extract_response_text(&response)
            .context("model response contained no text candidate")?;
        let result = parse_suggestion_result(&text, same_language)?;
        Ok((result, extract_usage_counts(&response)))
    }

    fn emit_cost(&self, model: &str, usage: UsageCounts) {
        self.emit(Event::CostUpdate {
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: estimate_cost_usd(usage.prompt_tokens, usage.output_tokens),
        });
    }

    // The third reply is instructed to be the richest; when the model
    // ignores that we keep the result but leave a trace for prompt tuning.
    fn check_masterpiece_weight(&self, result: &SuggestionResult) {
        let counts: Vec<usize> = result
            .replies
            .iter()
            .map(|reply| sentence_count(&reply.text))
            .collect();
        if let [first, second, third] = counts.as_slice() {
            if third < first.max(second) {
                self.emit(Event::MasterpieceBelowStandard {
                    sentence_counts: counts.clone(),
                });
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.emit(&event);
        }
    }
}

/// Races a blocking generation against a wall-clock budget on a worker
/// thread. The underlying request is not cancelled on timeout; whatever it
/// eventually produces is discarded with the channel.
pub fn generate_with_budget(
    client: Arc<SuggestionClient>,
    request: SuggestionRequest,
    budget: Duration,
) -> Result<SuggestionResult, GenerateError> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(client.generate(&request));
    });
    match receiver.recv_timeout(budget) {
        Ok(outcome) => outcome,
        Err(_) => Err(GenerateError::ClientTimeout {
            budget_s: budget.as_secs_f64(),
        }),
    }
}

fn build_payload(request: &SuggestionRequest) -> Result<Value> {
    if request.image.bytes.is_empty() {
        bail!("screenshot attachment is empty");
    }
    let prompt = build_prompt(&request.user, &request.partner, request.ui_language);
    Ok(json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": prompt },
                { "inlineData": {
                    "mimeType": request.image.mime_type,
                    "data": BASE64.encode(&request.image.bytes),
                }},
            ],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
            "temperature": SAMPLING_TEMPERATURE,
        },
    }))
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "rizzScore": {
                "type": "INTEGER",
                "description": "0-100 attraction score for the current conversation state.",
            },
            "roast": {
                "type": "STRING",
                "description": "Short 1-sentence analysis of the situation in the user's UI language.",
            },
            "replies": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "tone": {
                            "type": "STRING",
                            "description": "The tone of the reply (e.g., Witty, Sweet, Chill) in the user's UI language.",
                        },
                        "text": {
                            "type": "STRING",
                            "description": "The actual reply text in the PARTNER'S language. MUST be detailed (2-3 sentences).",
                        },
                        "translation": {
                            "type": "STRING",
                            "description": "Translation of the reply text into the user's UI language. NULL if languages match.",
                        },
                        "explanation": {
                            "type": "STRING",
                            "description": "Psychological explanation in the user's UI language.",
                        },
                    },
                    "required": ["tone", "text", "explanation"],
                },
            },
        },
        "required": ["rizzScore", "roast", "replies"],
    })
}

pub fn build_prompt(user: &UserProfile, partner: &PartnerProfile, ui_language: Language) -> String {
    let user_lang = ui_language.english_name();
    let partner_lang = partner.language.english_name();
    let partner_age = partner
        .age
        .map(|age| age.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    format!(
        "You are a world-class Dating Coach and Psychology Expert specializing in social dynamics and personality typing.\n\
        \n\
        Your task is to analyze the attached chat screenshot and generate 3 distinct replies to maximize the user's attractiveness, plus a 0-100 'rizzScore' for the current conversation and a short one-sentence 'roast' of the situation.\n\
        \n\
        User Profile:\n\
        - Gender: {user_gender}\n\
        - Age: {user_age}\n\
        - Personality: {user_personality}\n\
        \n\
        Partner Profile (Who we are texting):\n\
        - Name: {partner_name}\n\
        - Relation: {partner_relation}\n\
        - Gender: {partner_gender}\n\
        - Age: {partner_age}\n\
        - Personality: {partner_personality} (Tailor the communication style to this type)\n\
        - Goal: {partner_goal}\n\
        - Desired Vibe: {partner_vibe}\n\
        - Context Hints: \"{partner_context}\"\n\
        \n\
        IMPORTANT - LANGUAGE RULES:\n\
        1. **Reply Text ('text' field)**: MUST be written in **{partner_lang}** ({partner_code}). This is what the user sends.\n\
        2. **Explanation ('explanation' field) and 'roast'**: MUST be written in **{user_lang}** ({user_code}). Explain the psychology to the user.\n\
        3. **Tone ('tone' field)**: MUST be written in **{user_lang}** ({user_code}).\n\
        {translation_instruction}\n\
        \n\
        IMPORTANT - POLITENESS RULES:\n\
        {politeness_instruction}\n\
        \n\
        CRITICAL INSTRUCTIONS FOR GENERATION (3 REPLIES STRUCTURE):\n\
        \n\
        You must generate exactly 3 replies in this specific order:\n\
        \n\
        **Reply 1 & 2 (Standard Options):**\n\
        - Length: 2-3 sentences.\n\
        - Quality: High quality, witty, safe, and effective.\n\
        - Purpose: Good reliable options for daily use.\n\
        \n\
        **Reply 3 (THE MASTERPIECE / PREMIUM OPTION):**\n\
        - **CRITICAL:** This is the paid \"Pro\" feature. It MUST be significantly better than the first two.\n\
        - **Length:** Longer and richer (3-5 sentences).\n\
        - **Content:** Use advanced psychological tactics (Cold Reading, Push-Pull, Vulnerability, Emotional Spike).\n\
        - **Impact:** It should be irresistible, charismatic, and deeply engaging.\n\
        - **Tone:** Mark the tone as \"ULTIMATE\" or \"MASTERPIECE\".\n\
        \n\
        PERSONALITY GUIDELINES:\n\
        - 'N' types: Use metaphors, abstract humor, deep questions.\n\
        - 'S' types: Be concrete, observant, comment on specific details in the photo/chat.\n\
        - 'T' types: Use logical wit, playful teasing, challenge them slightly.\n\
        - 'F' types: Focus on emotional connection, warmth, validation.\n\
        \n\
        NEVER mention the personality taxonomy or any four-letter type code inside the reply 'text' itself; the 'explanation' may reference it.\n\
        \n\
        Output exactly 3 replies following this structure.",
        user_gender = user.gender,
        user_age = user.age,
        user_personality = user.personality,
        partner_name = partner.name,
        partner_relation = partner.relation,
        partner_gender = partner.gender,
        partner_age = partner_age,
        partner_personality = partner.personality,
        partner_goal = partner.goal,
        partner_vibe = partner.vibe,
        partner_context = partner.context,
        partner_lang = partner_lang,
        partner_code = partner.language.code(),
        user_lang = user_lang,
        user_code = ui_language.code(),
        translation_instruction = translation_instruction(ui_language, partner.language),
        politeness_instruction = politeness_instruction(partner),
    )
}

/// Translation is only worth paying for when the user cannot read the
/// reply language; when the languages match the field is ordered omitted.
pub fn translation_instruction(ui_language: Language, partner_language: Language) -> String {
    if ui_language == partner_language {
        format!(
            "4. **Translation ('translation' field)**: CRITICAL - OMIT THIS FIELD OR RETURN NULL. \
            The user and partner speak the same language ({}). Do NOT generate a translation to save tokens.",
            ui_language.english_name()
        )
    } else {
        format!(
            "4. **Translation ('translation' field)**: MANDATORY. Translate the reply text into \
            **{}** ({}) so the user understands what they are sending.",
            ui_language.english_name(),
            ui_language.code()
        )
    }
}

/// Languages with grammaticalized formality get an unambiguous register
/// instruction; models drift between registers without one. Mixed stays a
/// soft hint.
pub fn politeness_instruction(partner: &PartnerProfile) -> String {
    match (partner.language, partner.politeness) {
        (Language::Ko, Politeness::Casual) => {
            "CRITICAL: You MUST use Banmal (casual Korean speech). Do NOT use honorific endings \
            like '-yo' or '-nida'. Talk like a close friend."
                .to_string()
        }
        (Language::Ko, Politeness::Polite) => {
            "CRITICAL: You MUST use Jondaemal (polite Korean speech). Be respectful and use \
            '-yo' or '-nida' endings."
                .to_string()
        }
        (Language::Ja, Politeness::Casual) => {
            "CRITICAL: You MUST use Tameguchi (casual Japanese). Do NOT use Desu/Masu forms."
                .to_string()
        }
        (Language::Ja, Politeness::Polite) => {
            "CRITICAL: You MUST use Keigo/Desu/Masu (polite Japanese form).".to_string()
        }
        (Language::Fr, Politeness::Casual) => {
            "CRITICAL: You MUST use 'Tu' (informal French).".to_string()
        }
        (Language::Fr, Politeness::Polite) => {
            "CRITICAL: You MUST use 'Vous' (formal French).".to_string()
        }
        (_, politeness) => format!("Politeness level: {}.", politeness.label()),
    }
}

/// Parses a raw model response body into a normalized result. The body may
/// arrive wrapped in a code fence; malformed JSON after stripping counts
/// as a failed attempt.
pub fn parse_suggestion_result(raw: &str, same_language: bool) -> Result<SuggestionResult> {
    #[derive(Deserialize)]
    struct RawReply {
        #[serde(default)]
        tone: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        translation: Option<String>,
        #[serde(default)]
        explanation: String,
    }

    #[derive(Deserialize)]
    struct RawResult {
        #[serde(rename = "rizzScore")]
        rizz_score: Option<i64>,
        #[serde(default)]
        roast: Option<String>,
        #[serde(default)]
        replies: Vec<RawReply>,
    }

    let stripped = strip_code_fence(raw);
    let parsed: RawResult =
        serde_json::from_str(stripped).context("model response is not the expected JSON shape")?;

    if parsed.replies.len() != 3 {
        bail!(
            "expected exactly 3 replies, model returned {}",
            parsed.replies.len()
        );
    }
    let score = parsed
        .rizz_score
        .context("model response is missing the attraction score")?
        .clamp(0, 100) as u8;

    let mut replies = Vec::with_capacity(3);
    for (idx, raw_reply) in parsed.replies.into_iter().enumerate() {
        let text = strip_taxonomy_terms(&raw_reply.text);
        if text.is_empty() {
            bail!("reply {} has empty text", idx + 1);
        }
        let translation = raw_reply
            .translation
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let translation = if same_language {
            // Ordered omitted; scrub it if the model sent one anyway.
            None
        } else {
            Some(translation.with_context(|| {
                format!("reply {} is missing the mandatory translation", idx + 1)
            })?)
        };
        replies.push(ReplySuggestion {
            tone: raw_reply.tone.trim().to_string(),
            text,
            translation,
            explanation: raw_reply.explanation.trim().to_string(),
        });
    }

    Ok(SuggestionResult {
        attraction_score: score,
        commentary: parsed.roast.unwrap_or_default().trim().to_string(),
        replies,
    })
}

/// Strips an optional fenced-code wrapper (``` or ```json) around the
/// response body.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // The language tag ends at a newline, or at the first whitespace on a
    // single-line fence ("```json {...}```").
    let after_tag = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => {
            let tag_end = rest
                .find(|ch: char| !ch.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            if tag_end > 0 && rest[tag_end..].starts_with(char::is_whitespace) {
                rest[tag_end..].trim_start()
            } else {
                rest
            }
        }
    };
    after_tag
        .trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or_else(|| after_tag.trim())
}

/// Removes the 16 type codes and the literal taxonomy name from reply
/// text. Instruction-following is not guaranteed, so this runs on every
/// reply regardless of what the prompt asked for.
pub fn strip_taxonomy_terms(text: &str) -> String {
    let mut cleaned = text.to_string();
    for term in ALL_PERSONALITY_CODES.iter().chain(["MBTI"].iter()) {
        cleaned = remove_term_case_insensitive(&cleaned, term);
    }
    collapse_spaces(&cleaned)
}

fn remove_term_case_insensitive(haystack: &str, term: &str) -> String {
    let upper_haystack = haystack.to_ascii_uppercase();
    let upper_term = term.to_ascii_uppercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(found) = upper_haystack[cursor..].find(&upper_term) {
        let start = cursor + found;
        let end = start + upper_term.len();
        let prev_alphanumeric = haystack[..start]
            .chars()
            .next_back()
            .is_some_and(|ch| ch.is_ascii_alphanumeric());
        let next_alphanumeric = haystack[end..]
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphanumeric());
        out.push_str(&haystack[cursor..start]);
        if prev_alphanumeric || next_alphanumeric {
            // Part of a longer word; leave it alone.
            out.push_str(&haystack[start..end]);
        }
        cursor = end;
    }
    out.push_str(&haystack[cursor..]);
    out
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch == ' ' {
            if !last_was_space {
                out.push(ch);
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Rough sentence counter used to sanity-check the masterpiece reply's
/// relative weight.
pub fn sentence_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_terminator = false;
    for ch in text.chars() {
        let is_terminator = matches!(ch, '.' | '!' | '?');
        if is_terminator && !in_terminator {
            count += 1;
        }
        in_terminator = is_terminator;
    }
    if count == 0 && !text.trim().is_empty() {
        1
    } else {
        count
    }
}

fn extract_response_text(response: &Value) -> Option<String> {
    let candidates = response.get("candidates")?.as_array()?;
    let mut out = String::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        if !out.is_empty() {
            break;
        }
    }
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn extract_usage_counts(response: &Value) -> Option<UsageCounts> {
    let usage = response.get("usageMetadata").and_then(Value::as_object)?;
    Some(UsageCounts {
        prompt_tokens: usage
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

fn estimate_cost_usd(prompt_tokens: u64, output_tokens: u64) -> f64 {
    let input_cost = (prompt_tokens as f64 / 1_000_000.0) * INPUT_COST_PER_MTOK_USD;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * OUTPUT_COST_PER_MTOK_USD;
    input_cost + output_cost
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body could not be read"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned a non-JSON body"))
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        parts.push(cause.to_string());
    }
    truncate_text(&parts.join(": "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_chars).collect();
    format!("{truncated}…")
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
