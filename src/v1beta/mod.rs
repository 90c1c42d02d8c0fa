use base64::{Engine as _, engine::general_purpose};
use derive_new::new;
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;

pub const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, Deserialize, Serialize, new)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PartData {
    Text(String),
    InlineData(InlineData),
    FileData(FileData),
}

#[derive(Debug, Clone, Deserialize, Serialize, new, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(prefix = "with_", into, strip_option)]
pub struct Part {
    #[serde(flatten)]
    #[setters(skip)]
    pub data: PartData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[new(default)]
    pub thought: Option<bool>,
}

impl Part {
    /// Returns the answer text carried by this part, if any. Thought summaries
    /// are not part of the answer and yield `None`.
    pub fn text(&self) -> Option<&str> {
        match (&self.data, self.thought) {
            (PartData::Text(text), None | Some(false)) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Binary data sent as part of a user message.
///
/// The bytes are encoded using base64 when serialized to JSON.
#[derive(Clone, Deserialize, Serialize, new)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[new(into)]
    mime_type: String,
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    data: Vec<u8>,
}

impl InlineData {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

impl std::fmt::Debug for InlineData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineData")
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, new)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[new(into)]
    mime_type: String,
    #[new(into)]
    file_uri: String,
}

impl FileData {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_uri(&self) -> &str {
        &self.file_uri
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Serialize a byte array as a base64 encoded string.
fn serialize_base64<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}

/// Deserialize a base64 encoded string into raw bytes.
fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    general_purpose::STANDARD
        .decode(s)
        .map_err(serde::de::Error::custom)
}

pub mod safety {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum HarmCategory {
        HarmCategoryUnspecified,
        HarmCategorySexuallyExplicit,
        HarmCategoryHateSpeech,
        HarmCategoryHarassment,
        HarmCategoryDangerousContent,
        HarmCategoryCivicIntegrity,
        #[serde(other)]
        Unknown,
    }
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum HarmProbability {
        HarmProbabilityUnspecified,
        Negligible,
        Low,
        Medium,
        High,
        #[serde(other)]
        Unknown,
    }
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum HarmBlockThreshold {
        HarmBlockThresholdUnspecified,
        BlockNone,
        BlockLowAndAbove,
        #[serde(rename = "BLOCK_MEDIUM_AND_ABOVE")]
        BlockMedAndAbove,
        BlockOnlyHigh,
        Off,
    }
}

pub mod request {
    use derive_new::new;
    use derive_setters::Setters;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Deserialize, Serialize, new, Setters)]
    #[setters(prefix = "with_")]
    #[setters(into, strip_option)]
    #[serde(rename_all = "camelCase")]
    pub struct Request {
        #[setters(skip)]
        #[new(into)]
        contents: Vec<super::Content>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        #[serde(default)]
        #[new(default)]
        safety_settings: Vec<SafetySettings>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        generation_config: Option<GenerationConfig>,
    }

    #[derive(Debug, Clone, Deserialize, Serialize, new)]
    #[serde(rename_all = "camelCase")]
    pub struct SafetySettings {
        category: super::safety::HarmCategory,
        threshold: super::safety::HarmBlockThreshold,
    }

    /// Sampling parameters applied to a generation request.
    #[derive(Debug, Clone, Deserialize, Serialize, Setters, new, Default, PartialEq)]
    #[setters(prefix = "with_")]
    #[setters(into, strip_option)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerationConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        top_p: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        top_k: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        candidate_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        max_output_tokens: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        stop_sequences: Option<Vec<String>>,
    }
}

pub mod response {
    use serde::Deserialize;

    /// One chunk of a (possibly streamed) generation response.
    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Response {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
        #[serde(default)]
        pub prompt_feedback: Option<PromptFeedback>,
        #[serde(default)]
        pub usage_metadata: Option<UsageMetadata>,
    }

    impl Response {
        /// Answer text of the first candidate, in part order.
        pub fn texts(&self) -> impl Iterator<Item = &str> {
            self.candidates
                .first()
                .and_then(|candidate| candidate.content.as_ref())
                .into_iter()
                .flat_map(|content| content.parts.iter())
                .filter_map(super::Part::text)
        }

        /// Describes why this chunk was blocked by content-safety policy, if it was.
        ///
        /// Both a prompt-level block and a safety finish reason on the first
        /// candidate count.
        pub fn safety_block(&self) -> Option<String> {
            if let Some(reason) = self
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_ref())
            {
                return Some(format!("prompt blocked: {reason:?}"));
            }
            self.candidates
                .first()
                .and_then(|candidate| candidate.finish_reason.as_ref())
                .filter(|reason| reason.is_safety_block())
                .map(|reason| format!("response blocked: {reason:?}"))
        }
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        #[serde(default)]
        pub content: Option<super::Content>,
        #[serde(default)]
        pub finish_reason: Option<FinishReason>,
        #[serde(default)]
        pub index: Option<i32>,
        #[serde(default)]
        pub safety_ratings: Vec<SafetyRating>,
    }
    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct UsageMetadata {
        pub prompt_token_count: Option<u32>,
        pub candidates_token_count: Option<u32>,
        pub total_token_count: Option<u32>,
    }
    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct PromptFeedback {
        #[serde(default)]
        pub block_reason: Option<BlockReason>,
        #[serde(default)]
        pub safety_ratings: Vec<SafetyRating>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SafetyRating {
        pub category: super::safety::HarmCategory,
        pub probability: super::safety::HarmProbability,
        #[serde(default)]
        pub blocked: bool,
    }

    #[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum FinishReason {
        FinishReasonUnspecified,
        Stop,
        MaxTokens,
        Safety,
        Recitation,
        Language,
        Blocklist,
        ProhibitedContent,
        Spii,
        ImageSafety,
        Other,
        #[serde(other)]
        Unknown,
    }

    impl FinishReason {
        pub fn is_safety_block(&self) -> bool {
            matches!(
                self,
                Self::Safety
                    | Self::Blocklist
                    | Self::ProhibitedContent
                    | Self::Spii
                    | Self::ImageSafety
            )
        }
    }

    #[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum BlockReason {
        BlockReasonUnspecified,
        Safety,
        Other,
        Blocklist,
        ProhibitedContent,
        ImageSafety,
        #[serde(other)]
        Unknown,
    }
}

pub mod rest;
