//! Port for the generative language model used by chats.
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::error;

use crate::domain::Error;

use super::define_port_error;

define_port_error! {
    /// Failures raised by language model adapters.
    pub enum LanguageModelError {
        /// The provider could not be reached or returned a transport error.
        Request { message } => "language model request failed: {message}",
        /// The provider answered with something other than generated text.
        Response { message } => "language model response invalid: {message}",
        /// The provider refused to generate.
        Blocked { reason } => "language model blocked the prompt: {reason}",
    }
}

impl From<LanguageModelError> for Error {
    fn from(err: LanguageModelError) -> Self {
        error!(error = %err, "language model failure");
        Self::internal(err.to_string())
    }
}

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// One prior turn fed back to the model as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Finite, non-restartable sequence of generated text chunks in generation order.
pub type TokenStream = BoxStream<'static, Result<String, LanguageModelError>>;

/// Generates text from a prompt plus conversation history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the whole response at once.
    async fn generate_once(&self, prompt: &str, history: &[Turn]) -> Result<String, LanguageModelError>;

    /// Generate the response as a lazy stream of chunks.
    async fn generate_streaming(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<TokenStream, LanguageModelError>;
}

/// Deterministic model for local runs without provider credentials.
///
/// Replies with a short acknowledgement naming the prompt length and the
/// number of history turns, streamed word by word.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureLanguageModel;

impl FixtureLanguageModel {
    fn reply(prompt: &str, history: &[Turn]) -> String {
        format!(
            "Fixture model received a {}-character prompt with {} prior turns.",
            prompt.chars().count(),
            history.len()
        )
    }
}

#[async_trait]
impl LanguageModel for FixtureLanguageModel {
    async fn generate_once(&self, prompt: &str, history: &[Turn]) -> Result<String, LanguageModelError> {
        Ok(Self::reply(prompt, history))
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<TokenStream, LanguageModelError> {
        let reply = Self::reply(prompt, history);
        let chunks: Vec<Result<String, LanguageModelError>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_owned()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn fixture_stream_concatenates_to_single_reply() {
        let model = FixtureLanguageModel;
        let history = [Turn::user("hi"), Turn::model("hello")];
        let once = model.generate_once("abc", &history).await.expect("reply");
        let streamed: Vec<String> = model
            .generate_streaming("abc", &history)
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("chunks");
        assert!(streamed.len() > 1);
        assert_eq!(streamed.concat(), once);
        assert!(once.contains("3-character prompt with 2 prior turns"));
    }
}
