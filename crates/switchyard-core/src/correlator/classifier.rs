use regex::{RegexSet, RegexSetBuilder};

use crate::error::{Error, Result};
use crate::message::{Message, MessageType, INTERIM_FLAG};

/// Decides whether a reply is an interim notice or the final answer.
pub trait ReplyClassifier: Send + Sync {
    /// `true` when the reply must not end the caller's wait.
    fn is_interim(&self, message: &Message) -> bool;
}

/// Classifier driven by message type, an explicit context flag and
/// case-insensitive content patterns.
///
/// A reply is interim when any of these hold:
/// - its type is [`MessageType::Ack`]
/// - its context carries `"interim": true`
/// - its content matches one of the patterns
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: RegexSet,
}

impl PatternClassifier {
    /// Compile the given patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Configuration(format!("invalid interim pattern: {}", e)))?;
        Ok(Self { patterns })
    }

    /// Classifier that only honours the message type and context flag.
    #[must_use]
    pub fn type_only() -> Self {
        Self {
            patterns: RegexSet::empty(),
        }
    }
}

impl ReplyClassifier for PatternClassifier {
    fn is_interim(&self, message: &Message) -> bool {
        if message.message_type == MessageType::Ack {
            return true;
        }
        if message
            .context
            .get(INTERIM_FLAG)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return true;
        }
        self.patterns.is_match(&message.content)
    }
}
