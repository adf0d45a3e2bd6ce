//! Transcript cleaning and word counting
//!
//! Cleaning rules belong to the product, so the pipeline only depends on
//! the `TranscriptCleaner` trait. `StandardCleaner` is the default rule set.

use anyhow::Result;
use cvr_common::db::{ChatMessage, Speaker, TranscriptTurn};

/// Normalizes a raw message sequence into transcript turns
pub trait TranscriptCleaner: Send + Sync {
    fn clean(&self, messages: &[ChatMessage]) -> Result<Vec<TranscriptTurn>>;
}

/// Default cleaning rules
///
/// - system turns are dropped
/// - whitespace is trimmed and internal runs collapse to one space
/// - empty turns are dropped
/// - consecutive turns by the same speaker merge into one
#[derive(Debug, Clone, Default)]
pub struct StandardCleaner;

impl TranscriptCleaner for StandardCleaner {
    fn clean(&self, messages: &[ChatMessage]) -> Result<Vec<TranscriptTurn>> {
        let mut turns: Vec<TranscriptTurn> = Vec::with_capacity(messages.len());

        for message in messages {
            if message.role == Speaker::System {
                continue;
            }

            let text = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                continue;
            }

            match turns.last_mut() {
                Some(last) if last.speaker == message.role => {
                    last.text.push(' ');
                    last.text.push_str(&text);
                }
                _ => turns.push(TranscriptTurn {
                    speaker: message.role,
                    text,
                }),
            }
        }

        Ok(turns)
    }
}

/// Words spoken by the participant; interviewer turns are not counted
pub fn count_user_words(turns: &[TranscriptTurn]) -> i64 {
    turns
        .iter()
        .filter(|turn| turn.speaker == Speaker::User)
        .map(|turn| turn.text.split_whitespace().count() as i64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Speaker, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    #[test]
    fn test_clean_normalizes_and_merges() {
        let messages = vec![
            msg(Speaker::System, "You are an interviewer"),
            msg(Speaker::Assistant, "  Tell me   about\nyour week. "),
            msg(Speaker::User, "It was"),
            msg(Speaker::User, "   "),
            msg(Speaker::User, "busy."),
            msg(Speaker::Assistant, "Why?"),
        ];

        let turns = StandardCleaner.clean(&messages).unwrap();
        assert_eq!(
            turns,
            vec![
                TranscriptTurn {
                    speaker: Speaker::Assistant,
                    text: "Tell me about your week.".to_string(),
                },
                TranscriptTurn {
                    speaker: Speaker::User,
                    text: "It was busy.".to_string(),
                },
                TranscriptTurn {
                    speaker: Speaker::Assistant,
                    text: "Why?".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_clean_empty_input() {
        assert!(StandardCleaner.clean(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_count_user_words_ignores_interviewer() {
        let turns = vec![
            TranscriptTurn {
                speaker: Speaker::Assistant,
                text: "one two three four".to_string(),
            },
            TranscriptTurn {
                speaker: Speaker::User,
                text: "alpha beta".to_string(),
            },
            TranscriptTurn {
                speaker: Speaker::User,
                text: "gamma".to_string(),
            },
        ];
        assert_eq!(count_user_words(&turns), 3);
        assert_eq!(count_user_words(&[]), 0);
    }
}
