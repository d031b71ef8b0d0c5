//! User actions
//!
//! Four inert variants; the scheduler interprets them. Hypertext payloads
//! stay as the text the user typed: parsing against a pointer map happens at
//! application time, so a cached action replayed on an identically-rendered
//! context resolves its pointers through that context's own map.

use serde::{Deserialize, Serialize};

use quilt_core::{PointerId, QuiltError, Result};

/// One submitted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Ask a sub-question of the current question.
    Ask(String),
    /// Answer the current question.
    Reply(String),
    /// Make a locked pointer's content visible.
    Unlock(PointerId),
    /// Rewrite the scratchpad.
    Scratch(String),
}

impl Action {
    /// Parse one action line: `ask <hypertext>`, `reply <hypertext>`,
    /// `unlock <pointer-id>`, `scratch <hypertext>`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "ask" => Ok(Self::Ask(rest.to_string())),
            "reply" => Ok(Self::Reply(rest.to_string())),
            "scratch" => Ok(Self::Scratch(rest.to_string())),
            "unlock" => {
                if rest.is_empty() {
                    return Err(QuiltError::Parse("unlock needs a pointer".to_string()));
                }
                let pointer = rest.parse().map_err(QuiltError::Parse)?;
                Ok(Self::Unlock(pointer))
            }
            "" => Err(QuiltError::Parse("empty action".to_string())),
            other => Err(QuiltError::Parse(format!("unknown action: {}", other))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ask(text) => write!(f, "ask {}", text),
            Self::Reply(text) => write!(f, "reply {}", text),
            Self::Unlock(pointer) => write!(f, "unlock {}", pointer),
            Self::Scratch(text) => write!(f, "scratch {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_verb() {
        assert_eq!(
            Action::parse("ask what is 1+1?").unwrap(),
            Action::Ask("what is 1+1?".to_string())
        );
        assert_eq!(
            Action::parse("reply 2").unwrap(),
            Action::Reply("2".to_string())
        );
        assert_eq!(
            Action::parse("unlock $a1").unwrap(),
            Action::Unlock(PointerId::SubAnswer(1))
        );
        assert_eq!(
            Action::parse("scratch working...").unwrap(),
            Action::Scratch("working...".to_string())
        );
    }

    #[test]
    fn test_parse_allows_empty_scratch() {
        assert_eq!(
            Action::parse("scratch").unwrap(),
            Action::Scratch(String::new())
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for bad in ["", "unlock", "unlock $x1", "ponder deeply"] {
            assert!(
                matches!(Action::parse(bad), Err(QuiltError::Parse(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
