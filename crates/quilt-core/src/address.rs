//! Datastore addresses and context-local pointer identities
//!
//! An [`Address`] names a storage slot; a [`PointerId`] names how a slot is
//! displayed inside one context. The two namespaces never mix: addresses are
//! global and opaque, pointer IDs are local to a single presentation and are
//! what users type back in.

use serde::{Deserialize, Serialize};

/// Index of a slot in the datastore arena.
///
/// Addresses are allocated monotonically and never reused. Equality means
/// "same slot". The numeric form appears only inside canonical-form strings;
/// it is never parsed back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Address(u64);

impl Address {
    pub(crate) fn new(index: u64) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Display identity of an address within one context.
///
/// Workspace-structural pointers carry reserved tags; everything else is
/// numbered 1..N in the order it becomes visible. The question field has no
/// pointer ID of its own: it is always shown inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerId {
    /// `$<n>` - general data visible in the context
    Data(u32),
    /// `$q<i>` - the i-th sub-question
    SubQuestion(u32),
    /// `$a<i>` - the i-th sub-answer
    SubAnswer(u32),
    /// `$w<i>` - the i-th sub-workspace
    SubWorkspace(u32),
    /// `$s` - the scratchpad
    Scratchpad,
    /// `$p` - the predecessor workspace
    Predecessor,
}

impl std::fmt::Display for PointerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(n) => write!(f, "${}", n),
            Self::SubQuestion(n) => write!(f, "$q{}", n),
            Self::SubAnswer(n) => write!(f, "$a{}", n),
            Self::SubWorkspace(n) => write!(f, "$w{}", n),
            Self::Scratchpad => write!(f, "$s"),
            Self::Predecessor => write!(f, "$p"),
        }
    }
}

impl std::str::FromStr for PointerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('$')
            .ok_or_else(|| format!("pointer must start with '$': {}", s))?;

        match body {
            "s" => return Ok(Self::Scratchpad),
            "p" => return Ok(Self::Predecessor),
            "" => return Err("empty pointer".to_string()),
            _ => {}
        }

        let (tag, digits) = match body.chars().next() {
            Some(c @ ('q' | 'a' | 'w')) => (Some(c), &body[1..]),
            _ => (None, body),
        };

        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("invalid pointer: {}", s));
        }
        let n: u32 = digits.parse().map_err(|_| format!("invalid pointer: {}", s))?;

        Ok(match tag {
            Some('q') => Self::SubQuestion(n),
            Some('a') => Self::SubAnswer(n),
            Some('w') => Self::SubWorkspace(n),
            _ => Self::Data(n),
        })
    }
}
