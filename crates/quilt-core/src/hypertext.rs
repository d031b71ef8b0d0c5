//! Hypertext nodes: raw fragment runs and structured workspaces
//!
//! Hypertext is a tree of text and addresses. Equality is defined on the
//! canonical printed form (see [`crate::Datastore::canonical_form`]), so the
//! node types here stay dumb: they enumerate their links and print themselves
//! through a caller-supplied address renderer.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// One piece of a raw hypertext node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chunk {
    Text(String),
    Link(Address),
}

/// One sub-question entry of a workspace: question, answer promise, and
/// final-workspace promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEntry {
    pub question: Address,
    pub answer: Address,
    pub workspace: Address,
}

/// The structured record at each node of the decomposition tree.
///
/// `answer_promise` and `final_workspace_promise` are the workspace's *own*
/// promises - what a `reply` on this workspace fulfils. They are bookkeeping,
/// not content: they appear in neither `links()` nor the printed form, so two
/// workspaces that present identically intern to one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceNode {
    pub predecessor: Option<Address>,
    pub question: Address,
    pub scratchpad: Address,
    pub subentries: Vec<SubEntry>,
    pub answer_promise: Address,
    pub final_workspace_promise: Address,
}

/// A node in the datastore: either a raw run of text and links, or a
/// workspace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hypertext {
    Raw(Vec<Chunk>),
    Workspace(WorkspaceNode),
}

impl Hypertext {
    /// The addresses embedded in this node, in display order.
    ///
    /// Raw nodes deduplicate (a pointer used twice is one link); workspace
    /// nodes enumerate their structural fields positionally, which keeps
    /// lockstep walks over related workspaces aligned.
    pub fn links(&self) -> Vec<Address> {
        match self {
            Self::Raw(chunks) => {
                let mut seen = Vec::new();
                for chunk in chunks {
                    if let Chunk::Link(addr) = chunk {
                        if !seen.contains(addr) {
                            seen.push(*addr);
                        }
                    }
                }
                seen
            }
            Self::Workspace(ws) => {
                let mut links = vec![ws.question, ws.scratchpad];
                for sub in &ws.subentries {
                    links.extend([sub.question, sub.answer, sub.workspace]);
                }
                links.extend(ws.predecessor);
                links
            }
        }
    }

    /// Print this node, rendering each embedded address through `display`.
    pub fn to_text(&self, display: &dyn Fn(Address) -> String) -> String {
        match self {
            Self::Raw(chunks) => {
                let mut out = String::new();
                for chunk in chunks {
                    match chunk {
                        Chunk::Text(text) => out.push_str(text),
                        Chunk::Link(addr) => out.push_str(&display(*addr)),
                    }
                }
                out
            }
            Self::Workspace(ws) => {
                let mut out = String::new();
                out.push_str(&format!("Question: {}\n", display(ws.question)));
                out.push_str(&format!("Scratchpad: {}\n", display(ws.scratchpad)));
                for (i, sub) in ws.subentries.iter().enumerate() {
                    out.push_str(&format!(
                        "Sub {}. Q: {}\n       A: {}   W: {}\n",
                        i + 1,
                        display(sub.question),
                        display(sub.answer),
                        display(sub.workspace),
                    ));
                }
                if let Some(pred) = ws.predecessor {
                    out.push_str(&format!("Predecessor: {}\n", display(pred)));
                }
                out
            }
        }
    }

    pub fn as_workspace(&self) -> Option<&WorkspaceNode> {
        match self {
            Self::Workspace(ws) => Some(ws),
            Self::Raw(_) => None,
        }
    }
}
