//! Immutable workspace construction
//!
//! Workspaces are ordinary hypertext and intern like everything else. A
//! workspace's printed form excludes its own promise pair, so a freshly
//! built workspace can land on an existing address; when that happens the
//! caller must use the *stored* promises, not the ones it just allocated -
//! that adoption is what lets a repeated question share its answer. The
//! abandoned promises stay in the store; nothing is ever collected.

use std::collections::BTreeSet;

use quilt_core::{
    Address, Datastore, Hypertext, QuiltError, Result, WorkspaceNode,
};

/// An interned workspace: its address plus the node as stored (which may
/// carry older promises than the node that was passed in).
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    pub address: Address,
    pub node: WorkspaceNode,
}

/// Intern `node`, reading back the stored record so deduplicated promises
/// are adopted.
pub fn intern_workspace(db: &mut Datastore, node: WorkspaceNode) -> Result<WorkspaceHandle> {
    let address = db.insert(Hypertext::Workspace(node))?;
    let node = node_at(db, address)?;
    Ok(WorkspaceHandle { address, node })
}

/// The workspace record stored at `address`.
pub fn node_at(db: &Datastore, address: Address) -> Result<WorkspaceNode> {
    db.deref(address)?
        .as_workspace()
        .cloned()
        .ok_or_else(|| QuiltError::NotAWorkspace(address.to_string()))
}

/// Build the root workspace of a session: no predecessor, an empty
/// scratchpad, fresh promises.
pub fn new_root(db: &mut Datastore, question: Address) -> Result<WorkspaceHandle> {
    build(db, question, None)
}

/// Build the child workspace of an `ask`: the sub-question becomes its
/// question and the asking workspace its predecessor.
pub fn new_child(
    db: &mut Datastore,
    question: Address,
    predecessor: Address,
) -> Result<WorkspaceHandle> {
    build(db, question, Some(predecessor))
}

fn build(
    db: &mut Datastore,
    question: Address,
    predecessor: Option<Address>,
) -> Result<WorkspaceHandle> {
    let scratchpad = db.insert(Hypertext::Raw(Vec::new()))?;
    let answer_promise = db.make_promise();
    let final_workspace_promise = db.make_promise();
    intern_workspace(
        db,
        WorkspaceNode {
            predecessor,
            question,
            scratchpad,
            subentries: Vec::new(),
            answer_promise,
            final_workspace_promise,
        },
    )
}

/// The pointers visible in a fresh context over `address`: the workspace
/// itself, its question, its scratchpad, and every sub-question. Sub-answers,
/// sub-workspaces, and the predecessor start locked.
pub fn default_unlocked(address: Address, node: &WorkspaceNode) -> BTreeSet<Address> {
    let mut unlocked = BTreeSet::from([address, node.question, node.scratchpad]);
    for sub in &node.subentries {
        unlocked.insert(sub.question);
    }
    unlocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_core::{insert_hypertext, PointerMap};

    #[test]
    fn test_equal_workspaces_share_promises() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "is x=x?", &PointerMap::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();

        let first = new_child(&mut db, q, root.address).unwrap();
        let second = new_child(&mut db, q, root.address).unwrap();

        assert_eq!(first.address, second.address);
        assert_eq!(first.node.answer_promise, second.node.answer_promise);
    }

    #[test]
    fn test_children_of_different_askers_stay_distinct() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "is x=x?", &PointerMap::new()).unwrap();
        let question_a = insert_hypertext(&mut db, "a?", &PointerMap::new()).unwrap();
        let question_b = insert_hypertext(&mut db, "b?", &PointerMap::new()).unwrap();
        let root_a = new_root(&mut db, question_a).unwrap();
        let root_b = new_root(&mut db, question_b).unwrap();

        let child_a = new_child(&mut db, q, root_a.address).unwrap();
        let child_b = new_child(&mut db, q, root_b.address).unwrap();

        assert_ne!(child_a.address, child_b.address);
        assert_ne!(child_a.node.answer_promise, child_b.node.answer_promise);
    }

    #[test]
    fn test_default_unlocked_hides_answers() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "q?", &PointerMap::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let sub_q = insert_hypertext(&mut db, "sub?", &PointerMap::new()).unwrap();
        let child = new_child(&mut db, sub_q, root.address).unwrap();

        let mut node = root.node.clone();
        node.subentries.push(quilt_core::SubEntry {
            question: sub_q,
            answer: child.node.answer_promise,
            workspace: child.node.final_workspace_promise,
        });
        let successor = intern_workspace(&mut db, node).unwrap();

        let unlocked = default_unlocked(successor.address, &successor.node);
        assert!(unlocked.contains(&sub_q));
        assert!(!unlocked.contains(&child.node.answer_promise));
        assert!(!unlocked.contains(&child.node.final_workspace_promise));
    }
}
