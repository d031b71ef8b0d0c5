//! User-side hypertext text parsing
//!
//! The grammar is small: plain text, `[…]` groups for inline children, and
//! `$<pointer-id>` references to pointers visible in the current context.
//! Groups are interned bottom-up as filled hypertext; references resolve
//! through the context's pointer map. All pointer references are validated
//! before anything is interned, so a recoverable parse failure leaves no
//! observable state behind.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use crate::address::{Address, PointerId};
use crate::datastore::Datastore;
use crate::error::{QuiltError, Result};
use crate::hypertext::{Chunk, Hypertext};

/// Context-local pointer-ID to address bindings.
pub type PointerMap = HashMap<PointerId, Address>;

#[derive(Debug)]
enum Piece {
    Text(String),
    Pointer(PointerId),
    Group(Vec<Piece>),
}

/// Parse `input` and build a raw hypertext node, interning inline `[…]`
/// groups as filled children.
pub fn build_hypertext(
    db: &mut Datastore,
    input: &str,
    pointers: &PointerMap,
) -> Result<Hypertext> {
    let mut chars = input.chars().peekable();
    let pieces = parse_sequence(&mut chars, false)?;
    check_pointers(&pieces, pointers)?;
    build_node(db, &pieces, pointers)
}

/// Parse `input` and intern the whole tree, returning the root address.
pub fn insert_hypertext(
    db: &mut Datastore,
    input: &str,
    pointers: &PointerMap,
) -> Result<Address> {
    let content = build_hypertext(db, input, pointers)?;
    db.insert(content)
}

fn parse_sequence(chars: &mut Peekable<Chars<'_>>, in_group: bool) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut text = String::new();

    fn flush(text: &mut String, pieces: &mut Vec<Piece>) {
        if !text.is_empty() {
            pieces.push(Piece::Text(std::mem::take(text)));
        }
    }

    loop {
        match chars.peek().copied() {
            None => {
                if in_group {
                    return Err(QuiltError::Parse("unclosed '['".to_string()));
                }
                flush(&mut text, &mut pieces);
                return Ok(pieces);
            }
            Some('[') => {
                chars.next();
                flush(&mut text, &mut pieces);
                pieces.push(Piece::Group(parse_sequence(chars, true)?));
            }
            Some(']') => {
                if !in_group {
                    return Err(QuiltError::Parse("unexpected ']'".to_string()));
                }
                chars.next();
                flush(&mut text, &mut pieces);
                return Ok(pieces);
            }
            Some('$') => {
                chars.next();
                flush(&mut text, &mut pieces);
                let mut token = String::from("$");
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() {
                        token.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let pointer: PointerId = token.parse().map_err(QuiltError::Parse)?;
                pieces.push(Piece::Pointer(pointer));
            }
            Some(c) => {
                text.push(c);
                chars.next();
            }
        }
    }
}

fn check_pointers(pieces: &[Piece], pointers: &PointerMap) -> Result<()> {
    for piece in pieces {
        match piece {
            Piece::Pointer(p) if !pointers.contains_key(p) => {
                return Err(QuiltError::UnknownPointer(p.to_string()));
            }
            Piece::Group(inner) => check_pointers(inner, pointers)?,
            _ => {}
        }
    }
    Ok(())
}

fn build_node(db: &mut Datastore, pieces: &[Piece], pointers: &PointerMap) -> Result<Hypertext> {
    let mut chunks = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => chunks.push(Chunk::Text(text.clone())),
            Piece::Pointer(p) => {
                let addr = pointers
                    .get(p)
                    .ok_or_else(|| QuiltError::UnknownPointer(p.to_string()))?;
                chunks.push(Chunk::Link(*addr));
            }
            Piece::Group(inner) => {
                let child = build_node(db, inner, pointers)?;
                chunks.push(Chunk::Link(db.insert(child)?));
            }
        }
    }
    Ok(Hypertext::Raw(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let mut db = Datastore::new();
        let content = build_hypertext(&mut db, "what is 1+1?", &PointerMap::new()).unwrap();
        assert_eq!(
            content,
            Hypertext::Raw(vec![Chunk::Text("what is 1+1?".to_string())])
        );
    }

    #[test]
    fn test_groups_intern_bottom_up() {
        let mut db = Datastore::new();
        let a = insert_hypertext(&mut db, "is [[a] []] sorted?", &PointerMap::new()).unwrap();
        let b = insert_hypertext(&mut db, "is [[a] []] sorted?", &PointerMap::new()).unwrap();
        assert_eq!(a, b);

        // The inner [a] group interned on its own.
        let inner = insert_hypertext(&mut db, "a", &PointerMap::new()).unwrap();
        let content = db.deref(a).unwrap();
        let outer = match &content.links()[..] {
            [outer] => *outer,
            other => panic!("expected one link, got {:?}", other),
        };
        assert!(db.deref(outer).unwrap().links().contains(&inner));
    }

    #[test]
    fn test_pointer_references_resolve() {
        let mut db = Datastore::new();
        let target = insert_hypertext(&mut db, "2", &PointerMap::new()).unwrap();
        let mut map = PointerMap::new();
        map.insert(PointerId::SubAnswer(1), target);

        let content = build_hypertext(&mut db, "double $a1 please", &map).unwrap();
        assert_eq!(content.links(), vec![target]);
    }

    #[test]
    fn test_unknown_pointer_interns_nothing() {
        let mut db = Datastore::new();
        let before = db.len();
        let err = insert_hypertext(&mut db, "[keep] $a9", &PointerMap::new()).unwrap_err();
        assert!(matches!(err, QuiltError::UnknownPointer(_)));
        assert_eq!(db.len(), before);
    }

    #[test]
    fn test_malformed_text_is_a_parse_error() {
        let mut db = Datastore::new();
        for bad in ["unclosed [group", "stray ] bracket", "bare $ sign", "$0"] {
            let err = insert_hypertext(&mut db, bad, &PointerMap::new()).unwrap_err();
            assert!(matches!(err, QuiltError::Parse(_)), "no error for {:?}", bad);
        }
    }

    #[test]
    fn test_empty_input_is_empty_hypertext() {
        let mut db = Datastore::new();
        let content = build_hypertext(&mut db, "", &PointerMap::new()).unwrap();
        assert_eq!(content, Hypertext::Raw(vec![]));
    }
}
