//! Tests for the #[derive(Trace)] macro.

#![cfg(feature = "derive")]

use std::collections::HashMap;
use std::marker::PhantomData;

use stw_gc::heap::allocate;
use stw_gc::{Heap, ObjRef, Trace};

fn refs(n: u32) -> Vec<ObjRef> {
    let mut heap = Heap::new(1 << 20);
    (0..n).map(|i| allocate(&mut heap, i).unwrap()).collect()
}

fn traced<T: Trace>(value: &T) -> Vec<ObjRef> {
    let mut seen = Vec::new();
    value.trace(&mut |obj: ObjRef| seen.push(obj));
    seen
}

/// A simple struct with a reference field.
#[derive(Trace)]
struct SimpleNode {
    value: i32,
    next: Option<ObjRef>,
}

#[test]
fn test_derive_simple_struct() {
    let r = refs(1);
    let node = SimpleNode {
        value: 42,
        next: Some(r[0]),
    };
    assert_eq!(node.value, 42);
    assert_eq!(traced(&node), vec![r[0]]);

    let empty = SimpleNode {
        value: 1,
        next: None,
    };
    assert!(traced(&empty).is_empty());
}

/// Fields are traced in declaration order.
#[derive(Trace)]
struct ComplexNode {
    id: u64,
    name: String,
    left: Option<ObjRef>,
    right: Option<ObjRef>,
    children: Vec<ObjRef>,
    index: HashMap<u32, ObjRef>,
}

#[test]
fn test_derive_field_order() {
    let r = refs(5);
    let node = ComplexNode {
        id: 1,
        name: "root".to_string(),
        left: Some(r[0]),
        right: Some(r[1]),
        children: vec![r[2], r[3]],
        index: HashMap::from([(7, r[4])]),
    };
    assert_eq!(node.id, 1);
    assert_eq!(node.name, "root");
    assert_eq!(traced(&node), r);
}

#[derive(Trace)]
struct Pair(ObjRef, #[stw_gc(skip)] ObjRef);

#[derive(Trace)]
struct WithSkip {
    traced: ObjRef,
    #[stw_gc(skip)]
    cached: ObjRef,
    #[stw_gc(skip)]
    _not_traceable: std::sync::mpsc::Sender<u8>,
}

#[test]
fn test_derive_skip() {
    let r = refs(2);
    assert_eq!(traced(&Pair(r[0], r[1])), vec![r[0]]);

    let (tx, _rx) = std::sync::mpsc::channel();
    let value = WithSkip {
        traced: r[1],
        cached: r[0],
        _not_traceable: tx,
    };
    assert_eq!(value.cached, r[0]);
    assert_eq!(traced(&value), vec![r[1]]);
}

#[derive(Trace)]
enum Shape {
    Empty,
    Leaf(ObjRef),
    Branch { left: ObjRef, right: Option<ObjRef> },
    Tagged(#[stw_gc(skip)] ObjRef, ObjRef),
}

#[test]
fn test_derive_enum() {
    let r = refs(3);
    assert!(traced(&Shape::Empty).is_empty());
    assert_eq!(traced(&Shape::Leaf(r[0])), vec![r[0]]);
    assert_eq!(
        traced(&Shape::Branch {
            left: r[1],
            right: Some(r[2]),
        }),
        vec![r[1], r[2]]
    );
    assert_eq!(traced(&Shape::Tagged(r[0], r[1])), vec![r[1]]);
}

#[derive(Trace)]
struct Generic<T, U> {
    first: T,
    rest: Vec<U>,
    _marker: PhantomData<fn() -> U>,
}

#[test]
fn test_derive_generic() {
    let r = refs(3);
    let value = Generic {
        first: r[0],
        rest: vec![Some(r[1]), None, Some(r[2])],
        _marker: PhantomData,
    };
    assert_eq!(traced(&value), r);
}

#[derive(Trace)]
struct Unit;

#[test]
fn test_derive_unit_struct() {
    assert!(traced(&Unit).is_empty());
}
