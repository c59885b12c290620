// src/script/value.rs

//! Value conversion between the editor and the embedded script host.
//!
//! Editor containers are shared (`Rc`) the way the editor's own list and
//! dict values are, so conversion has to preserve sharing and survive
//! cycles: a visited map keyed by container address maps each editor
//! container to its host counterpart, and the mapping is entered before
//! descending. A depth limit catches pathological nesting that the
//! visited map cannot (distinct containers all the way down).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::ScriptError;

/// Maximum conversion nesting before giving up.
pub const MAX_CONVERT_DEPTH: u32 = 100;

/// Editor-side value.
#[derive(Debug, Clone)]
pub enum EdValue {
    None,
    Bool(bool),
    Number(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<EdValue>>>),
    Dict(Rc<RefCell<Vec<(String, EdValue)>>>),
    /// Named function reference; the host sees a callable.
    Funcref(String),
}

impl EdValue {
    pub fn list(items: Vec<EdValue>) -> Self {
        EdValue::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(items: Vec<(String, EdValue)>) -> Self {
        EdValue::Dict(Rc::new(RefCell::new(items)))
    }
}

/// Host-side value.
#[derive(Debug, Clone)]
pub enum HostValue {
    Void,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    List(Rc<RefCell<Vec<HostValue>>>),
    Hash(Rc<RefCell<Vec<(String, HostValue)>>>),
    /// A callable that routes back into the editor by name.
    Closure(String),
}

fn too_deep() -> ScriptError {
    ScriptError::Domain("value nesting too deep to convert".to_string())
}

/// Converts an editor value for the host, preserving shared containers.
pub fn ed_to_host(value: &EdValue) -> Result<HostValue, ScriptError> {
    let mut visited: HashMap<usize, HostValue> = HashMap::new();
    ed_to_host_inner(value, 0, &mut visited)
}

fn ed_to_host_inner(
    value: &EdValue,
    depth: u32,
    visited: &mut HashMap<usize, HostValue>,
) -> Result<HostValue, ScriptError> {
    if depth > MAX_CONVERT_DEPTH {
        return Err(too_deep());
    }
    Ok(match value {
        EdValue::None => HostValue::Void,
        EdValue::Bool(b) => HostValue::Bool(*b),
        EdValue::Number(n) => HostValue::Int(*n),
        EdValue::Float(f) => HostValue::Real(*f),
        EdValue::Str(s) => HostValue::Str(s.clone()),
        EdValue::Funcref(name) => HostValue::Closure(name.clone()),
        EdValue::List(items) => {
            let key = Rc::as_ptr(items) as usize;
            if let Some(seen) = visited.get(&key) {
                return Ok(seen.clone());
            }
            let out = Rc::new(RefCell::new(Vec::new()));
            // Mapped before descending so self-references resolve.
            visited.insert(key, HostValue::List(Rc::clone(&out)));
            for item in items.borrow().iter() {
                let converted = ed_to_host_inner(item, depth + 1, visited)?;
                out.borrow_mut().push(converted);
            }
            HostValue::List(out)
        }
        EdValue::Dict(entries) => {
            let key = Rc::as_ptr(entries) as usize;
            if let Some(seen) = visited.get(&key) {
                return Ok(seen.clone());
            }
            let out = Rc::new(RefCell::new(Vec::new()));
            visited.insert(key, HostValue::Hash(Rc::clone(&out)));
            for (name, item) in entries.borrow().iter() {
                let converted = ed_to_host_inner(item, depth + 1, visited)?;
                out.borrow_mut().push((name.clone(), converted));
            }
            HostValue::Hash(out)
        }
    })
}

/// Converts a host value for the editor, preserving shared containers.
pub fn host_to_ed(value: &HostValue) -> Result<EdValue, ScriptError> {
    let mut visited: HashMap<usize, EdValue> = HashMap::new();
    host_to_ed_inner(value, 0, &mut visited)
}

fn host_to_ed_inner(
    value: &HostValue,
    depth: u32,
    visited: &mut HashMap<usize, EdValue>,
) -> Result<EdValue, ScriptError> {
    if depth > MAX_CONVERT_DEPTH {
        return Err(too_deep());
    }
    Ok(match value {
        HostValue::Void => EdValue::None,
        HostValue::Bool(b) => EdValue::Bool(*b),
        HostValue::Int(n) => EdValue::Number(*n),
        HostValue::Real(f) => EdValue::Float(*f),
        HostValue::Str(s) => EdValue::Str(s.clone()),
        HostValue::Closure(name) => EdValue::Funcref(name.clone()),
        HostValue::List(items) => {
            let key = Rc::as_ptr(items) as usize;
            if let Some(seen) = visited.get(&key) {
                return Ok(seen.clone());
            }
            let out = Rc::new(RefCell::new(Vec::new()));
            visited.insert(key, EdValue::List(Rc::clone(&out)));
            for item in items.borrow().iter() {
                let converted = host_to_ed_inner(item, depth + 1, visited)?;
                out.borrow_mut().push(converted);
            }
            EdValue::List(out)
        }
        HostValue::Hash(entries) => {
            let key = Rc::as_ptr(entries) as usize;
            if let Some(seen) = visited.get(&key) {
                return Ok(seen.clone());
            }
            let out = Rc::new(RefCell::new(Vec::new()));
            visited.insert(key, EdValue::Dict(Rc::clone(&out)));
            for (name, item) in entries.borrow().iter() {
                let converted = host_to_ed_inner(item, depth + 1, visited)?;
                out.borrow_mut().push((name.clone(), converted));
            }
            EdValue::Dict(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_list(depth: u32) -> EdValue {
        let mut v = EdValue::Number(1);
        for _ in 0..depth {
            v = EdValue::list(vec![v]);
        }
        v
    }

    #[test]
    fn scalars_convert_both_ways() {
        match ed_to_host(&EdValue::Number(42)).unwrap() {
            HostValue::Int(42) => {}
            other => panic!("unexpected {:?}", other),
        }
        match host_to_ed(&HostValue::Str("hi".into())).unwrap() {
            EdValue::Str(s) => assert_eq!(s, "hi"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn funcref_becomes_closure_and_back() {
        let host = ed_to_host(&EdValue::Funcref("MyFunc".into())).unwrap();
        match &host {
            HostValue::Closure(name) => assert_eq!(name, "MyFunc"),
            other => panic!("unexpected {:?}", other),
        }
        match host_to_ed(&host).unwrap() {
            EdValue::Funcref(name) => assert_eq!(name, "MyFunc"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn deep_nesting_within_limit_converts() {
        assert!(ed_to_host(&nested_list(MAX_CONVERT_DEPTH)).is_ok());
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        assert!(ed_to_host(&nested_list(MAX_CONVERT_DEPTH + 1)).is_err());
    }

    #[test]
    fn shared_container_stays_shared() {
        let inner = Rc::new(RefCell::new(vec![EdValue::Number(1)]));
        let outer = EdValue::list(vec![
            EdValue::List(Rc::clone(&inner)),
            EdValue::List(Rc::clone(&inner)),
        ]);
        let host = ed_to_host(&outer).unwrap();
        let HostValue::List(items) = host else { panic!("not a list") };
        let items = items.borrow();
        let (HostValue::List(a), HostValue::List(b)) = (&items[0], &items[1]) else {
            panic!("elements not lists");
        };
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn self_referential_list_terminates() {
        let cyclic = Rc::new(RefCell::new(Vec::new()));
        cyclic.borrow_mut().push(EdValue::List(Rc::clone(&cyclic)));
        let host = ed_to_host(&EdValue::List(Rc::clone(&cyclic))).unwrap();
        let HostValue::List(items) = host else { panic!("not a list") };
        let inner = items.borrow();
        let HostValue::List(again) = &inner[0] else { panic!("not a list") };
        assert!(Rc::ptr_eq(&items, again));
    }
}
