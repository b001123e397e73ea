//! Axis identity tokens.
//!
//! A [`Dim`] names one array axis ("x", "time", ...). Tokens are interned in a
//! process-global table, so they are `Copy`, compare in O(1), and carry a total
//! order (the interning order). The reserved [`Dim::NONE`] sentinel means "no
//! dimension".

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;

struct Registry {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            names: Vec::new(),
            ids: HashMap::new(),
        })
    })
}

/// Interned identity token for one named array axis.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dim(u32);

impl Dim {
    /// Sentinel meaning "no dimension".
    pub const NONE: Dim = Dim(u32::MAX);

    /// Intern `name` and return its token. Repeated calls with the same name
    /// return the same token.
    pub fn new(name: &str) -> Dim {
        {
            let reg = registry().read();
            if let Some(&id) = reg.ids.get(name) {
                return Dim(id);
            }
        }
        let mut reg = registry().write();
        if let Some(&id) = reg.ids.get(name) {
            return Dim(id);
        }
        let id = reg.names.len() as u32;
        reg.names.push(name.to_owned());
        reg.ids.insert(name.to_owned(), id);
        Dim(id)
    }

    /// The label this token was interned under.
    pub fn name(&self) -> String {
        if *self == Dim::NONE {
            return "<none>".to_owned();
        }
        registry().read().names[self.0 as usize].clone()
    }
}

impl From<&str> for Dim {
    fn from(name: &str) -> Dim {
        Dim::new(name)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dim({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = Dim::new("interning_a");
        let b = Dim::new("interning_b");
        assert_eq!(a, Dim::new("interning_a"));
        assert_ne!(a, b);
        assert_eq!(a.name(), "interning_a");
    }

    #[test]
    fn none_sentinel() {
        assert_eq!(Dim::NONE.name(), "<none>");
        assert_ne!(Dim::NONE, Dim::new("x"));
    }

    #[test]
    fn total_order() {
        let a = Dim::new("order_a");
        let b = Dim::new("order_b");
        // Interning order, not lexicographic; only totality matters.
        assert!(a < b || b < a);
        assert!(a < Dim::NONE && b < Dim::NONE);
    }

    #[test]
    fn display_roundtrip() {
        let t = Dim::new("temperature");
        assert_eq!(format!("{t}"), "temperature");
    }
}
