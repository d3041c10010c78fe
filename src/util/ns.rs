//! Fresh name generation.

use fxhash::{FxHashMap, FxHashSet};

/// Hands out names that collide neither with each other nor with a set of reserved names.
pub struct Uniquer {
    used: FxHashSet<String>,
    next: FxHashMap<String, usize>,
}

impl Uniquer {
    /// Create a new [Uniquer] with these names already taken.
    pub fn new(used: impl IntoIterator<Item = String>) -> Self {
        Uniquer {
            used: used.into_iter().collect(),
            next: Default::default(),
        }
    }
    /// A fresh name of the form `{base}_{i}`; `i` counts up per base.
    pub fn mk_uniq(&mut self, base: &str) -> String {
        let next = self.next.entry(base.to_owned()).or_insert(1);
        loop {
            let name = format!("{base}_{next}");
            *next += 1;
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn skips_reserved() {
        let mut u = Uniquer::new(vec!["f_1".to_owned(), "f_3".to_owned()]);
        assert_eq!(u.mk_uniq("f"), "f_2");
        assert_eq!(u.mk_uniq("f"), "f_4");
        assert_eq!(u.mk_uniq("g"), "g_1");
    }
}
