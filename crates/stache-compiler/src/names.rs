use std::collections::HashMap;

/// Bindings reserved at the root of every compile.
pub const ROOT_BINDINGS: [&str; 3] = ["data", "context", "template"];

/// Fresh-name allocator for loop and model bindings.
///
/// A child environment starts from a snapshot of its parent's counters, so a
/// name introduced inside a nested section never collides with one that is
/// still bound further out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameEnv {
    counts: HashMap<String, usize>,
}

impl NameEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with the root bindings already taken.
    pub fn root() -> Self {
        let mut env = Self::new();
        for name in ROOT_BINDINGS {
            env.introduce(name);
        }
        env
    }

    pub fn child(&self) -> Self {
        self.clone()
    }

    /// Returns `base` the first time, then `base1`, `base2`, ...
    pub fn introduce(&mut self, base: &str) -> String {
        let count = self.counts.entry(base.to_string()).or_insert(0);
        let name = if *count == 0 {
            base.to_string()
        } else {
            format!("{base}{count}")
        };
        *count += 1;
        name
    }
}
