use std::collections::BTreeMap;

/// One-to-one association between Notion ids (forward keys) and Google
/// task ids (backward keys).
///
/// Both directions are only ever changed together through
/// [`IdBijection::insert_pair`], so `forward[a] == b` holds exactly when
/// `backward[b] == a`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdBijection {
    forward: BTreeMap<String, String>,
    backward: BTreeMap<String, String>,
}

impl IdBijection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_forward(&self, a: &str) -> Option<&str> {
        self.forward.get(a).map(String::as_str)
    }

    pub fn get_backward(&self, b: &str) -> Option<&str> {
        self.backward.get(b).map(String::as_str)
    }

    /// Pairs `a` with `b`, dropping whatever either id was paired with before.
    pub fn insert_pair(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let a = a.into();
        let b = b.into();

        if let Some(old_b) = self.forward.remove(&a) {
            self.backward.remove(&old_b);
        }
        if let Some(old_a) = self.backward.remove(&b) {
            self.forward.remove(&old_a);
        }

        self.forward.insert(a.clone(), b.clone());
        self.backward.insert(b, a);
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    pub fn forward(&self) -> &BTreeMap<String, String> {
        &self.forward
    }

    pub fn backward(&self) -> &BTreeMap<String, String> {
        &self.backward
    }
}
