use std::sync::Arc;

use super::keys::{KeyExtra, KeyRegistry};
use crate::vocab::{VocabKind, Vocabulary};

/// Resolves raw names against the vocabulary and builds canonical keys.
///
/// A vocabulary miss is not an error: the trimmed input is returned as-is.
#[derive(Debug, Clone)]
pub struct Normalizer {
    vocab: Arc<Vocabulary>,
    keys: KeyRegistry,
}

impl Normalizer {
    #[must_use]
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self {
            vocab,
            keys: KeyRegistry::standard(),
        }
    }

    #[must_use]
    pub fn with_keys(mut self, keys: KeyRegistry) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    #[must_use]
    pub fn norm_component(&self, name: &str) -> String {
        self.resolve(VocabKind::Component, name)
    }

    #[must_use]
    pub fn norm_symptom(&self, name: &str) -> String {
        self.resolve(VocabKind::Symptom, name)
    }

    #[must_use]
    pub fn norm_root_cause(&self, name: &str) -> String {
        self.resolve(VocabKind::Cause, name)
    }

    #[must_use]
    pub fn make_key(&self, label: &str, name: &str, extra: &KeyExtra) -> String {
        self.keys.make_key(label, name, extra)
    }

    fn resolve(&self, kind: VocabKind, name: &str) -> String {
        let cleaned = name.trim();
        if cleaned.is_empty() {
            return String::new();
        }

        if let Some(canonical) = self.vocab.lookup(kind, cleaned) {
            return canonical.to_string();
        }

        tracing::debug!("No {:?} vocabulary entry for '{}', keeping as-is", kind, cleaned);
        cleaned.to_string()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(Vocabulary::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        let vocab = Vocabulary::new()
            .with_entry(VocabKind::Component, "VCM马达", "vcm")
            .with_entry(VocabKind::Symptom, "对焦失败", "AF fail")
            .with_entry(VocabKind::Cause, "来料不良", "");
        Normalizer::new(Arc::new(vocab))
    }

    #[test]
    fn test_alias_resolves_to_canonical() {
        let n = normalizer();
        assert_eq!(n.norm_component("vcm"), "VCM马达");
        assert_eq!(n.norm_component("  VCM "), "VCM马达");
        assert_eq!(n.norm_component("VCM马达"), "VCM马达");
        assert_eq!(n.norm_symptom("af FAIL"), "对焦失败");
        assert_eq!(n.norm_root_cause("来料不良"), "来料不良");
    }

    #[test]
    fn test_miss_passes_through_trimmed() {
        let n = normalizer();
        assert_eq!(n.norm_component("  FPC "), "FPC");
        assert_eq!(n.norm_symptom("黑屏"), "黑屏");
        assert_eq!(n.norm_component("   "), "");
    }

    #[test]
    fn test_vocab_kinds_are_separate() {
        let n = normalizer();
        assert_eq!(n.norm_symptom("vcm"), "vcm");
    }

    #[test]
    fn test_make_key_uses_registry() {
        let n = normalizer();
        let component = n.norm_component("vcm");
        assert_eq!(
            n.make_key("Component", &component, &KeyExtra::default()),
            "Component:VCM马达"
        );
        assert_eq!(n.make_key("Build", "1.0", &KeyExtra::version("1.0")), "Build:1.0");

        let custom = n.clone().with_keys(KeyRegistry::empty());
        assert_eq!(custom.make_key("Build", "1.0", &KeyExtra::version("2.0")), "Build:1.0");
    }
}
