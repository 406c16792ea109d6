//! Canonical key grammar.
//!
//! A key is a pure function of `(label, name, extra)`. Idempotent imports depend
//! on these strings being bit-exact across runs, so every builder here is covered
//! by a test.

use std::collections::HashMap;

use crate::entity::NodeLabel;

/// Optional disambiguators for labels whose key is not just the name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyExtra {
    pub version: Option<String>,
    pub case_id: Option<String>,
    pub index: Option<String>,
    pub build: Option<String>,
    pub code: Option<String>,
}

impl KeyExtra {
    #[must_use]
    pub fn version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn step(case_id: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            case_id: Some(case_id.into()),
            index: Some(index.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }
}

pub type KeyBuilder = fn(&str, &KeyExtra) -> String;

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

fn named(label: &str, name: &str) -> String {
    format!("{label}:{name}")
}

fn product_key(name: &str, _: &KeyExtra) -> String {
    named("Product", name)
}

fn component_key(name: &str, _: &KeyExtra) -> String {
    named("Component", name)
}

fn owner_key(name: &str, _: &KeyExtra) -> String {
    named("Owner", name)
}

fn supplier_key(name: &str, _: &KeyExtra) -> String {
    named("Supplier", name)
}

fn doc_key(name: &str, _: &KeyExtra) -> String {
    named("Doc", name)
}

fn symptom_key(name: &str, _: &KeyExtra) -> String {
    named("Symptom", name)
}

fn root_cause_key(name: &str, _: &KeyExtra) -> String {
    named("RootCause", name)
}

fn countermeasure_key(name: &str, _: &KeyExtra) -> String {
    named("Countermeasure", name)
}

fn build_key(name: &str, extra: &KeyExtra) -> String {
    let version = extra.version.as_deref().unwrap_or(name);
    format!("Build:{version}")
}

fn test_case_key(name: &str, _: &KeyExtra) -> String {
    named("TestCase", name)
}

fn test_step_key(name: &str, extra: &KeyExtra) -> String {
    let case_id = extra.case_id.as_deref().unwrap_or(name);
    let index = extra.index.as_deref().unwrap_or_default();
    format!("TestStep:{case_id}-{index}")
        .trim_end_matches('-')
        .to_string()
}

fn test_result_key(name: &str, extra: &KeyExtra) -> String {
    let suffix = non_empty(extra.build.as_ref())
        .or_else(|| non_empty(extra.version.as_ref()))
        .unwrap_or_default();
    format!("TestResult:{name}-{suffix}")
        .trim_end_matches('-')
        .to_string()
}

fn anomaly_key(name: &str, extra: &KeyExtra) -> String {
    let code = extra.code.as_deref().unwrap_or(name);
    format!("Anomaly:{code}")
}

impl NodeLabel {
    /// Key builder for this label. The match is exhaustive, so a new label
    /// cannot be added without deciding its key grammar.
    #[must_use]
    pub fn key_builder(&self) -> KeyBuilder {
        match self {
            Self::Product => product_key,
            Self::Component => component_key,
            Self::Owner => owner_key,
            Self::Supplier => supplier_key,
            Self::Doc => doc_key,
            Self::Symptom => symptom_key,
            Self::RootCause => root_cause_key,
            Self::Countermeasure => countermeasure_key,
            Self::Build => build_key,
            Self::TestCase => test_case_key,
            Self::TestStep => test_step_key,
            Self::TestResult => test_result_key,
            Self::Anomaly => anomaly_key,
        }
    }
}

/// Label to key-builder registry. Labels without a builder use `{label}:{name}`.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    builders: HashMap<String, KeyBuilder>,
}

impl KeyRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for label in NodeLabel::ALL {
            registry.register(label.as_str(), label.key_builder());
        }
        registry
    }

    pub fn register(&mut self, label: impl Into<String>, builder: KeyBuilder) {
        self.builders.insert(label.into(), builder);
    }

    #[must_use]
    pub fn is_registered(&self, label: &str) -> bool {
        self.builders.contains_key(label)
    }

    #[must_use]
    pub fn make_key(&self, label: &str, name: &str, extra: &KeyExtra) -> String {
        match self.builders.get(label) {
            Some(builder) => builder(name, extra),
            None => named(label, name),
        }
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str, name: &str, extra: &KeyExtra) -> String {
        KeyRegistry::standard().make_key(label, name, extra)
    }

    #[test]
    fn test_named_labels() {
        let none = KeyExtra::default();
        for label in [
            "Product",
            "Component",
            "Owner",
            "Supplier",
            "Doc",
            "Symptom",
            "RootCause",
            "Countermeasure",
        ] {
            assert_eq!(key(label, "X1", &none), format!("{label}:X1"));
        }
    }

    #[test]
    fn test_build_key() {
        assert_eq!(key("Build", "1.0", &KeyExtra::version("1.0")), "Build:1.0");
        assert_eq!(key("Build", "2.1", &KeyExtra::default()), "Build:2.1");
        assert_eq!(key("Build", "ignored", &KeyExtra::version("EVT")), "Build:EVT");
    }

    #[test]
    fn test_test_case_key() {
        assert_eq!(key("TestCase", "TC-001", &KeyExtra::default()), "TestCase:TC-001");
    }

    #[test]
    fn test_test_step_key() {
        assert_eq!(key("TestStep", "x", &KeyExtra::step("TC-1", "3")), "TestStep:TC-1-3");
        assert_eq!(key("TestStep", "TC-1", &KeyExtra::default()), "TestStep:TC-1");
        assert_eq!(key("TestStep", "x", &KeyExtra::step("TC-1", "")), "TestStep:TC-1");
    }

    #[test]
    fn test_test_result_key() {
        let with_build = KeyExtra::default().with_build("B7");
        assert_eq!(key("TestResult", "R1", &with_build), "TestResult:R1-B7");
        assert_eq!(key("TestResult", "R1", &KeyExtra::version("1.2")), "TestResult:R1-1.2");
        assert_eq!(key("TestResult", "R1", &KeyExtra::default()), "TestResult:R1");

        let empty_build = KeyExtra::version("1.2").with_build("");
        assert_eq!(key("TestResult", "R1", &empty_build), "TestResult:R1-1.2");
    }

    #[test]
    fn test_anomaly_key() {
        assert_eq!(key("Anomaly", "A1", &KeyExtra::code("A1")), "Anomaly:A1");
        assert_eq!(key("Anomaly", "A2", &KeyExtra::default()), "Anomaly:A2");
    }

    #[test]
    fn test_unknown_label_falls_back() {
        assert_eq!(key("Factory", "深圳", &KeyExtra::default()), "Factory:深圳");
        assert_eq!(key("", "x", &KeyExtra::default()), ":x");
    }

    #[test]
    fn test_key_is_deterministic() {
        let extra = KeyExtra::step("TC-9", "2");
        let a = key("TestStep", "whatever", &extra);
        let b = key("TestStep", "whatever", &extra.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_label_registered() {
        let registry = KeyRegistry::standard();
        for label in NodeLabel::ALL {
            assert!(registry.is_registered(label.as_str()));
        }
    }
}
