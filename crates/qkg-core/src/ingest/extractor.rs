use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::keys::KeyExtra;
use super::normalizer::Normalizer;
use super::record::{fields, AnomalyRecord};
use crate::entity::NodeLabel;
use crate::relationship::{Provenance, RelationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Component,
    Symptom,
    RootCause,
    Countermeasure,
    Product,
    Factory,
}

impl EntityKind {
    /// Record field each kind is read from, in extraction order.
    pub const FIELDS: [(&'static str, Self); 6] = [
        (fields::COMPONENT, Self::Component),
        (fields::SYMPTOM, Self::Symptom),
        (fields::ROOT_CAUSE, Self::RootCause),
        (fields::COUNTERMEASURE, Self::Countermeasure),
        (fields::PRODUCT, Self::Product),
        (fields::FACTORY, Self::Factory),
    ];

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Component => NodeLabel::Component.as_str(),
            Self::Symptom => NodeLabel::Symptom.as_str(),
            Self::RootCause => NodeLabel::RootCause.as_str(),
            Self::Countermeasure => NodeLabel::Countermeasure.as_str(),
            Self::Product => NodeLabel::Product.as_str(),
            Self::Factory => "Factory",
        }
    }

    #[must_use]
    pub fn for_field(field: &str) -> Option<Self> {
        Self::FIELDS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }
}

/// Two fields co-occurring in a record imply a typed relation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationRule {
    pub source: &'static str,
    pub target: &'static str,
    pub rel: RelationType,
    pub confidence: f64,
}

pub const RELATION_RULES: [RelationRule; 4] = [
    RelationRule {
        source: fields::SYMPTOM,
        target: fields::ROOT_CAUSE,
        rel: RelationType::HasRootcause,
        confidence: 1.0,
    },
    RelationRule {
        source: fields::ROOT_CAUSE,
        target: fields::COUNTERMEASURE,
        rel: RelationType::ResolvedBy,
        confidence: 1.0,
    },
    RelationRule {
        source: fields::SYMPTOM,
        target: fields::COMPONENT,
        rel: RelationType::Affects,
        confidence: 0.9,
    },
    RelationRule {
        source: fields::PRODUCT,
        target: fields::COMPONENT,
        rel: RelationType::Contains,
        confidence: 0.8,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub name: String,
    pub key: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source_key: String,
    pub target_key: String,
    pub rel: RelationType,
    pub confidence: f64,
    /// Where the relation was first seen.
    pub provenance: Provenance,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

impl ExtractionOutput {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Rule-based extraction over parsed anomaly records. Entities and relations
/// are unique per call.
pub struct EntityRelationExtractor {
    normalizer: Normalizer,
}

impl EntityRelationExtractor {
    #[must_use]
    pub const fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    fn normalize(&self, kind: EntityKind, raw: &str) -> String {
        match kind {
            EntityKind::Component => self.normalizer.norm_component(raw),
            EntityKind::Symptom => self.normalizer.norm_symptom(raw),
            EntityKind::RootCause => self.normalizer.norm_root_cause(raw),
            EntityKind::Countermeasure | EntityKind::Product | EntityKind::Factory => {
                raw.trim().to_string()
            }
        }
    }

    /// Normalized name and key of a record field, if it holds a value.
    fn resolve(&self, record: &AnomalyRecord, field: &str) -> Option<(EntityKind, String, String)> {
        let kind = EntityKind::for_field(field)?;
        let name = self.normalize(kind, record.field(field)?);
        if name.is_empty() {
            return None;
        }
        let key = self.normalizer.make_key(kind.label(), &name, &KeyExtra::default());
        Some((kind, name, key))
    }

    #[must_use]
    pub fn extract(&self, records: &[AnomalyRecord], source_file: &str) -> ExtractionOutput {
        let mut output = ExtractionOutput::default();
        let mut seen_entities: HashMap<(EntityKind, String), usize> = HashMap::new();
        let mut seen_relations: HashMap<(String, String, RelationType), usize> = HashMap::new();

        for record in records {
            for (field, _) in EntityKind::FIELDS {
                let Some((kind, name, key)) = self.resolve(record, field) else {
                    continue;
                };
                match seen_entities.get(&(kind, name.clone())) {
                    Some(&i) => output.entities[i].occurrences += 1,
                    None => {
                        seen_entities.insert((kind, name.clone()), output.entities.len());
                        output.entities.push(ExtractedEntity {
                            kind,
                            name,
                            key,
                            occurrences: 1,
                        });
                    }
                }
            }

            let anomaly_key = self.normalizer.make_key(
                NodeLabel::Anomaly.as_str(),
                &record.anomaly_id,
                &KeyExtra::code(&record.anomaly_id),
            );

            for rule in &RELATION_RULES {
                let (Some((_, _, source_key)), Some((_, _, target_key))) =
                    (self.resolve(record, rule.source), self.resolve(record, rule.target))
                else {
                    continue;
                };

                let identity = (source_key.clone(), target_key.clone(), rule.rel);
                match seen_relations.get(&identity) {
                    Some(&i) => output.relations[i].occurrences += 1,
                    None => {
                        seen_relations.insert(identity, output.relations.len());
                        output.relations.push(ExtractedRelation {
                            source_key,
                            target_key,
                            rel: rule.rel,
                            confidence: rule.confidence,
                            provenance: Provenance::new(source_file, record.row)
                                .with_anomaly_key(anomaly_key.clone()),
                            occurrences: 1,
                        });
                    }
                }
            }
        }

        tracing::debug!(
            "Extracted {} entities and {} relations from {} records",
            output.entities.len(),
            output.relations.len(),
            records.len()
        );

        output
    }
}
