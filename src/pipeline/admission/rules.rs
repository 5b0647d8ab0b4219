//! Document-type policy as data.
//!
//! Each rule carries a default priority, whether the type needs OCR before
//! analysis, and whether a human must review it instead of the automatic
//! pipeline. The table is plain data so operators can add types without a
//! code change; classification falls through to a catch-all rule.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::AdmissionError;

/// One document-type policy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTypeRule {
    pub document_type: String,
    /// 1–10; higher claims workers first.
    pub priority: u8,
    /// Type needs OCR text before the analysis call is useful.
    #[serde(default)]
    pub requires_ocr: bool,
    /// Route to a human instead of the automatic queue.
    #[serde(default)]
    pub requires_human_review: bool,
    /// Case-insensitive regexes matched against the original filename.
    #[serde(default)]
    pub filename_patterns: Vec<String>,
    /// Lower-cased substrings matched against the content sample.
    #[serde(default)]
    pub content_keywords: Vec<String>,
}

struct CompiledRule {
    rule: DocumentTypeRule,
    patterns: Vec<Regex>,
}

/// Ordered rule table; first match wins.
pub struct RuleTable {
    rules: Vec<CompiledRule>,
    fallback: DocumentTypeRule,
}

impl RuleTable {
    /// The shipped defaults for scanned personal/business paperwork.
    pub fn builtin() -> Self {
        let rules = vec![
            DocumentTypeRule {
                document_type: "identity_document".into(),
                priority: 9,
                requires_ocr: true,
                requires_human_review: true,
                filename_patterns: vec![r"passport|driver.?licen[cs]e|id.?card".into()],
                content_keywords: vec!["passport".into(), "date of birth".into()],
            },
            DocumentTypeRule {
                document_type: "contract".into(),
                priority: 8,
                requires_ocr: true,
                requires_human_review: true,
                filename_patterns: vec![r"contract|agreement|lease".into()],
                content_keywords: vec!["hereinafter".into(), "party of the".into()],
            },
            DocumentTypeRule {
                document_type: "tax_form".into(),
                priority: 8,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"tax|w-?2\b|1099".into()],
                content_keywords: vec!["taxable income".into(), "tax year".into()],
            },
            DocumentTypeRule {
                document_type: "invoice".into(),
                priority: 7,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"invoice|bill\b".into()],
                content_keywords: vec!["invoice".into(), "amount due".into(), "total due".into()],
            },
            DocumentTypeRule {
                document_type: "bank_statement".into(),
                priority: 7,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"statement".into()],
                content_keywords: vec!["opening balance".into(), "closing balance".into()],
            },
            DocumentTypeRule {
                document_type: "receipt".into(),
                priority: 6,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"receipt|rcpt".into()],
                content_keywords: vec!["subtotal".into(), "change due".into()],
            },
            DocumentTypeRule {
                document_type: "letter".into(),
                priority: 4,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"letter".into()],
                content_keywords: vec!["dear ".into(), "sincerely".into()],
            },
            DocumentTypeRule {
                document_type: "handwritten_note".into(),
                priority: 3,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![r"note|memo".into()],
                content_keywords: vec![],
            },
        ];

        // Patterns above are compile-checked by tests; builtin() cannot fail.
        Self::compile(rules).expect("builtin rule table must compile")
    }

    /// Load an operator-supplied table. Order in the JSON array is match
    /// order.
    pub fn from_json(json: &str) -> Result<Self, AdmissionError> {
        let rules: Vec<DocumentTypeRule> = serde_json::from_str(json)
            .map_err(|e| AdmissionError::InvalidRule(e.to_string()))?;
        Self::compile(rules)
    }

    fn compile(rules: Vec<DocumentTypeRule>) -> Result<Self, AdmissionError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut patterns = Vec::with_capacity(rule.filename_patterns.len());
            for pattern in &rule.filename_patterns {
                let regex = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                    AdmissionError::InvalidRule(format!(
                        "{}: bad pattern {pattern:?}: {e}",
                        rule.document_type
                    ))
                })?;
                patterns.push(regex);
            }
            compiled.push(CompiledRule { rule, patterns });
        }

        Ok(Self {
            rules: compiled,
            fallback: DocumentTypeRule {
                document_type: "unclassified".into(),
                priority: 5,
                requires_ocr: true,
                requires_human_review: false,
                filename_patterns: vec![],
                content_keywords: vec![],
            },
        })
    }

    /// Classify by filename first, then by content keywords.
    pub fn classify(&self, filename: &str, content: Option<&str>) -> &DocumentTypeRule {
        for compiled in &self.rules {
            if compiled.patterns.iter().any(|p| p.is_match(filename)) {
                return &compiled.rule;
            }
        }

        if let Some(content) = content {
            let lower = content.to_lowercase();
            for compiled in &self.rules {
                if compiled
                    .rule
                    .content_keywords
                    .iter()
                    .any(|kw| lower.contains(kw.as_str()))
                {
                    return &compiled.rule;
                }
            }
        }

        &self.fallback
    }

    /// Document types whose rule demands human review.
    pub fn review_types(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|c| c.rule.requires_human_review)
            .map(|c| c.rule.document_type.as_str())
            .collect()
    }

    /// Look up a rule by type name (fallback included).
    pub fn rule_for(&self, document_type: &str) -> Option<&DocumentTypeRule> {
        if document_type == self.fallback.document_type {
            return Some(&self.fallback);
        }
        self.rules
            .iter()
            .map(|c| &c.rule)
            .find(|r| r.document_type == document_type)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}
