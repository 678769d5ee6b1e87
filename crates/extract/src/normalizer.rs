use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::schema::{ExtractedEntity, ExtractedTriple, ExtractionRecord};

// ASCII hyphen plus the Unicode dash family, including the minus sign and
// the small/fullwidth hyphen-minus forms.
static HYPHENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{2010}-\x{2015}\x{2212}\x{FE58}\x{FE63}\x{FF0D}\-]+").expect("hyphen pattern")
});
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s\-+&/]").expect("allow-list pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Normalize a free-text name into its deduplication key.
///
/// Lowercases, folds every hyphen/dash variant, keeps only `[a-z0-9]`,
/// whitespace, `-`, `+`, `&` and `/`, and collapses whitespace. A hyphen
/// joins words the same way a space does, so `Iron-Binding` and
/// `iron binding` share a key. The function is idempotent.
pub fn canonical_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let unhyphenated = HYPHENS.replace_all(&lowered, " ");
    let allowed = DISALLOWED.replace_all(&unhyphenated, "");
    WHITESPACE.replace_all(&allowed, " ").trim().to_string()
}

/// Turn one raw backend item into a validated record.
///
/// Every field is treated as untrusted: anything of the wrong shape is
/// dropped, never reported. The output depends only on the input.
pub fn normalize_extraction(chunk_id: &str, raw: &Value) -> ExtractionRecord {
    ExtractionRecord {
        chunk_id: chunk_id.to_string(),
        entities: normalize_entities(array_field(raw, "entities")),
        triples: normalize_triples(array_field(raw, "triples")),
    }
}

fn normalize_entities(raw: &[Value]) -> Vec<ExtractedEntity> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for entity in raw {
        let Some(name) = text_field(entity, "name") else {
            continue;
        };
        let canonical = canonical_name(name);
        // First occurrence of a canonical name wins
        if canonical.is_empty() || !seen.insert(canonical.clone()) {
            continue;
        }

        entities.push(ExtractedEntity {
            name: name.to_string(),
            canonical_name: canonical,
            types: string_list(entity.get("type")),
            aliases: string_list(entity.get("aliases")),
        });
    }

    entities
}

fn normalize_triples(raw: &[Value]) -> Vec<ExtractedTriple> {
    raw.iter()
        .filter_map(|triple| {
            let subject = text_field(triple, "subj").or_else(|| text_field(triple, "subject"))?;
            let predicate = text_field(triple, "predicate")?;
            let object = text_field(triple, "obj").or_else(|| text_field(triple, "object"))?;

            Some(ExtractedTriple {
                subject: subject.to_string(),
                subject_canonical: canonical_name(subject),
                predicate: predicate.to_lowercase(),
                object: object.to_string(),
                object_canonical: canonical_name(object),
            })
        })
        .collect()
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// A trimmed, non-empty string field.
fn text_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Accepts a single string or an array of strings.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let trimmed = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match value {
        Some(Value::Array(items)) => items.iter().filter_map(trimmed).collect(),
        Some(v) => trimmed(v).into_iter().collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_name_variants_agree() {
        let expected = canonical_name("iron binding capacity");

        assert_eq!(expected, "iron binding capacity");
        assert_eq!(canonical_name(" Iron-Binding Capacity "), expected);
        assert_eq!(canonical_name("Iron\u{2011}Binding Capacity"), expected);
        assert_eq!(canonical_name("Iron\u{2013}Binding Capacity"), expected);
        assert_eq!(canonical_name("IRON -- BINDING\tcapacity"), expected);
    }

    #[test]
    fn test_canonical_name_allow_list() {
        assert_eq!(canonical_name("T3 (Free), Serum!"), "t3 free serum");
        assert_eq!(canonical_name("Lipid Panel + A1c"), "lipid panel + a1c");
        assert_eq!(canonical_name("AST/ALT Ratio"), "ast/alt ratio");
        assert_eq!(canonical_name("B&W"), "b&w");
        assert_eq!(canonical_name("Café"), "caf");
        assert_eq!(canonical_name("!!!"), "");
        assert_eq!(canonical_name("   "), "");
    }

    #[test]
    fn test_canonical_name_is_idempotent() {
        let inputs = [
            " Iron-Binding Capacity ",
            "a!-b",
            "x\u{2212}\u{2212}y",
            "--leading and trailing--",
            "İstanbul Ünited",
            "Vitamin B-12 / Cobalamin",
            "tabs\tand\nnewlines\u{3000}here",
            "+-&/",
        ];

        for input in inputs {
            let once = canonical_name(input);
            assert_eq!(canonical_name(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_entities_dedupe_first_wins() {
        let raw = json!({
            "entities": [
                {"name": "Ferritin", "type": "Analyte", "aliases": [" FER ", "", 7]},
                {"name": "ferritin", "type": "Test"},
                {"name": "  "},
                {"name": "???"},
                {"name": 42},
                "not an object",
                {"name": "Iron Stores", "type": ["Condition", " "]}
            ]
        });

        let record = normalize_extraction("c1", &raw);

        assert_eq!(record.chunk_id, "c1");
        assert_eq!(record.entities.len(), 2);
        assert_eq!(record.entities[0].name, "Ferritin");
        assert_eq!(record.entities[0].canonical_name, "ferritin");
        assert_eq!(record.entities[0].types, vec!["Analyte"]);
        assert_eq!(record.entities[0].aliases, vec!["FER"]);
        assert_eq!(record.entities[1].canonical_name, "iron stores");
        assert_eq!(record.entities[1].types, vec!["Condition"]);
        assert!(record.entities[1].aliases.is_empty());
    }

    #[test]
    fn test_triples_require_all_parts() {
        let raw = json!({
            "triples": [
                {"subj": " Ferritin ", "predicate": "MEASURES", "obj": "Iron Stores"},
                {"subj": "Ferritin", "predicate": "measures", "obj": "iron stores"},
                {"subj": "Ferritin", "predicate": " ", "obj": "Iron"},
                {"subj": "Ferritin", "obj": "Iron"},
                {"subject": "CBC", "predicate": "Includes", "object": "Hemoglobin"},
                {"subj": null, "predicate": "x", "obj": "y"}
            ]
        });

        let record = normalize_extraction("c1", &raw);

        // Repeats are kept; merge resolves them
        assert_eq!(record.triples.len(), 3);
        let first = &record.triples[0];
        assert_eq!(first.subject, "Ferritin");
        assert_eq!(first.subject_canonical, "ferritin");
        assert_eq!(first.predicate, "measures");
        assert_eq!(first.object_canonical, "iron stores");
        assert_eq!(record.triples[1].object_canonical, "iron stores");
        assert_eq!(record.triples[2].predicate, "includes");
        assert_eq!(record.triples[2].object_canonical, "hemoglobin");
    }

    #[test]
    fn test_garbage_input_yields_empty_record() {
        for raw in [
            Value::Null,
            json!("text"),
            json!([1, 2, 3]),
            json!({"entities": "nope", "triples": {"subj": "a"}}),
        ] {
            let record = normalize_extraction("c9", &raw);
            assert!(record.is_empty());
            assert_eq!(record.chunk_id, "c9");
        }
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let raw = json!({
            "entities": [{"name": "CBC"}, {"name": "Hemoglobin", "aliases": ["Hgb"]}],
            "triples": [{"subj": "CBC", "predicate": "includes", "obj": "Hemoglobin"}]
        });

        assert_eq!(normalize_extraction("c", &raw), normalize_extraction("c", &raw));
    }
}
