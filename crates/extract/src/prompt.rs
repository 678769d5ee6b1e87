use crate::schema::BundleItem;

pub const SYSTEM_PROMPT: &str = "You extract knowledge graphs from clinical laboratory test pages. \
Return compact JSON describing the key domain entities and the relations between them. \
Stay faithful to the text and prefer short, domain-specific predicates.";

/// Build the user prompt for a bundle of items.
pub fn build_bundle_prompt(items: &[BundleItem], max_triples: usize) -> String {
    // Serializing a Vec of plain structs cannot fail
    let payload = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"Extract entities and subject-predicate-object triples from EACH item below.

OUTPUT:
- Return ONLY a JSON array with one object per input item.
- Each object has exactly the keys "id", "entities" and "triples".
- "id" must repeat the id of the input item.

SCHEMA:
- "entities": [{{"name": "...", "type": "...", "aliases": ["..."]}}]
  "aliases" is optional. Useful types: Test, Analyte, Biomarker, Condition, Symptom,
  SampleType, Method, Preparation, Contraindication, TurnaroundTime, Population,
  Organism, Panel, Instrument.
- "triples": [{{"subj": "...", "predicate": "...", "obj": "..."}}]
  Prefer predicates such as "measures", "requires", "sample_type", "method",
  "turnaround_time", "includes", "assesses", "used_for", "detects".

RULES:
- At most {max_triples} triples per item.
- Use surface forms that appear in the text. Do not invent facts.
- No markdown, no explanations.

ITEMS:
{payload}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_items_and_cap() {
        let items = vec![
            BundleItem {
                id: "q1".to_string(),
                text: "Ferritin measures \"iron stores\".".to_string(),
            },
            BundleItem {
                id: "q2".to_string(),
                text: "Serum sample.".to_string(),
            },
        ];

        let prompt = build_bundle_prompt(&items, 5);

        assert!(prompt.contains("At most 5 triples per item."));
        assert!(prompt.contains(r#"{"id":"q1","text":"Ferritin measures \"iron stores\"."}"#));
        assert!(prompt.contains(r#""id":"q2""#));
        assert!(prompt.contains(r#"{"subj": "...", "predicate": "...", "obj": "..."}"#));
    }
}
