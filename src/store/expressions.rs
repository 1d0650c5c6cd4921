//! Rendering of paths, updates and conditions into DynamoDB expressions.
//!
//! Every path segment goes through a `#nX` name placeholder, so item ids,
//! index values and reserved words never reach the expression text.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

use super::{AttributePath, Condition, SetAction};

#[derive(Debug, Default)]
pub(crate) struct ExpressionBuilder {
    names: HashMap<String, String>,
    placeholders: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl ExpressionBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Placeholder for one path segment, reused for repeated segments
    pub(crate) fn name(&mut self, segment: &str) -> String {
        if let Some(placeholder) = self.placeholders.get(segment) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.placeholders.len());
        let _ = self
            .placeholders
            .insert(segment.to_string(), placeholder.clone());
        let _ = self.names.insert(placeholder.clone(), segment.to_string());
        placeholder
    }

    pub(crate) fn path(&mut self, path: &AttributePath) -> String {
        path.segments()
            .iter()
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub(crate) fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        let _ = self.values.insert(placeholder.clone(), value);
        placeholder
    }

    pub(crate) fn update(&mut self, sets: &[SetAction], removes: &[AttributePath]) -> String {
        let mut clauses = Vec::with_capacity(2);

        if !sets.is_empty() {
            let actions: Vec<String> = sets
                .iter()
                .map(|action| match action {
                    SetAction::Assign(path, value) => {
                        let path = self.path(path);
                        let value = self.value(value.clone());
                        format!("{path} = {value}")
                    }
                    SetAction::AssignIfNotExists(path, value) => {
                        let path = self.path(path);
                        let value = self.value(value.clone());
                        format!("{path} = if_not_exists({path}, {value})")
                    }
                    SetAction::Increment(path, delta) => {
                        let path = self.path(path);
                        let value = self.value(AttributeValue::N(delta.to_string()));
                        format!("{path} = {path} + {value}")
                    }
                })
                .collect();
            clauses.push(format!("SET {}", actions.join(", ")));
        }

        if !removes.is_empty() {
            let paths: Vec<String> = removes.iter().map(|path| self.path(path)).collect();
            clauses.push(format!("REMOVE {}", paths.join(", ")));
        }

        clauses.join(" ")
    }

    pub(crate) fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Exists(path) => format!("attribute_exists({})", self.path(path)),
            Condition::NotExists(path) => format!("attribute_not_exists({})", self.path(path)),
            Condition::Equals(path, value) => {
                let path = self.path(path);
                let value = self.value(value.clone());
                format!("{path} = {value}")
            }
            Condition::LessThan(path, value) => {
                let path = self.path(path);
                let value = self.value(value.clone());
                format!("{path} < {value}")
            }
            Condition::And(conditions) => conditions
                .iter()
                .map(|condition| format!("({})", self.condition(condition)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Projection over the given paths, `None` when nothing is projected
    pub(crate) fn projection(&mut self, paths: &[AttributePath]) -> Option<String> {
        if paths.is_empty() {
            return None;
        }
        Some(
            paths
                .iter()
                .map(|path| self.path(path))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// Placeholder tables; empty tables are `None` because DynamoDB rejects them
    pub(crate) fn build(
        self,
    ) -> (
        Option<HashMap<String, String>>,
        Option<HashMap<String, AttributeValue>>,
    ) {
        let names = (!self.names.is_empty()).then_some(self.names);
        let values = (!self.values.is_empty()).then_some(self.values);
        (names, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_expression() {
        let mut builder = ExpressionBuilder::new();
        let sets = vec![
            SetAction::Assign(
                AttributePath::new("item_map3").child("t1_7"),
                AttributeValue::M(HashMap::new()),
            ),
            SetAction::Increment(AttributePath::new("item_count"), -1),
        ];
        let removes = vec![AttributePath::new("tags").child("PERSON").child("t1_7")];

        let expression = builder.update(&sets, &removes);
        assert_eq!(
            expression,
            "SET #n0.#n1 = :v0, #n2 = #n2 + :v1 REMOVE #n3.#n4.#n1"
        );

        let (names, values) = builder.build();
        let names = names.unwrap();
        assert_eq!(names["#n1"], "t1_7");
        assert_eq!(names["#n4"], "PERSON");
        assert_eq!(values.unwrap()[":v1"], AttributeValue::N("-1".into()));
    }

    #[test]
    fn test_if_not_exists_and_condition() {
        let mut builder = ExpressionBuilder::new();
        let expression = builder.update(
            &[SetAction::AssignIfNotExists(
                AttributePath::new("tags"),
                AttributeValue::M(HashMap::new()),
            )],
            &[],
        );
        assert_eq!(expression, "SET #n0 = if_not_exists(#n0, :v0)");

        let condition = builder.condition(&Condition::And(vec![
            Condition::Exists(AttributePath::new("bizId")),
            Condition::NotExists(AttributePath::new("item_version")),
        ]));
        assert_eq!(
            condition,
            "(attribute_exists(#n1)) AND (attribute_not_exists(#n2))"
        );
    }

    #[test]
    fn test_empty_tables_are_omitted() {
        let mut builder = ExpressionBuilder::new();
        assert!(builder.projection(&[]).is_none());
        let (names, values) = builder.build();
        assert!(names.is_none());
        assert!(values.is_none());
    }
}
