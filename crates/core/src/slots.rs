use crate::domain::action::{
    ActionTemplate, ContextFill, ParamKind, ParamMap, ParamValue,
};

/// Context values a template may draw on for parameters marked
/// context-fillable. Anything not marked stays user-supplied only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextDefaults {
    pub last_referenced_entity: Option<String>,
    pub last_query: Option<String>,
}

impl ContextDefaults {
    fn lookup(&self, fill: ContextFill) -> Option<&str> {
        match fill {
            ContextFill::LastReferencedEntity => self.last_referenced_entity.as_deref(),
            ContextFill::LastQuery => self.last_query.as_deref(),
        }
    }
}

/// A supplied value that failed the template's declared shape. Recovered
/// locally by re-prompting, never dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotIssue {
    pub parameter: String,
    pub message: String,
}

/// Result of typing raw classifier entities against a template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoercedEntities {
    pub accepted: ParamMap,
    pub issues: Vec<SlotIssue>,
    /// Entity names the template does not declare; dropped, never forwarded.
    pub ignored: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotResolution {
    Complete { parameters: ParamMap },
    Incomplete { collected: ParamMap, missing: Vec<String> },
}

#[derive(Clone, Debug, Default)]
pub struct SlotFillingEngine;

impl SlotFillingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Type raw classifier entities against the template's declared
    /// parameter set. Unknown keys are rejected rather than passed through.
    pub fn coerce_entities(
        &self,
        template: &ActionTemplate,
        entities: &std::collections::BTreeMap<String, String>,
    ) -> CoercedEntities {
        let mut result = CoercedEntities::default();

        for (name, raw) in entities {
            let Some(spec) = template.param(name) else {
                result.ignored.push(name.clone());
                continue;
            };

            match coerce_value(&spec.kind, raw) {
                Ok(value) => {
                    result.accepted.insert(name.clone(), value);
                }
                Err(message) => {
                    result.issues.push(SlotIssue { parameter: name.clone(), message });
                }
            }
        }

        result
    }

    /// Decide whether the action can dispatch. A parameter is satisfied if
    /// supplied, else if context-fillable and present in context, else
    /// missing. Re-entrant: growing `supplied` only ever moves the result
    /// toward `Complete`; satisfied parameters are never un-satisfied.
    pub fn resolve(
        &self,
        template: &ActionTemplate,
        supplied: &ParamMap,
        context: &ContextDefaults,
    ) -> SlotResolution {
        let mut parameters = ParamMap::new();
        let mut missing = Vec::new();

        for spec in &template.params {
            if let Some(value) = supplied.get(&spec.name) {
                parameters.insert(spec.name.clone(), value.clone());
                continue;
            }

            if let Some(fill) = spec.context_fill {
                if let Some(raw) = context.lookup(fill) {
                    if let Ok(value) = coerce_value(&spec.kind, raw) {
                        parameters.insert(spec.name.clone(), value);
                        continue;
                    }
                }
            }

            if spec.required {
                // Declaration order doubles as the ask-first priority order.
                missing.push(spec.name.clone());
            }
        }

        if missing.is_empty() {
            SlotResolution::Complete { parameters }
        } else {
            SlotResolution::Incomplete { collected: parameters, missing }
        }
    }
}

fn coerce_value(kind: &ParamKind, raw: &str) -> Result<ParamValue, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("value is empty".to_string());
    }

    match kind {
        ParamKind::Text => Ok(ParamValue::Text(trimmed.to_string())),
        ParamKind::Choice { options } => {
            let normalized = trimmed.to_ascii_lowercase();
            options
                .iter()
                .find(|option| option.to_ascii_lowercase() == normalized)
                .map(|option| ParamValue::Choice(option.clone()))
                .ok_or_else(|| format!("expected one of: {}", options.join(", ")))
        }
        ParamKind::Number => trimmed
            .parse::<i64>()
            .map(ParamValue::Number)
            .map_err(|_| "expected a whole number".to_string()),
    }
}
