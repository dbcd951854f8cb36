use serde::{Deserialize, Serialize};

/// One presentational unit of a reply. The transport decides how each unit
/// is rendered; the core only orders them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum MessageUnit {
    Text { text: String },
    /// Ask the user for exactly one missing parameter.
    Prompt { parameter: String, text: String },
    /// Structured payload returned by a collaborator, referenced by the
    /// action that produced it.
    Data { source_action: String, payload: serde_json::Value },
    TicketConfirmation { ticket_reference: String },
}

/// Ordered reply for one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePlan {
    pub units: Vec<MessageUnit>,
}

impl ResponsePlan {
    pub fn text(text: impl Into<String>) -> Self {
        Self { units: vec![MessageUnit::Text { text: text.into() }] }
    }

    pub fn prompt_for(parameter: impl Into<String>, text: impl Into<String>) -> Self {
        Self { units: vec![MessageUnit::Prompt { parameter: parameter.into(), text: text.into() }] }
    }

    pub fn push(&mut self, unit: MessageUnit) {
        self.units.push(unit);
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Short single-line rendering stored on the turn record.
    pub fn summary(&self) -> String {
        self.units
            .iter()
            .map(|unit| match unit {
                MessageUnit::Text { text } => text.clone(),
                MessageUnit::Prompt { text, .. } => text.clone(),
                MessageUnit::Data { source_action, .. } => format!("[data:{source_action}]"),
                MessageUnit::TicketConfirmation { ticket_reference } => {
                    format!("[ticket:{ticket_reference}]")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageUnit, ResponsePlan};

    #[test]
    fn summary_flattens_units_in_order() {
        let mut plan = ResponsePlan::text("Added to cart.");
        plan.push(MessageUnit::Data {
            source_action: "add_to_cart".to_string(),
            payload: serde_json::json!({"cart_size": 2}),
        });
        plan.push(MessageUnit::TicketConfirmation { ticket_reference: "T-77".to_string() });

        assert_eq!(plan.summary(), "Added to cart. [data:add_to_cart] [ticket:T-77]");
    }
}
