use crate::domain::action::{
    ActionTemplate, CollaboratorBinding, ContextFill, ParamSpec,
};

/// Designated slot-answer intent: entities from these turns feed the
/// pending action instead of starting a new one.
pub const INTENT_INFORM: &str = "inform";
/// Explicit abort of the in-progress action.
pub const INTENT_CANCEL: &str = "cancel";
/// Explicit request for a human.
pub const INTENT_HUMAN_HANDOFF: &str = "human_handoff";

/// Internal template used by the escalation path; never resolved from a
/// user intent.
pub const ACTION_OPEN_TICKET: &str = "open_support_ticket";

/// The declared set of actions the dialogue can execute. Intent names map
/// 1:1 onto template names; anything else routes to fallback.
#[derive(Clone, Debug)]
pub struct ActionCatalog {
    templates: Vec<ActionTemplate>,
}

impl ActionCatalog {
    pub fn new(templates: Vec<ActionTemplate>) -> Self {
        Self { templates }
    }

    /// Shopping-assistant actions served by the commerce resource API, plus
    /// the internal ticketing action.
    pub fn builtin() -> Self {
        Self::new(vec![
            ActionTemplate {
                name: "product_search".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: false,
                params: vec![
                    ParamSpec::required_text("query", "What are you looking for?")
                        .with_context_fill(ContextFill::LastQuery),
                    ParamSpec {
                        name: "category".to_string(),
                        kind: crate::domain::action::ParamKind::Text,
                        required: false,
                        context_fill: None,
                        prompt: "Any particular category?".to_string(),
                    },
                ],
            },
            ActionTemplate {
                name: "add_to_cart".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: true,
                params: vec![
                    ParamSpec::required_text("product_id", "Which product should I add?")
                        .with_context_fill(ContextFill::LastReferencedEntity),
                    ParamSpec::required_choice(
                        "size",
                        &["xs", "s", "m", "l", "xl"],
                        "Which size would you like?",
                    ),
                    ParamSpec::required_text("color", "Which color would you like?"),
                    ParamSpec::optional_number("quantity", "How many?"),
                ],
            },
            ActionTemplate {
                name: "view_cart".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: false,
                params: Vec::new(),
            },
            ActionTemplate {
                name: "remove_from_cart".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: true,
                params: vec![ParamSpec::required_text(
                    "product_id",
                    "Which product should I remove?",
                )
                .with_context_fill(ContextFill::LastReferencedEntity)],
            },
            ActionTemplate {
                name: "place_order".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: true,
                params: vec![ParamSpec::required_choice(
                    "payment_method",
                    &["card", "paypal", "invoice"],
                    "How would you like to pay?",
                )],
            },
            ActionTemplate {
                name: "order_status".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: false,
                params: vec![ParamSpec::required_text(
                    "order_id",
                    "Which order number should I look up?",
                )],
            },
            ActionTemplate {
                name: "cancel_order".to_string(),
                binding: CollaboratorBinding::Commerce,
                mutating: true,
                params: vec![ParamSpec::required_text(
                    "order_id",
                    "Which order number should I cancel?",
                )],
            },
            ActionTemplate {
                name: ACTION_OPEN_TICKET.to_string(),
                binding: CollaboratorBinding::Ticketing,
                mutating: true,
                params: vec![
                    ParamSpec::required_text("subject", "What is the issue?"),
                    ParamSpec::required_text("message", "Tell me more."),
                    ParamSpec::required_choice("severity", &["low", "normal", "high"], ""),
                ],
            },
        ])
    }

    pub fn get(&self, action_name: &str) -> Option<&ActionTemplate> {
        self.templates.iter().find(|template| template.name == action_name)
    }

    /// Map a classified intent to an action template. Reserved dialogue
    /// intents (`inform`, `cancel`, `human_handoff`) and the internal
    /// ticketing action never resolve here.
    pub fn resolve_intent(&self, intent: &str) -> Option<&ActionTemplate> {
        if matches!(intent, INTENT_INFORM | INTENT_CANCEL | INTENT_HUMAN_HANDOFF)
            || intent == ACTION_OPEN_TICKET
        {
            return None;
        }
        self.get(intent)
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
