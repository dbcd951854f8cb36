use std::collections::BTreeMap;

use patter_core::domain::action::{OutcomeKind, ParamMap};

/// Reply wording per (action, outcome). Failure entries stay scoped to the
/// attempted action; blanket apologies are reserved for configuration and
/// storage errors upstream.
#[derive(Clone, Debug)]
pub struct ResponseTemplates {
    entries: BTreeMap<(String, OutcomeKind), String>,
}

impl ResponseTemplates {
    pub fn new(entries: BTreeMap<(String, OutcomeKind), String>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        let mut put = |action: &str, kind: OutcomeKind, text: &str| {
            entries.insert((action.to_string(), kind), text.to_string());
        };

        put("product_search", OutcomeKind::Success, "Here's what I found for \"{query}\".");
        put(
            "product_search",
            OutcomeKind::Empty,
            "I couldn't find anything matching \"{query}\". Want to try different words?",
        );
        put("product_search", OutcomeKind::Failure, "I couldn't run that search right now.");

        put("add_to_cart", OutcomeKind::Success, "Added {product_id} ({size}, {color}) to your cart.");
        put("add_to_cart", OutcomeKind::Empty, "That product isn't available at the moment.");
        put("add_to_cart", OutcomeKind::Failure, "I couldn't add that to your cart.");

        put("view_cart", OutcomeKind::Success, "Here's your cart.");
        put("view_cart", OutcomeKind::Empty, "Your cart is empty.");
        put("view_cart", OutcomeKind::Failure, "I couldn't open your cart right now.");

        put("remove_from_cart", OutcomeKind::Success, "Removed {product_id} from your cart.");
        put("remove_from_cart", OutcomeKind::Empty, "{product_id} wasn't in your cart.");
        put("remove_from_cart", OutcomeKind::Failure, "I couldn't remove that from your cart.");

        put("place_order", OutcomeKind::Success, "Order placed. A confirmation is on its way.");
        put("place_order", OutcomeKind::Empty, "There was nothing in your cart to order.");
        put("place_order", OutcomeKind::Failure, "I couldn't place that order.");

        put("order_status", OutcomeKind::Success, "Here's the latest on order {order_id}.");
        put("order_status", OutcomeKind::Empty, "I couldn't find an order {order_id}.");
        put("order_status", OutcomeKind::Failure, "I couldn't check order {order_id} right now.");

        put("cancel_order", OutcomeKind::Success, "Order {order_id} has been cancelled.");
        put("cancel_order", OutcomeKind::Empty, "I couldn't find an order {order_id}.");
        put("cancel_order", OutcomeKind::Failure, "I couldn't cancel order {order_id}.");

        put(
            "open_support_ticket",
            OutcomeKind::Success,
            "I've passed this to our support team. Someone will follow up with you shortly.",
        );
        put(
            "open_support_ticket",
            OutcomeKind::Failure,
            "I couldn't reach our support team just now, but I'll keep trying.",
        );

        Self::new(entries)
    }

    /// Render the template for (action, kind), substituting `{name}`
    /// placeholders from the dispatched parameters first, then from
    /// top-level payload fields.
    pub fn render(
        &self,
        action: &str,
        kind: OutcomeKind,
        parameters: &ParamMap,
        payload: Option<&serde_json::Value>,
    ) -> String {
        let template = self
            .entries
            .get(&(action.to_string(), kind))
            .cloned()
            .unwrap_or_else(|| default_for(kind).to_string());

        substitute(&template, parameters, payload)
    }
}

impl Default for ResponseTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

fn default_for(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Success => "Done.",
        OutcomeKind::Empty => "I didn't find anything for that.",
        OutcomeKind::Failure => "I couldn't finish that request.",
    }
}

fn substitute(
    template: &str,
    parameters: &ParamMap,
    payload: Option<&serde_json::Value>,
) -> String {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            output.push(ch);
            continue;
        }

        let mut name = String::new();
        let mut closed = false;
        for next in chars.by_ref() {
            if next == '}' {
                closed = true;
                break;
            }
            name.push(next);
        }

        if !closed {
            output.push('{');
            output.push_str(&name);
            continue;
        }

        if let Some(value) = parameters.get(&name) {
            output.push_str(&value.render());
        } else if let Some(value) = payload.and_then(|p| p.get(&name)) {
            match value {
                serde_json::Value::String(s) => output.push_str(s),
                other => output.push_str(&other.to_string()),
            }
        } else {
            output.push_str("that");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use patter_core::domain::action::{OutcomeKind, ParamMap, ParamValue};

    use super::ResponseTemplates;

    #[test]
    fn renders_parameters_into_placeholders() {
        let templates = ResponseTemplates::builtin();
        let mut params = ParamMap::new();
        params.insert("product_id".to_string(), ParamValue::Text("sku-901".to_string()));
        params.insert("size".to_string(), ParamValue::Choice("m".to_string()));
        params.insert("color".to_string(), ParamValue::Text("black".to_string()));

        let rendered = templates.render("add_to_cart", OutcomeKind::Success, &params, None);
        assert_eq!(rendered, "Added sku-901 (m, black) to your cart.");
    }

    #[test]
    fn falls_back_to_payload_fields() {
        let templates = ResponseTemplates::builtin();
        let payload = serde_json::json!({"order_id": "O-1001"});

        let rendered =
            templates.render("order_status", OutcomeKind::Success, &ParamMap::new(), Some(&payload));
        assert_eq!(rendered, "Here's the latest on order O-1001.");
    }

    #[test]
    fn unknown_action_gets_generic_wording_per_kind() {
        let templates = ResponseTemplates::builtin();
        let rendered =
            templates.render("mystery_action", OutcomeKind::Failure, &ParamMap::new(), None);
        assert_eq!(rendered, "I couldn't finish that request.");
    }

    #[test]
    fn failure_wording_stays_scoped_to_the_action() {
        let templates = ResponseTemplates::builtin();
        let mut params = ParamMap::new();
        params.insert("order_id".to_string(), ParamValue::Text("O-77".to_string()));

        let rendered = templates.render("cancel_order", OutcomeKind::Failure, &params, None);
        assert_eq!(rendered, "I couldn't cancel order O-77.");
    }
}
