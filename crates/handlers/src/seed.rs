//! Built-in handler definitions.
//!
//! These ship as data, exactly as an operator would register them over the
//! API. The gateway loads them in demo mode and the integration tests
//! route against them.

use std::collections::HashMap;

use serde_json::json;

use sw_domain::tool::ToolSpec;

use crate::definition::{HandlerDefinition, PatternKind, SlotDefinition, TriggerPattern};

fn kw(value: &str, boost: f32) -> TriggerPattern {
    TriggerPattern {
        kind: PatternKind::Keyword,
        value: value.into(),
        boost,
    }
}

fn prefix(value: &str, boost: f32) -> TriggerPattern {
    TriggerPattern {
        kind: PatternKind::Prefix,
        value: value.into(),
        boost,
    }
}

fn semantic(value: &str) -> TriggerPattern {
    TriggerPattern {
        kind: PatternKind::Semantic,
        value: value.into(),
        boost: 0.0,
    }
}

pub fn package_tracking() -> HandlerDefinition {
    let mut def = HandlerDefinition::new(
        "PackageTracking",
        "Looks up the shipping status and delivery estimate for an existing order.",
    );
    def.patterns = vec![
        kw("track", 0.2),
        kw("order", 0.15),
        kw("package", 0.2),
        kw("delivery", 0.15),
        prefix("where is my order", 0.1),
        semantic("find out when my delivery arrives"),
    ];
    def.slots = vec![
        SlotDefinition {
            name: "order_number".into(),
            required: true,
            validation_regex: Some(r"^(?i)(?:OD)?\d{7,10}$".into()),
            description: "the order number from your confirmation email".into(),
            examples: vec!["OD1234567".into()],
            aliases: vec!["tracking number".into(), "order id".into()],
            max_attempts: 3,
            error_message: None,
        },
        SlotDefinition {
            name: "zip_code".into(),
            required: true,
            validation_regex: Some(r"^\d{5}(?:-\d{4})?$".into()),
            description: "the billing zip code on the order".into(),
            examples: vec!["02108".into()],
            aliases: vec!["postal code".into()],
            max_attempts: 3,
            error_message: Some(
                "That doesn't look right. Please provide a valid 5-digit zip code.".into(),
            ),
        },
    ];
    def.tools = vec![ToolSpec {
        name: "track_order".into(),
        description: "Look up a shipment by order number and billing zip.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "order_number": { "type": "string" },
                "zip_code": { "type": "string" }
            },
            "required": ["order_number", "zip_code"]
        }),
    }];
    def.response_templates = HashMap::from([
        (
            "success".into(),
            "Order {{order_number}} is {{tool.track_order.status}} and should arrive {{tool.track_order.eta}}.".into(),
        ),
        (
            "handoff".into(),
            "I wasn't able to collect what I need to look up your order. Let me connect you with a specialist who can help.".into(),
        ),
        (
            "out_of_scope".into(),
            "I can help with orders, deliveries and store questions. For anything else, please reach out to the right team.".into(),
        ),
    ]);
    def.example_utterances = vec![
        "where is my order".into(),
        "track my package".into(),
        "has my delivery shipped yet".into(),
    ];
    def
}

pub fn store_locator() -> HandlerDefinition {
    let mut def = HandlerDefinition::new(
        "StoreLocator",
        "Finds the nearest store and its hours for a city or zip code.",
    );
    def.patterns = vec![
        kw("store", 0.2),
        kw("location", 0.1),
        kw("hours", 0.1),
        prefix("find a store", 0.1),
        semantic("which store is closest to me"),
    ];
    def.slots = vec![SlotDefinition {
        name: "city".into(),
        required: true,
        validation_regex: None,
        description: "the city to search near".into(),
        examples: vec!["Boston".into()],
        aliases: vec!["town".into()],
        max_attempts: 3,
        error_message: None,
    }];
    def.tools = vec![ToolSpec {
        name: "find_store".into(),
        description: "Find the nearest store to a city.".into(),
        parameters: json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        }),
    }];
    def.response_templates = HashMap::from([
        (
            "success".into(),
            "Your nearest store is {{tool.find_store.name}} at {{tool.find_store.address}}, open until {{tool.find_store.closes}}.".into(),
        ),
        (
            "handoff".into(),
            "I couldn't pin down a location to search. Let me connect you with someone who can help.".into(),
        ),
    ]);
    def.example_utterances = vec![
        "find a store near me".into(),
        "what are the store hours in Boston".into(),
    ];
    def
}

pub fn reset_password() -> HandlerDefinition {
    let mut def = HandlerDefinition::new(
        "ResetPassword",
        "Sends password reset instructions to the email on the account.",
    );
    def.patterns = vec![
        kw("password", 0.2),
        kw("reset", 0.15),
        kw("login", 0.1),
        prefix("reset my password", 0.1),
        semantic("I cannot sign in to my account"),
    ];
    def.slots = vec![SlotDefinition {
        name: "email".into(),
        required: true,
        validation_regex: Some(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$".into()),
        description: "the email address on your account".into(),
        examples: vec!["joe@example.com".into()],
        aliases: vec!["email address".into()],
        max_attempts: 3,
        error_message: None,
    }];
    def.response_templates = HashMap::from([
        (
            "success".into(),
            "I've sent password reset instructions to {{email}}. The link expires in 30 minutes.".into(),
        ),
        (
            "handoff".into(),
            "I couldn't verify an email address for the reset. Let me connect you with account support.".into(),
        ),
    ]);
    def.example_utterances = vec![
        "I want to reset my password".into(),
        "forgot my password".into(),
        "can't log in to my account".into(),
    ];
    def
}

/// All built-in handlers.
pub fn all() -> Vec<HandlerDefinition> {
    vec![package_tracking(), store_locator(), reset_password()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_validate() {
        for def in all() {
            def.validate().unwrap_or_else(|e| panic!("{}: {e}", def.name));
        }
    }

    #[test]
    fn seeds_have_handoff_templates() {
        for def in all() {
            assert!(
                def.template("handoff").is_some(),
                "{} missing handoff template",
                def.name
            );
            assert!(def.template("success").is_some());
        }
    }

    #[test]
    fn seed_names_are_unique() {
        let mut names: Vec<String> = all().iter().map(|d| d.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
