//! Property-based test generators using proptest.
//!
//! Provides strategies for quotation states, content fields and whole
//! records.

use proptest::prelude::*;
use quotesync_protocol::{Fields, Quotation, QuotationId, QuotationState, ResolutionStrategy};
use serde_json::Value;
use uuid::Uuid;

/// Strategy for any lifecycle state.
pub fn state_strategy() -> impl Strategy<Value = QuotationState> {
    prop::sample::select(QuotationState::ALL.to_vec())
}

/// Strategy for a (from, to) pair that is NOT in the transition table.
pub fn invalid_transition_strategy() -> impl Strategy<Value = (QuotationState, QuotationState)> {
    (state_strategy(), state_strategy()).prop_filter("transition must be invalid", |(from, to)| {
        !from.can_transition_to(*to)
    })
}

/// Strategy for a (from, to) pair that IS in the transition table.
pub fn valid_transition_strategy() -> impl Strategy<Value = (QuotationState, QuotationState)> {
    state_strategy().prop_flat_map(|from| {
        (
            Just(from),
            prop::sample::select(from.allowed_targets().to_vec()),
        )
    })
}

/// Strategy for any resolution strategy.
pub fn resolution_strategy() -> impl Strategy<Value = ResolutionStrategy> {
    prop::sample::select(ResolutionStrategy::ALL.to_vec())
}

/// Strategy for watched-field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "empresa", "contacto", "telefono", "items", "subtotal", "iva", "total", "notas",
    ])
    .prop_map(str::to_string)
}

/// Strategy for JSON field values, including arrays and nested objects.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z ]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..3)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for a content field map.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 0..6)
}

/// Strategy for a whole quotation.
pub fn quotation_strategy() -> impl Strategy<Value = Quotation> {
    (
        any::<u128>(),
        1u64..50,
        state_strategy(),
        "[a-z]{1,8}@example\\.com",
        fields_strategy(),
    )
        .prop_map(|(id, version, state, client, fields)| {
            let mut record =
                Quotation::new(QuotationId::from_uuid(Uuid::from_u128(id)), client, fields);
            record.version = version;
            record.state = state;
            record
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn invalid_pairs_are_outside_table((from, to) in invalid_transition_strategy()) {
            prop_assert!(!from.allowed_targets().contains(&to));
        }

        #[test]
        fn valid_pairs_are_inside_table((from, to) in valid_transition_strategy()) {
            prop_assert!(from.can_transition_to(to));
        }

        #[test]
        fn generated_quotations_have_positive_version(q in quotation_strategy()) {
            prop_assert!(q.version >= 1);
            prop_assert!(q.client_email.ends_with("@example.com"));
        }
    }
}
