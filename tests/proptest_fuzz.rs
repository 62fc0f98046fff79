//! Property-based tests for the codecs, the cipher and the query builders.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::Value;

use user_pipeline::crypto::{CryptoError, FieldCipher, FieldEncryptor, IV_SIZE};
use user_pipeline::entity::{time_from_epoch, to_entity};
use user_pipeline::filter::{Filter, SelectQuery, SortOrder};
use user_pipeline::pagination::{pagination_parameters, DEFAULT_PAGE_SIZE};
use user_pipeline::record::{self, RawRecord};

// =============================================================================
// Strategies
// =============================================================================

fn valid_key() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 32),
        prop::collection::vec(any::<u8>(), 64),
    ]
}

fn invalid_key() -> impl Strategy<Value = Vec<u8>> {
    (0usize..128)
        .prop_filter("valid AES key length", |n| ![16, 32, 64].contains(n))
        .prop_flat_map(|n| prop::collection::vec(any::<u8>(), n))
}

fn arbitrary_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("Id".to_string()),
                    Just("Email".to_string()),
                    Just("CreatedAt".to_string()),
                    "[A-Za-z]{1,10}",
                ],
                inner,
                0..8
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn raw_record() -> impl Strategy<Value = RawRecord> {
    (
        any::<i64>(),
        "[A-Za-z ]{0,20}",
        "[A-Za-z ]{0,20}",
        "[a-z0-9.]{1,20}@[a-z]{1,10}\\.com",
        any::<i64>(),
        any::<i64>(),
    )
        .prop_map(|(id, first_name, last_name, email, parent_user_id, created_at)| RawRecord {
            id,
            first_name,
            last_name,
            email,
            parent_user_id,
            created_at,
            ..Default::default()
        })
}

// =============================================================================
// Cipher
// =============================================================================

proptest! {
    #[test]
    fn cipher_round_trips_for_valid_keys(key in valid_key(), plaintext in ".*") {
        let cipher = FieldCipher::new(&key).unwrap();
        let sealed = cipher.encrypt(&plaintext).unwrap();
        prop_assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn cipher_rejects_invalid_key_lengths(key in invalid_key()) {
        let err = FieldCipher::new(&key).unwrap_err();
        if key.is_empty() {
            prop_assert!(matches!(err, CryptoError::EmptyKey));
        } else {
            prop_assert!(matches!(err, CryptoError::InvalidKeyLength(n) if n == key.len()));
        }
    }

    #[test]
    fn encrypt_never_repeats_iv(plaintext in ".{0,64}") {
        let cipher = FieldCipher::new(&[7u8; 32]).unwrap();
        prop_assert_ne!(cipher.encrypt(&plaintext).unwrap(), cipher.encrypt(&plaintext).unwrap());
    }

    #[test]
    fn decrypt_short_input_is_corrupt_not_panic(
        bytes in prop::collection::vec(any::<u8>(), 0..IV_SIZE),
    ) {
        use base64::Engine;
        let cipher = FieldCipher::new(&[1u8; 16]).unwrap();
        let text = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let result = cipher.decrypt(&text);
        let is_corrupt = matches!(result, Err(CryptoError::CorruptCiphertext { .. }));
        prop_assert!(is_corrupt);
    }

    #[test]
    fn decrypt_arbitrary_text_never_panics(text in ".*") {
        let cipher = FieldCipher::new(&[1u8; 16]).unwrap();
        let _ = cipher.decrypt(&text);
    }
}

// =============================================================================
// Record codec and transform
// =============================================================================

proptest! {
    #[test]
    fn decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = record::decode(&bytes);
    }

    #[test]
    fn decode_arbitrary_json_never_panics(value in arbitrary_json()) {
        let bytes = serde_json::to_vec(&value).unwrap();
        let _ = record::decode(&bytes);
    }

    #[test]
    fn encoded_records_decode(raw in raw_record()) {
        let bytes = record::encode(&raw).unwrap();
        prop_assert_eq!(record::decode(&bytes).unwrap(), raw);
    }

    #[test]
    fn parse_row_never_panics(fields in prop::collection::vec(".{0,16}", 0..12)) {
        let _ = record::parse_row(&fields);
    }

    #[test]
    fn parse_row_accepts_any_prefix_with_valid_id(id in any::<i64>(), len in 1usize..=8) {
        let mut full: Vec<String> = vec![id.to_string()];
        full.extend(["F", "L", "e@x", "1", "2", "3", "4"].map(String::from));
        let raw = record::parse_row(&full[..len]).unwrap();
        prop_assert_eq!(raw.id, id);
    }

    #[test]
    fn non_positive_epochs_have_no_timestamp(epoch in i64::MIN..=0) {
        prop_assert!(time_from_epoch(epoch).is_none());
    }

    #[test]
    fn to_entity_never_fails(raw in raw_record()) {
        let parent = raw.parent_user_id;
        let user = to_entity(raw);
        prop_assert_eq!(user.id, 0);
        prop_assert_eq!(user.parent_user_id.is_some(), parent >= 0);
    }
}

// =============================================================================
// Pagination and filters
// =============================================================================

proptest! {
    #[test]
    fn negative_pagination_rejected(page in i64::MIN..0, size in any::<i64>()) {
        prop_assert!(pagination_parameters(&page.to_string(), &size.to_string()).is_err());
        prop_assert!(pagination_parameters(&size.to_string(), &page.to_string()).is_err());
    }

    #[test]
    fn pagination_limit_offset(page in 0u64..10_000, size in 0u64..1_000) {
        let (params, query) = pagination_parameters(&page.to_string(), &size.to_string()).unwrap();
        let expected_size = if size == 0 { DEFAULT_PAGE_SIZE } else { size };
        prop_assert_eq!(query.page_size, expected_size);
        prop_assert_eq!(params.limit, expected_size);
        prop_assert_eq!(params.offset, page * expected_size);
    }

    #[test]
    fn count_queries_never_order(
        field in "[a-z_]{1,12}",
        value in any::<i64>(),
        desc in any::<bool>(),
    ) {
        let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
        let filters = [Filter::gte(&field, value), Filter::sort(&field, order)];

        let (count_sql, count_args) = SelectQuery::new("COUNT(*)", "users")
            .apply_filters(&filters, true)
            .to_sql();
        let (rows_sql, rows_args) = SelectQuery::new("*", "users")
            .apply_filters(&filters, false)
            .to_sql();

        prop_assert!(!count_sql.contains("ORDER BY"));
        prop_assert!(rows_sql.contains("ORDER BY"));
        prop_assert_eq!(count_args, rows_args);
    }

    #[test]
    fn hostile_field_names_never_reach_sql(field in ".*[^A-Za-z0-9_.].*") {
        let (sql, args) = SelectQuery::new("*", "users")
            .apply_filters(&[Filter::eq(&field, "x"), Filter::sort(&field, SortOrder::Asc)], false)
            .to_sql();
        prop_assert_eq!(sql, "SELECT * FROM users");
        prop_assert!(args.is_empty());
    }
}
