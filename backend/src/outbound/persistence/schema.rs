//! Diesel table definitions; must match `migrations/`.

diesel::table! {
    /// Keyed items. `attributes` holds the tagged attribute map without
    /// the key attributes, which live in `pk` and `sk`.
    items (pk, sk) {
        pk -> Text,
        sk -> Text,
        attributes -> Jsonb,
        updated_at -> Timestamptz,
    }
}
