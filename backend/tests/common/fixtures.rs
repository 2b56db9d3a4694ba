//! Test fixtures: a small restaurant with one row or two in every table.
//!
//! Rows are shaped the way the PostgreSQL store returns them: timestamps as
//! RFC 3339 strings, decimals as JSON numbers, FK columns as plain ids.

use serde_json::json;

use pos_keeper_backend::store::MemoryEntityStore;

use super::record;

pub const CATEGORY_DRINKS: &str = "10000000-0000-4000-8000-000000000001";
pub const CATEGORY_FOOD: &str = "10000000-0000-4000-8000-000000000002";
pub const UNIT_PIECE: &str = "20000000-0000-4000-8000-000000000001";
pub const PAYMENT_CASH: &str = "30000000-0000-4000-8000-000000000001";
pub const EXPENSE_SUPPLIES: &str = "40000000-0000-4000-8000-000000000001";
pub const TABLE_PATIO: &str = "50000000-0000-4000-8000-000000000001";
pub const USER_CASHIER: &str = "60000000-0000-4000-8000-000000000001";
pub const CUSTOMER_ANA: &str = "70000000-0000-4000-8000-000000000001";
pub const DISCOUNT_HAPPY: &str = "80000000-0000-4000-8000-000000000001";
pub const ITEM_COFFEE: &str = "90000000-0000-4000-8000-000000000001";
pub const ITEM_BAGEL: &str = "90000000-0000-4000-8000-000000000002";
pub const VARIANT_LARGE: &str = "a0000000-0000-4000-8000-000000000001";
pub const ORDER_JANUARY: &str = "b0000000-0000-4000-8000-000000000001";
pub const ORDER_FEBRUARY: &str = "b0000000-0000-4000-8000-000000000002";
pub const EXPENSE_MILK: &str = "c0000000-0000-4000-8000-000000000001";
pub const ORDER_ITEM_COFFEE: &str = "d0000000-0000-4000-8000-000000000001";
pub const ORDER_ITEM_BAGEL: &str = "d0000000-0000-4000-8000-000000000002";
pub const PAYMENT_JANUARY: &str = "e0000000-0000-4000-8000-000000000001";

/// Stored for the cashier; must never leave the database
pub const PASSWORD_HASH: &str = "$argon2id$v=19$m=19456$fixture-secret-hash";
pub const REFRESH_TOKEN: &str = "fixture-refresh-token";

const JANUARY: &str = "2025-01-10T09:30:00+00:00";
const FEBRUARY: &str = "2025-02-20T18:45:00+00:00";

/// Rows seeded by [`seed_all`], junction tables included
pub const TOTAL_ROWS: usize = 21;

/// Seed every entity and junction table.
pub async fn seed_all(store: &MemoryEntityStore) {
    seed_catalog(store).await;
    seed_people(store).await;
    seed_sales(store).await;
}

/// Categories, units, items, variants, and item/category links.
pub async fn seed_catalog(store: &MemoryEntityStore) {
    store
        .seed(
            "categories",
            vec![
                record(json!({
                    "id": CATEGORY_DRINKS, "name": "Drinks", "description": "Hot and cold",
                    "sort_order": 1, "is_active": true,
                    "created_at": JANUARY, "updated_at": JANUARY
                })),
                record(json!({
                    "id": CATEGORY_FOOD, "name": "Food", "description": null,
                    "sort_order": 2, "is_active": true,
                    "created_at": JANUARY, "updated_at": JANUARY
                })),
            ],
        )
        .await;
    store
        .seed(
            "units",
            vec![record(json!({
                "id": UNIT_PIECE, "name": "Piece", "abbreviation": "pc",
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "items",
            vec![
                record(json!({
                    "id": ITEM_COFFEE, "name": "Flat White", "sku": "COF-001",
                    "base_price": 4.5, "unit_id": UNIT_PIECE, "is_available": true,
                    "prep_minutes": 3, "created_at": JANUARY, "updated_at": JANUARY
                })),
                record(json!({
                    "id": ITEM_BAGEL, "name": "Sesame Bagel", "sku": "BAG-001",
                    "base_price": 3, "unit_id": UNIT_PIECE, "is_available": false,
                    "prep_minutes": 5, "created_at": JANUARY, "updated_at": JANUARY
                })),
            ],
        )
        .await;
    store
        .seed(
            "item_variants",
            vec![record(json!({
                "id": VARIANT_LARGE, "item_id": ITEM_COFFEE, "name": "Large",
                "price_delta": 0.75, "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "item_categories",
            vec![
                record(json!({ "item_id": ITEM_COFFEE, "category_id": CATEGORY_DRINKS })),
                record(json!({ "item_id": ITEM_BAGEL, "category_id": CATEGORY_FOOD })),
            ],
        )
        .await;
}

/// Staff, customers, discounts, and lookup tables used by sales.
pub async fn seed_people(store: &MemoryEntityStore) {
    store
        .seed(
            "users",
            vec![record(json!({
                "id": USER_CASHIER, "name": "Sam Cashier", "email": "sam@example.com",
                "role": "cashier", "phone": null, "is_active": true,
                "password_hash": PASSWORD_HASH, "refresh_token": REFRESH_TOKEN,
                "otp_code": "481516", "otp_expires_at": JANUARY,
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "customers",
            vec![record(json!({
                "id": CUSTOMER_ANA, "name": "Ana", "phone": "+44 7700 900123",
                "email": "ana@example.com", "loyalty_points": 120, "birthday": "1990-04-02",
                "notes": null, "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "discounts",
            vec![record(json!({
                "id": DISCOUNT_HAPPY, "code": "HAPPY10", "kind": "percentage", "value": 10,
                "starts_on": "2025-01-01", "ends_on": null,
                "happy_hour_start": "16:00:00", "happy_hour_end": "18:00:00",
                "is_active": true, "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "discount_items",
            vec![record(json!({ "discount_id": DISCOUNT_HAPPY, "item_id": ITEM_COFFEE }))],
        )
        .await;
    store
        .seed(
            "payment_methods",
            vec![record(json!({
                "id": PAYMENT_CASH, "name": "Cash", "kind": "cash", "is_active": true,
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "expense_categories",
            vec![record(json!({
                "id": EXPENSE_SUPPLIES, "name": "Supplies", "description": null,
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "dining_tables",
            vec![record(json!({
                "id": TABLE_PATIO, "label": "P1", "seats": 4, "area": "Patio",
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
}

/// Orders in January and February, their lines, one payment, one expense.
pub async fn seed_sales(store: &MemoryEntityStore) {
    store
        .seed(
            "orders",
            vec![
                record(json!({
                    "id": ORDER_JANUARY, "order_number": "A-0001", "customer_id": CUSTOMER_ANA,
                    "user_id": USER_CASHIER, "table_id": TABLE_PATIO, "discount_id": null,
                    "status": "paid", "order_type": "dine_in", "subtotal": 4.5, "tax": 0.45,
                    "total": 4.95, "notes": null, "ordered_at": JANUARY,
                    "created_at": JANUARY, "updated_at": JANUARY
                })),
                record(json!({
                    "id": ORDER_FEBRUARY, "order_number": "A-0002", "customer_id": null,
                    "user_id": USER_CASHIER, "table_id": null, "discount_id": DISCOUNT_HAPPY,
                    "status": "pending", "order_type": "takeaway", "subtotal": 3, "tax": 0.3,
                    "total": 3.3, "notes": "no butter", "ordered_at": FEBRUARY,
                    "created_at": FEBRUARY, "updated_at": FEBRUARY
                })),
            ],
        )
        .await;
    store
        .seed(
            "order_items",
            vec![
                record(json!({
                    "id": ORDER_ITEM_COFFEE, "order_id": ORDER_JANUARY, "item_id": ITEM_COFFEE,
                    "variant_id": null, "quantity": 1, "unit_price": 4.5, "notes": null,
                    "created_at": JANUARY, "updated_at": JANUARY
                })),
                record(json!({
                    "id": ORDER_ITEM_BAGEL, "order_id": ORDER_FEBRUARY, "item_id": ITEM_BAGEL,
                    "variant_id": null, "quantity": 1, "unit_price": 3, "notes": null,
                    "created_at": FEBRUARY, "updated_at": FEBRUARY
                })),
            ],
        )
        .await;
    store
        .seed(
            "payments",
            vec![record(json!({
                "id": PAYMENT_JANUARY, "order_id": ORDER_JANUARY,
                "payment_method_id": PAYMENT_CASH, "amount": 4.95, "paid_at": JANUARY,
                "reference": null, "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
    store
        .seed(
            "expenses",
            vec![record(json!({
                "id": EXPENSE_MILK, "expense_category_id": EXPENSE_SUPPLIES,
                "user_id": USER_CASHIER, "payment_method_id": PAYMENT_CASH,
                "description": "Oat milk", "amount": 24.99, "spent_on": "2025-01-09",
                "created_at": JANUARY, "updated_at": JANUARY
            }))],
        )
        .await;
}
