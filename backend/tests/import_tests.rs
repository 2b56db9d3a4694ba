//! Spreadsheet import: preview purity, dependency-ordered persistence,
//! insert/upsert semantics, and skip-errors handling.

mod common;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::fixtures::{self, CUSTOMER_ANA, ITEM_BAGEL, ITEM_COFFEE, UNIT_PIECE};
use common::{record, sheet, workbook, TestApp};
use pos_keeper_backend::error::AppError;
use pos_keeper_backend::models::interchange::{ImportMode, ImportOptions};
use pos_keeper_backend::services::operation_guard::OperationKind;
use pos_keeper_backend::store::{EntityStore, StoreTransaction};

const CATEGORY_HOT: &str = "1a000000-0000-4000-8000-000000000001";
const CATEGORY_COLD: &str = "1a000000-0000-4000-8000-000000000002";
const UNIT_CUP: &str = "2a000000-0000-4000-8000-000000000001";
const ITEM_LATTE: &str = "9a000000-0000-4000-8000-000000000001";
const ITEM_ICED_TEA: &str = "9a000000-0000-4000-8000-000000000002";

fn options(mode: ImportMode, skip_errors: bool) -> ImportOptions {
    ImportOptions { mode, skip_errors }
}

/// Catalog workbook with sheets deliberately in reverse dependency order
fn catalog_workbook() -> Vec<u8> {
    workbook(vec![
        sheet("Item-Categories", &["item_id", "category_id"])
            .row(&[ITEM_LATTE, CATEGORY_HOT])
            .row(&[ITEM_ICED_TEA, CATEGORY_COLD]),
        sheet("Items", &["id", "name", "sku", "price", "unit_id", "is_available"])
            .row(&[ITEM_LATTE, "Latte", "LAT-001", "4.2", UNIT_CUP, "yes"])
            .row(&[ITEM_ICED_TEA, "Iced Tea", "TEA-001", "3", UNIT_CUP, "no"]),
        sheet("Categories", &["ID", "Name", "Sort Order", "Is Active"])
            .row(&[CATEGORY_HOT, "Hot drinks", "1", "true"])
            .row(&[CATEGORY_COLD, "Cold drinks", "2", "false"]),
        sheet("Units", &["id", "name", "abbreviation"]).row(&[UNIT_CUP, "Cup", "cup"]),
    ])
}

/// Same catalog with one bad category row and one bad item row
fn catalog_workbook_with_errors() -> Vec<u8> {
    workbook(vec![
        sheet("Units", &["id", "name", "abbreviation"]).row(&[UNIT_CUP, "Cup", "cup"]),
        sheet("Categories", &["id", "name", "sort_order", "is_active"])
            .row(&[CATEGORY_HOT, "Hot drinks", "1", "true"])
            .row(&[CATEGORY_COLD, "", "two", "maybe"]),
        sheet("Items", &["id", "name", "price", "unit_id"])
            .row(&[ITEM_LATTE, "Latte", "abc", UNIT_CUP])
            .row(&[ITEM_ICED_TEA, "Iced Tea", "3", UNIT_CUP]),
    ])
}

#[tokio::test]
async fn test_preview_never_writes() {
    let app = TestApp::seeded().await;
    let before = app.store.row_counts().await;

    let preview = app
        .state
        .imports
        .parse_and_preview(&catalog_workbook())
        .unwrap();
    assert_eq!(preview.total_rows, 7);
    assert_eq!(preview.valid_rows, 7);
    assert!(!preview.has_errors());

    let invalid = app
        .state
        .imports
        .parse_and_preview(&catalog_workbook_with_errors())
        .unwrap();
    assert!(invalid.has_errors());

    assert_eq!(app.store.row_counts().await, before);
}

#[tokio::test]
async fn test_preview_reports_row_level_diagnostics() {
    let app = TestApp::new().await;
    let preview = app
        .state
        .imports
        .parse_and_preview(&catalog_workbook_with_errors())
        .unwrap();

    assert_eq!(preview.total_rows, 5);
    assert_eq!(preview.error_rows, 2);
    assert_eq!(preview.valid_rows, 3);

    let categories = preview
        .sheets
        .iter()
        .find(|s| s.sheet == "Categories")
        .unwrap();
    assert_eq!(categories.entity.as_deref(), Some("Category"));
    assert_eq!(categories.error_rows, 1);

    let at = |sheet: &str, row: u32, field: &str| {
        preview
            .diagnostics
            .iter()
            .any(|d| d.sheet == sheet && d.row == row && d.field.as_deref() == Some(field))
    };
    assert!(at("Categories", 3, "name"));
    assert!(at("Categories", 3, "sort_order"));
    assert!(at("Categories", 3, "is_active"));
    assert!(at("Items", 2, "price"));
    // A field that failed to parse is not also reported as missing
    assert_eq!(
        preview
            .diagnostics
            .iter()
            .filter(|d| d.sheet == "Items" && d.field.as_deref() == Some("price"))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_preview_flags_unknown_sheets_and_headers() {
    let app = TestApp::new().await;
    let bytes = workbook(vec![
        sheet("Notes", &["anything"]).row(&["free text"]),
        sheet("Units", &["id", "name", "abbreviation", "Favourite Colour"])
            .row(&[UNIT_CUP, "Cup", "cup", "teal"]),
    ]);

    let preview = app.state.imports.parse_and_preview(&bytes).unwrap();
    let notes = preview.sheets.iter().find(|s| s.sheet == "Notes").unwrap();
    assert!(notes.entity.is_none());
    assert!(preview
        .diagnostics
        .iter()
        .any(|d| d.sheet == "Notes" && d.row == 0));

    let units = preview.sheets.iter().find(|s| s.sheet == "Units").unwrap();
    assert_eq!(units.unknown_headers, vec!["Favourite Colour".to_string()]);
    assert_eq!(units.valid_rows, 1);
}

#[tokio::test]
async fn test_import_persists_in_dependency_order() {
    let app = TestApp::new().await;
    let result = app
        .state
        .imports
        .execute_import(
            &catalog_workbook(),
            options(ImportMode::Insert, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.inserted, 7);
    assert_eq!(result.failed, 0);
    let order: Vec<&str> = result.sheets.iter().map(|s| s.entity.as_str()).collect();
    let position = |entity: &str| order.iter().position(|e| *e == entity).unwrap();
    assert!(position("Unit") < position("Item"));
    assert!(position("Category") < position("ItemCategory"));
    assert!(position("Item") < position("ItemCategory"));

    let items = app.store.rows("items").await;
    let latte = items.iter().find(|r| r["id"] == json!(ITEM_LATTE)).unwrap();
    assert_eq!(latte["base_price"], json!(4.2));
    assert!(!latte.contains_key("price"));
    assert!(!latte.contains_key("unit"));
    assert_eq!(latte["unit_id"], json!(UNIT_CUP));
    assert_eq!(latte["is_available"], json!(true));
    assert_eq!(app.store.rows("item_categories").await.len(), 2);
}

#[tokio::test]
async fn test_children_before_parents_violates_foreign_keys() {
    let app = TestApp::new().await;
    fixtures::seed_catalog(&app.store).await;
    fixtures::seed_people(&app.store).await;

    let order_id = "ba000000-0000-4000-8000-000000000001";
    let line_id = "da000000-0000-4000-8000-000000000001";

    // Writing the line before its order trips the constraint
    let mut tx = app.store.begin().await.unwrap();
    let naive = tx
        .insert(
            "order_items",
            &record(json!({
                "id": line_id, "order_id": order_id, "item_id": ITEM_COFFEE,
                "quantity": 2, "unit_price": 4.5
            })),
        )
        .await;
    assert!(matches!(naive, Err(AppError::ForeignKey(_))));
    tx.rollback().await.unwrap();

    // The importer orders the same sheets parents-first
    let bytes = workbook(vec![
        sheet("Order Items", &["id", "order_id", "item_id", "quantity", "unit_price"])
            .row(&[line_id, order_id, ITEM_COFFEE, "2", "4.5"]),
        sheet(
            "Orders",
            &["id", "order_number", "customer_id", "status", "order_type", "total", "ordered_at"],
        )
        .row(&[order_id, "B-0001", CUSTOMER_ANA, "paid", "takeaway", "9", "2025-03-01 12:00"]),
    ]);
    let result = app
        .state
        .imports
        .execute_import(&bytes, options(ImportMode::Insert, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.inserted, 2);

    let orders = app.store.rows("orders").await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["customer_id"], json!(CUSTOMER_ANA));
    assert_eq!(orders[0]["ordered_at"], json!("2025-03-01T12:00:00+00:00"));
    assert_eq!(app.store.rows("order_items").await.len(), 1);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let app = TestApp::new().await;
    let cancel = CancellationToken::new();

    let first = app
        .state
        .imports
        .execute_import(&catalog_workbook(), options(ImportMode::Upsert, false), &cancel)
        .await
        .unwrap();
    assert_eq!(first.inserted, 7);
    let after_first = app.store.row_counts().await;

    let second = app
        .state
        .imports
        .execute_import(&catalog_workbook(), options(ImportMode::Upsert, false), &cancel)
        .await
        .unwrap();
    // Entity rows update in place; existing links are skipped
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 5);
    assert_eq!(second.skipped, 2);
    assert_eq!(app.store.row_counts().await, after_first);
}

#[tokio::test]
async fn test_upsert_updates_existing_rows() {
    let app = TestApp::seeded().await;
    let bytes = workbook(vec![sheet("Items", &["id", "name", "price"])
        .row(&[ITEM_COFFEE, "Flat White", "4.8"])]);

    let result = app
        .state
        .imports
        .execute_import(&bytes, options(ImportMode::Upsert, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.updated, 1);

    let items = app.store.rows("items").await;
    let coffee = items.iter().find(|r| r["id"] == json!(ITEM_COFFEE)).unwrap();
    assert_eq!(coffee["base_price"], json!(4.8));
    // Columns absent from the sheet keep their stored values
    assert_eq!(coffee["sku"], json!("COF-001"));
    assert_eq!(coffee["unit_id"], json!(UNIT_PIECE));
}

#[tokio::test]
async fn test_insert_twice_skips_duplicates() {
    let app = TestApp::new().await;
    let cancel = CancellationToken::new();

    app.state
        .imports
        .execute_import(&catalog_workbook(), options(ImportMode::Insert, false), &cancel)
        .await
        .unwrap();
    let after_first = app.store.row_counts().await;

    let second = app
        .state
        .imports
        .execute_import(&catalog_workbook(), options(ImportMode::Insert, false), &cancel)
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 7);
    assert_eq!(second.failed, 0);
    assert_eq!(second.errors.len(), 7);
    assert!(second
        .errors
        .iter()
        .any(|e| e.entity == "Item" && e.message.starts_with("Duplicate, skipped")));
    assert_eq!(app.store.row_counts().await, after_first);
}

#[tokio::test]
async fn test_invalid_rows_abort_without_skip_errors() {
    let app = TestApp::new().await;
    let before = app.store.row_counts().await;

    let result = app
        .state
        .imports
        .execute_import(
            &catalog_workbook_with_errors(),
            options(ImportMode::Insert, false),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))), "got {result:?}");
    assert_eq!(app.store.row_counts().await, before);
}

#[tokio::test]
async fn test_skip_errors_keeps_valid_rows() {
    let app = TestApp::new().await;

    let result = app
        .state
        .imports
        .execute_import(
            &catalog_workbook_with_errors(),
            options(ImportMode::Insert, true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.inserted, 3);
    assert_eq!(result.failed, 2);
    assert!(result.errors.iter().any(|e| e.entity == "Category" && e.row == 3));
    assert!(result.errors.iter().any(|e| e.entity == "Item" && e.row == 2));

    assert_eq!(app.store.rows("units").await.len(), 1);
    assert_eq!(app.store.rows("categories").await.len(), 1);
    let items = app.store.rows("items").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!(ITEM_ICED_TEA));
}

#[tokio::test]
async fn test_store_errors_roll_back_the_whole_import() {
    let app = TestApp::new().await;
    let missing_unit = "2f000000-0000-4000-8000-000000000099";
    let bytes = workbook(vec![
        sheet("Categories", &["id", "name"]).row(&[CATEGORY_HOT, "Hot drinks"]),
        sheet("Items", &["id", "name", "price", "unit_id"])
            .row(&[ITEM_LATTE, "Latte", "4.2", missing_unit])
            .row(&[ITEM_BAGEL, "Bagel", "3", ""]),
    ]);

    let strict = app
        .state
        .imports
        .execute_import(&bytes, options(ImportMode::Insert, false), &CancellationToken::new())
        .await;
    assert!(matches!(strict, Err(AppError::ForeignKey(_))), "got {strict:?}");
    assert!(app.store.rows("categories").await.is_empty());
    assert!(app.store.rows("items").await.is_empty());

    let lenient = app
        .state
        .imports
        .execute_import(&bytes, options(ImportMode::Insert, true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(lenient.inserted, 2);
    assert_eq!(lenient.failed, 1);
    assert_eq!(app.store.rows("categories").await.len(), 1);
    assert_eq!(app.store.rows("items").await.len(), 1);
}

#[tokio::test]
async fn test_secret_columns_are_never_imported() {
    let app = TestApp::new().await;
    let user_id = "6a000000-0000-4000-8000-000000000001";
    let bytes = workbook(vec![sheet(
        "Users",
        &["id", "name", "email", "role", "password_hash", "refresh_token"],
    )
    .row(&[user_id, "Jo", "jo@example.com", "Waiter", "plaintext!", "token"])]);

    let preview = app.state.imports.parse_and_preview(&bytes).unwrap();
    let users = &preview.sheets[0];
    assert!(users.unknown_headers.is_empty());
    assert_eq!(users.valid_rows, 1);

    app.state
        .imports
        .execute_import(&bytes, options(ImportMode::Insert, false), &CancellationToken::new())
        .await
        .unwrap();
    let rows = app.store.rows("users").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["role"], json!("waiter"));
    assert!(!rows[0].contains_key("password_hash"));
    assert!(!rows[0].contains_key("refresh_token"));
}

#[tokio::test]
async fn test_rows_without_id_get_one() {
    let app = TestApp::new().await;
    let bytes = workbook(vec![sheet("Units", &["name", "abbreviation"])
        .row(&["Kilogram", "kg"])
        .row(&["Litre", "l"])]);

    app.state
        .imports
        .execute_import(&bytes, options(ImportMode::Insert, false), &CancellationToken::new())
        .await
        .unwrap();
    let units = app.store.rows("units").await;
    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|u| u["id"].as_str().map_or(false, |id| id.len() == 36)));
    assert_ne!(units[0]["id"], units[1]["id"]);
}

#[tokio::test]
async fn test_cancelled_import_commits_nothing() {
    let app = TestApp::new().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = app
        .state
        .imports
        .execute_import(&catalog_workbook(), options(ImportMode::Insert, false), &cancel)
        .await;
    assert!(matches!(result, Err(AppError::Cancelled(_))));
    assert!(app.store.rows("units").await.is_empty());
    assert!(app.state.guard.current().is_none());
}

#[tokio::test]
async fn test_import_waits_for_running_backup() {
    let app = TestApp::new().await;
    let _permit = app.state.guard.try_acquire(OperationKind::Backup).unwrap();

    let result = app
        .state
        .imports
        .execute_import(
            &catalog_workbook(),
            options(ImportMode::Insert, false),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    // Preview holds no permit and still works
    assert!(app
        .state
        .imports
        .parse_and_preview(&catalog_workbook())
        .is_ok());
}

#[tokio::test]
async fn test_garbage_upload_is_rejected() {
    let app = TestApp::new().await;
    let result = app.state.imports.parse_and_preview(b"definitely not a workbook");
    assert!(matches!(result, Err(AppError::Spreadsheet(_))));
}
