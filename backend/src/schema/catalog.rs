//! Builtin restaurant/retail catalog.
//!
//! Declaration order is the tie-breaker inside a dependency phase, so lookup
//! tables come first and transactional tables last.

use super::{ColumnSpec, EntityMapping, JunctionTable};

const USER_ROLES: &[&str] = &["admin", "manager", "cashier", "waiter", "kitchen"];
const PAYMENT_KINDS: &[&str] = &["cash", "card", "mobile", "voucher"];
const DISCOUNT_KINDS: &[&str] = &["percentage", "fixed"];
const ORDER_STATUSES: &[&str] = &["pending", "preparing", "served", "paid", "cancelled"];
const ORDER_TYPES: &[&str] = &["dine_in", "takeaway", "delivery"];

fn audited(mapping: EntityMapping) -> EntityMapping {
    mapping
        .column("created_at", ColumnSpec::timestamp())
        .column("updated_at", ColumnSpec::timestamp())
        .dated_by("created_at")
}

pub fn entity_mappings() -> Vec<EntityMapping> {
    vec![
        audited(
            EntityMapping::entity("Category", "categories", "Categories")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string().unique())
                .column("description", ColumnSpec::string())
                .column("sort_order", ColumnSpec::integer())
                .column("is_active", ColumnSpec::boolean()),
        ),
        audited(
            EntityMapping::entity("Unit", "units", "Units")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string().unique())
                .required("abbreviation", ColumnSpec::string()),
        ),
        audited(
            EntityMapping::entity("PaymentMethod", "payment_methods", "Payment Methods")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string().unique())
                .required("kind", ColumnSpec::enumeration(PAYMENT_KINDS))
                .column("is_active", ColumnSpec::boolean()),
        ),
        audited(
            EntityMapping::entity("ExpenseCategory", "expense_categories", "Expense Categories")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string().unique())
                .column("description", ColumnSpec::string()),
        ),
        audited(
            EntityMapping::entity("DiningTable", "dining_tables", "Tables")
                .column("id", ColumnSpec::uuid())
                .required("label", ColumnSpec::string().unique())
                .column("seats", ColumnSpec::integer())
                .column("area", ColumnSpec::string()),
        ),
        audited(
            EntityMapping::entity("User", "users", "Users")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string())
                .required("email", ColumnSpec::string().unique())
                .required("role", ColumnSpec::enumeration(USER_ROLES))
                .column("phone", ColumnSpec::string())
                .column("is_active", ColumnSpec::boolean())
                .secret("password_hash", ColumnSpec::string())
                .secret("refresh_token", ColumnSpec::string())
                .secret("otp_code", ColumnSpec::string())
                .secret("otp_expires_at", ColumnSpec::timestamp()),
        ),
        audited(
            EntityMapping::entity("Customer", "customers", "Customers")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string())
                .column("phone", ColumnSpec::string())
                .column("email", ColumnSpec::string())
                .column("loyalty_points", ColumnSpec::integer())
                .column("birthday", ColumnSpec::date())
                .column("notes", ColumnSpec::string()),
        ),
        audited(
            EntityMapping::entity("Discount", "discounts", "Discounts")
                .column("id", ColumnSpec::uuid())
                .required("code", ColumnSpec::string().unique())
                .required("kind", ColumnSpec::enumeration(DISCOUNT_KINDS))
                .required("value", ColumnSpec::decimal())
                .column("starts_on", ColumnSpec::date())
                .column("ends_on", ColumnSpec::date())
                .column("happy_hour_start", ColumnSpec::time())
                .column("happy_hour_end", ColumnSpec::time())
                .column("is_active", ColumnSpec::boolean()),
        ),
        audited(
            EntityMapping::entity("Item", "items", "Items")
                .column("id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string())
                .column("sku", ColumnSpec::string().unique())
                .required("price", ColumnSpec::decimal())
                .column("unit_id", ColumnSpec::uuid())
                .column("is_available", ColumnSpec::boolean())
                .column("prep_minutes", ColumnSpec::integer())
                .remap("price", "base_price")
                .relation("unit_id", "unit", "Unit"),
        ),
        audited(
            EntityMapping::entity("ItemVariant", "item_variants", "Item Variants")
                .column("id", ColumnSpec::uuid())
                .required("item_id", ColumnSpec::uuid())
                .required("name", ColumnSpec::string())
                .column("price_delta", ColumnSpec::decimal())
                .relation("item_id", "item", "Item"),
        ),
        audited(
            EntityMapping::entity("Order", "orders", "Orders")
                .column("id", ColumnSpec::uuid())
                .required("order_number", ColumnSpec::string().unique())
                .column("customer_id", ColumnSpec::uuid())
                .column("user_id", ColumnSpec::uuid())
                .column("table_id", ColumnSpec::uuid())
                .column("discount_id", ColumnSpec::uuid())
                .required("status", ColumnSpec::enumeration(ORDER_STATUSES))
                .required("order_type", ColumnSpec::enumeration(ORDER_TYPES))
                .column("subtotal", ColumnSpec::decimal())
                .column("tax", ColumnSpec::decimal())
                .required("total", ColumnSpec::decimal())
                .column("notes", ColumnSpec::string())
                .required("ordered_at", ColumnSpec::timestamp())
                .relation("customer_id", "customer", "Customer")
                .relation("user_id", "user", "User")
                .relation("table_id", "table", "DiningTable")
                .relation("discount_id", "discount", "Discount"),
        ),
        audited(
            EntityMapping::entity("Expense", "expenses", "Expenses")
                .column("id", ColumnSpec::uuid())
                .column("expense_category_id", ColumnSpec::uuid())
                .column("user_id", ColumnSpec::uuid())
                .column("payment_method_id", ColumnSpec::uuid())
                .required("description", ColumnSpec::string())
                .required("amount", ColumnSpec::decimal())
                .required("spent_on", ColumnSpec::date())
                .relation("expense_category_id", "category", "ExpenseCategory")
                .relation("user_id", "user", "User")
                .relation("payment_method_id", "payment_method", "PaymentMethod"),
        ),
        audited(
            EntityMapping::entity("OrderItem", "order_items", "Order Items")
                .column("id", ColumnSpec::uuid())
                .required("order_id", ColumnSpec::uuid())
                .required("item_id", ColumnSpec::uuid())
                .column("variant_id", ColumnSpec::uuid())
                .required("quantity", ColumnSpec::integer())
                .required("unit_price", ColumnSpec::decimal())
                .column("notes", ColumnSpec::string())
                .relation("order_id", "order", "Order")
                .relation("item_id", "item", "Item")
                .relation("variant_id", "variant", "ItemVariant"),
        ),
        audited(
            EntityMapping::entity("Payment", "payments", "Payments")
                .column("id", ColumnSpec::uuid())
                .required("order_id", ColumnSpec::uuid())
                .required("payment_method_id", ColumnSpec::uuid())
                .required("amount", ColumnSpec::decimal())
                .required("paid_at", ColumnSpec::timestamp())
                .column("reference", ColumnSpec::string())
                .relation("order_id", "order", "Order")
                .relation("payment_method_id", "payment_method", "PaymentMethod"),
        ),
        EntityMapping::junction("ItemCategory", "item_categories", "Item-Categories")
            .required("item_id", ColumnSpec::uuid())
            .required("category_id", ColumnSpec::uuid())
            .relation("item_id", "item", "Item")
            .relation("category_id", "category", "Category"),
    ]
}

pub fn junction_tables() -> Vec<JunctionTable> {
    vec![
        JunctionTable::new("item_categories", ("item_id", "Item"), ("category_id", "Category")),
        JunctionTable::new("discount_items", ("discount_id", "Discount"), ("item_id", "Item")),
    ]
}
