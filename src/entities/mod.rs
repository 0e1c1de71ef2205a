pub mod alert_dedup_records;
pub mod goods_receipt_items;
pub mod goods_receipts;
pub mod inventory_audit_entries;
pub mod inventory_levels;
pub mod invoice_line_items;
pub mod invoices;
pub mod notification_logs;
pub mod purchase_order_items;
pub mod purchase_orders;
pub mod supplier_slas;
pub mod suppliers;
