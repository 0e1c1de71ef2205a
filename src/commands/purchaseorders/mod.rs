pub mod approve_purchase_order_command;
pub mod create_purchase_order_command;
pub mod reject_purchase_order_command;

pub use approve_purchase_order_command::{
    ApprovePurchaseOrderCommand, ApprovePurchaseOrderResult,
};
pub use create_purchase_order_command::{
    CreatePurchaseOrderCommand, CreatePurchaseOrderResult, PurchaseOrderItemRequest,
};
pub use reject_purchase_order_command::{RejectPurchaseOrderCommand, RejectPurchaseOrderResult};
