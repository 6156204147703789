//! Order fulfillment saga constants.

/// Step name: saga opened with the order's items and amount.
pub const STEP_START: &str = "start";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Charge payment for the order.
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";

/// Step name: Release a reservation (compensation).
pub const STEP_RELEASE_INVENTORY: &str = "release_inventory";

/// Step name: Saga finished successfully.
pub const STEP_COMPLETE: &str = "complete";

pub const TOPIC_INVENTORY_RESERVE: &str = "inventory.reserve";
pub const TOPIC_PAYMENT_CHARGE: &str = "payment.charge";
pub const TOPIC_INVENTORY_RELEASE: &str = "inventory.release";

/// Every topic the orchestrator publishes to.
pub const TOPICS: [&str; 3] = [
    TOPIC_INVENTORY_RESERVE,
    TOPIC_PAYMENT_CHARGE,
    TOPIC_INVENTORY_RELEASE,
];

pub const CMD_RESERVE_INVENTORY: &str = "ReserveInventory";
pub const CMD_CHARGE_PAYMENT: &str = "ChargePayment";
pub const CMD_RELEASE_INVENTORY: &str = "ReleaseInventory";
