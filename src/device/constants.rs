use uuid::Uuid;

/**
 * The advertised name of the dice. This is the only criterion used to pick a peripheral.
 */
pub const DEVICE_NAME: &str = "Timeular ZEI";

/**
 * The UUID of the Bluetooth BLE service that exposes the orientation of the dice.
 */
pub const ORIENTATION_SERVICE: Uuid = Uuid::from_u128(0xc7e70010_c847_11e6_8175_8c89a55d403c);

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic that notifies the current face.
 */
pub const ORIENTATION_CHARACTERISTIC: Uuid = Uuid::from_u128(0xc7e70012_c847_11e6_8175_8c89a55d403c);

/**
 * The standard Client Characteristic Configuration descriptor, used to toggle notifications.
 */
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];
pub const DISABLE_NOTIFICATIONS: [u8; 2] = [0x00, 0x00];

/**
 * How long (milliseconds) a single low energy scan cycle lasts.
 */
pub const SCAN_TIMEOUT: u64 = 5000;

/**
 * How long (milliseconds) connecting to the peripheral may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) discovering services, or the details of a service, may take.
 */
pub const DISCOVERY_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) to wait before scanning again after the dice disconnected.
 */
pub const RECONNECT_DELAY: u64 = 1000;

/**
 * How long (milliseconds) a graceful shutdown may take before giving up on the peripheral.
 */
pub const SHUTDOWN_DEADLINE: u64 = 3000;
