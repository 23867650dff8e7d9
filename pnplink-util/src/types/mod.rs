mod device_id;
mod model_id;

pub use device_id::{DeviceId, InvalidDeviceIdError};
pub use model_id::ModelId;

// Just an alias for more descriptive code
pub type HostName = String;
