//! Power policy: activity state, battery bands, keep-alive timing and
//! time-bounded resource guards.

mod guard;
mod policy;

pub use guard::ResourceGuard;
pub use policy::{
    BatteryBand, CRITICAL_BATTERY_LEVEL, Importance, LOW_BATTERY_LEVEL, PowerPolicy,
    PowerSnapshot, PowerState,
};
