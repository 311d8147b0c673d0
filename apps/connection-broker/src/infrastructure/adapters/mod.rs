//! Built-in Adapters
//!
//! - `SimulatedAdapterFactory`: self-contained paper system (`SIMULATED`)
//! - `MockAdapterFactory`: scriptable sessions for testing

mod mock;
mod simulated;

pub use mock::{MockAdapter, MockAdapterFactory};
pub use simulated::{
    LoginMode, REFUSED_OTP, SIMULATED_SYSTEM_CODE, SimulatedAdapter, SimulatedAdapterFactory,
    SimulatedConfig,
};
