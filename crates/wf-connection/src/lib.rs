//! Single active wallet connection and silent reconnection on reload.

pub mod controller;
pub mod reconnect;

pub use controller::{
    ConnectError, ConnectOutcome, ConnectionController, ConnectionState, ConnectionStatus,
    ConnectionView, ControllerConfig,
};
pub use reconnect::ReconnectPolicy;
